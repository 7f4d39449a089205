//! PlayStation SEQ format scanner and decoder
//!
//! SEQ is the PlayStation SDK's sequence format, essentially a format-0
//! Standard MIDI File with a compact fixed header.
//!
//! Format details:
//! - Magic: "pQES" (4 bytes), then all header fields big-endian
//! - Version: u32, always 1
//! - Resolution: u16 pulses per quarter note
//! - Initial tempo: u24, microseconds per quarter note
//! - Rhythm: numerator byte + denominator byte (power-of-two exponent)
//! - Event stream: VLQ delta times, running-status channel messages,
//!   SMF meta events; terminated by the end-of-track meta (FF 2F 00)
//!
//! Note durations are not inline: a note's gate length is the distance to
//! its matching note-off (or note-on with velocity 0), so the decoder keeps
//! a pending-note table and patches durations as the offs arrive. Notes
//! still open when the track ends are closed at the final tick.

use std::collections::HashMap;

use log::debug;

use crate::event::EventKind;
use crate::scanner::{FormatScanner, SequenceHeader, TrackRange};
use crate::signature;
use crate::source::{ByteSource, Endian};
use crate::timeline::{DecodeFlags, Timeline};
use crate::track::TrackWalker;

/// "pQES" magic marker
pub const SIGNATURE: &[u8] = b"pQES";

/// Header length in bytes: magic + version + resolution + tempo + rhythm
const HEADER_LEN: usize = 15;

/// PlayStation SEQ scanner
pub struct SeqpScanner;

impl SeqpScanner {
    /// Validate the fixed header at a signature hit
    ///
    /// All fields are untrusted; any implausible value rejects the candidate.
    fn validate_header(source: &dyn ByteSource, offset: usize) -> Option<(u16, u32)> {
        let version = source.read_u32(offset + 4, Endian::Big).ok()?;
        if version != 1 {
            return None;
        }
        let ppqn = source.read_u16(offset + 8, Endian::Big).ok()?;
        if ppqn == 0 || ppqn > 960 {
            return None;
        }
        let tempo = source.read_u24(offset + 10, Endian::Big).ok()?;
        if tempo == 0 {
            return None;
        }
        let numerator = source.read_u8(offset + 13).ok()?;
        let denominator_exp = source.read_u8(offset + 14).ok()?;
        if numerator == 0 || numerator > 64 || denominator_exp > 7 {
            return None;
        }
        Some((ppqn, tempo))
    }
}

impl FormatScanner for SeqpScanner {
    fn name(&self) -> &'static str {
        "seqp"
    }

    fn scan(&self, source: &dyn ByteSource) -> Vec<SequenceHeader> {
        let hits = signature::find_all(source, SIGNATURE);
        let mut headers = Vec::new();
        for (index, &offset) in hits.iter().enumerate() {
            let Some((ppqn, tempo)) = Self::validate_header(source, offset) else {
                debug!("seqp candidate at {offset:#x} failed header validation");
                continue;
            };
            // The stream runs to the next signature hit or the end of the
            // source; the end-of-track meta ends decoding earlier.
            let end = hits.get(index + 1).copied().unwrap_or_else(|| source.len());
            let track_start = offset + HEADER_LEN;
            if track_start >= end {
                continue;
            }
            headers.push(SequenceHeader {
                format: self.name(),
                base_offset: offset,
                byte_len: end - offset,
                ppqn,
                initial_tempo: Some(tempo),
                tracks: vec![TrackRange::contiguous(track_start, end)],
            });
        }
        headers
    }

    fn decode_track(
        &self,
        source: &dyn ByteSource,
        header: &SequenceHeader,
        track: usize,
    ) -> Timeline {
        let range = &header.tracks[track];
        let mut walker = TrackWalker::new(source, range);
        // (channel, key) -> (event index, start tick) for gate resolution
        let mut pending: HashMap<(u8, u8), (usize, u64)> = HashMap::new();
        let mut running_status: Option<u8> = None;

        while walker.is_running() {
            let Some(delta) = walker.fetch_vlq() else { break };
            walker.advance_ticks(delta);

            let Some((op_offset, first)) = walker.fetch_op() else {
                break;
            };
            // Running status: a data byte here reuses the previous status
            // and already is the first operand.
            let (status, mut preread) = if first & 0x80 != 0 {
                if first < 0xF0 {
                    running_status = Some(first);
                }
                (first, None)
            } else {
                match running_status {
                    Some(status) => (status, Some(first)),
                    None => {
                        // Data byte with nothing to run on: unrecoverable desync
                        walker.finish(DecodeFlags::TRUNCATED);
                        break;
                    }
                }
            };
            let mut next_operand = |walker: &mut TrackWalker| match preread.take() {
                Some(byte) => Some(byte),
                None => walker.fetch_u8(),
            };

            let channel = status & 0x0F;
            match status & 0xF0 {
                0x80 => {
                    let Some(key) = next_operand(&mut walker) else { break };
                    if walker.fetch_u8().is_none() {
                        break; // release velocity
                    }
                    close_note(&mut walker, &mut pending, channel, key);
                }
                0x90 => {
                    let Some(key) = next_operand(&mut walker) else { break };
                    let Some(velocity) = walker.fetch_u8() else { break };
                    // Velocity 0 is a note-off; a re-struck key closes the
                    // old gate either way.
                    close_note(&mut walker, &mut pending, channel, key);
                    if velocity > 0 {
                        let index = walker.emit(
                            op_offset,
                            EventKind::Note {
                                key,
                                velocity,
                                duration: 0,
                            },
                        );
                        pending.insert((channel, key), (index, walker.tick()));
                    }
                }
                0xA0 => {
                    // Polyphonic pressure: outside the event set
                    if next_operand(&mut walker).is_none() || walker.fetch_u8().is_none() {
                        break;
                    }
                }
                0xB0 => {
                    let Some(controller) = next_operand(&mut walker) else {
                        break;
                    };
                    let Some(value) = walker.fetch_u8() else { break };
                    walker.emit(op_offset, EventKind::Controller { controller, value });
                }
                0xC0 => {
                    let Some(program) = next_operand(&mut walker) else { break };
                    walker.emit(op_offset, EventKind::ProgramChange { program });
                }
                0xD0 => {
                    // Channel pressure: outside the event set
                    if next_operand(&mut walker).is_none() {
                        break;
                    }
                }
                0xE0 => {
                    // Pitch bend: outside the event set
                    if next_operand(&mut walker).is_none() || walker.fetch_u8().is_none() {
                        break;
                    }
                }
                0xF0 => match status {
                    0xFF => {
                        let Some(meta) = walker.fetch_u8() else { break };
                        let Some(len) = walker.fetch_vlq() else { break };
                        match meta {
                            0x2F => {
                                close_all_notes(&mut walker, &mut pending);
                                walker.finish(DecodeFlags::empty());
                            }
                            0x51 if len == 3 => {
                                let Some(usec) = walker.fetch_u24(Endian::Big) else {
                                    break;
                                };
                                walker.emit(
                                    op_offset,
                                    EventKind::TempoChange {
                                        usec_per_quarter: usec,
                                    },
                                );
                            }
                            0x58 if len >= 2 => {
                                let Some(numerator) = walker.fetch_u8() else { break };
                                let Some(exp) = walker.fetch_u8() else { break };
                                walker.skip(len as usize - 2);
                                walker.emit(
                                    op_offset,
                                    EventKind::TimeSignature {
                                        numerator,
                                        denominator: 1u8 << exp.min(7),
                                    },
                                );
                            }
                            _ => walker.skip(len as usize),
                        }
                    }
                    0xF0 | 0xF7 => {
                        let Some(len) = walker.fetch_vlq() else { break };
                        walker.skip(len as usize);
                    }
                    _ => {
                        // Unknown system realtime/common byte: cannot resync
                        walker.finish(DecodeFlags::TRUNCATED);
                    }
                },
                _ => unreachable!("status bytes cover 0x80..=0xFF"),
            }
        }

        close_all_notes(&mut walker, &mut pending);
        walker.into_timeline()
    }
}

/// Patch the gate duration of the pending note on (channel, key), if any
fn close_note(
    walker: &mut TrackWalker,
    pending: &mut HashMap<(u8, u8), (usize, u64)>,
    channel: u8,
    key: u8,
) {
    if let Some((index, start)) = pending.remove(&(channel, key)) {
        let duration = (walker.tick() - start) as u32;
        walker.patch_note_duration(index, duration);
    }
}

/// Close every pending note at the current tick
fn close_all_notes(walker: &mut TrackWalker, pending: &mut HashMap<(u8, u8), (usize, u64)>) {
    let tick = walker.tick();
    for (_, (index, start)) in pending.drain() {
        walker.patch_note_duration(index, (tick - start) as u32);
    }
}
