//! Nintendo DS SSEQ format scanner and decoder
//!
//! SSEQ is the sequence chunk of the DS sound data archive. Unlike SEQ it is
//! little-endian, carries its tracks as entry pointers into one shared data
//! region, and encodes note durations inline, so no note-off pairing is
//! needed.
//!
//! Format details:
//! - File header (16 bytes): "SSEQ" magic, byte-order mark 0xFEFF, version,
//!   file size u32, header size (0x10), block count (1)
//! - DATA block: "DATA" magic, block size u32, data offset u32 (absolute
//!   from the file base, normally 0x1C)
//! - The stream opens with an optional track-allocation prologue: 0xFE plus
//!   a u16 track bitmask, then one 0x93 entry (track id + u24 offset,
//!   relative to the data start) per extra track; track 0 continues after
//!   the prologue
//! - Notes are opcodes 0x00-0x7F (the key), with velocity and VLQ duration
//!   operands; time advances via 0x80 rests (or after notes while
//!   note-wait mode is on)
//! - 0xD4/0xFC bracket finite loop regions, 0x94 is an unconditional jump
//!   whose backward form is the song loop, 0x95/0xFD are call/return
//!
//! Resolution is fixed at 48 pulses per quarter note; tempo arrives through
//! 0xE1 events in the stream rather than the header.

use log::debug;

use crate::event::EventKind;
use crate::scanner::{FormatScanner, SequenceHeader, TrackRange};
use crate::signature;
use crate::source::{ByteSource, Endian};
use crate::timeline::{DecodeFlags, Timeline};
use crate::track::TrackWalker;

/// "SSEQ" magic marker
pub const SIGNATURE: &[u8] = b"SSEQ";

/// Fixed tick resolution of the DS sequencer
pub const PPQN: u16 = 48;

/// Byte-order mark all DS sound chunks carry
const BOM: u16 = 0xFEFF;

/// At most 16 tracks per sequence
const MAX_TRACKS: usize = 16;

/// Nintendo DS SSEQ scanner
pub struct SseqScanner;

impl SseqScanner {
    /// Validate the chunk header at a signature hit; returns the sequence
    /// data region `(data_begin, data_end)` on success
    fn validate_header(source: &dyn ByteSource, base: usize) -> Option<(usize, usize)> {
        if source.read_u16(base + 4, Endian::Little).ok()? != BOM {
            return None;
        }
        let file_size = source.read_u32(base + 8, Endian::Little).ok()? as usize;
        if source.read_u16(base + 12, Endian::Little).ok()? != 0x10 {
            return None;
        }
        if source.read_u16(base + 14, Endian::Little).ok()? != 1 {
            return None;
        }
        if !signature::matches_at(source, base + 0x10, b"DATA") {
            return None;
        }
        let data_offset = source.read_u32(base + 0x18, Endian::Little).ok()? as usize;
        if data_offset < 0x1C || data_offset >= file_size {
            return None;
        }
        let data_begin = base.checked_add(data_offset)?;
        if data_begin >= source.len() {
            return None;
        }
        // A dump truncated below the declared file size still scans; the
        // affected tracks decode with the truncation flag instead.
        let data_end = (base + file_size).min(source.len());
        Some((data_begin, data_end))
    }

    /// Parse the 0xFE/0x93 track-allocation prologue into entry offsets
    ///
    /// Returns `None` when a declared entry points outside the data region,
    /// which rejects the whole candidate as a false positive.
    fn parse_track_entries(
        source: &dyn ByteSource,
        data_begin: usize,
        data_end: usize,
    ) -> Option<Vec<usize>> {
        let mut cursor = data_begin;
        let mut entries = Vec::new();
        if source.read_u8(cursor) == Ok(0xFE) {
            let mask = source.read_u16(cursor + 1, Endian::Little).ok()?;
            if mask == 0 {
                return None;
            }
            cursor += 3;
            while source.read_u8(cursor) == Ok(0x93) && entries.len() < MAX_TRACKS - 1 {
                let _track_id = source.read_u8(cursor + 1).ok()?;
                let offset = source.read_u24(cursor + 2, Endian::Little).ok()? as usize;
                let entry = data_begin.checked_add(offset)?;
                if entry < data_begin || entry >= data_end {
                    return None;
                }
                entries.push(entry);
                cursor += 5;
            }
        }
        if cursor >= data_end {
            return None;
        }
        // Track 0 runs from just past the prologue
        entries.insert(0, cursor);
        Some(entries)
    }
}

impl FormatScanner for SseqScanner {
    fn name(&self) -> &'static str {
        "sseq"
    }

    fn scan(&self, source: &dyn ByteSource) -> Vec<SequenceHeader> {
        let mut headers = Vec::new();
        for base in signature::find_all(source, SIGNATURE) {
            let Some((data_begin, data_end)) = Self::validate_header(source, base) else {
                debug!("sseq candidate at {base:#x} failed header validation");
                continue;
            };
            let Some(entries) = Self::parse_track_entries(source, data_begin, data_end) else {
                debug!("sseq candidate at {base:#x} has invalid track entries");
                continue;
            };
            let tracks = entries
                .into_iter()
                .map(|entry| TrackRange {
                    begin: data_begin,
                    end: data_end,
                    entry,
                })
                .collect();
            headers.push(SequenceHeader {
                format: self.name(),
                base_offset: base,
                byte_len: data_end - base,
                ppqn: PPQN,
                initial_tempo: None,
                tracks,
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
        let data_begin = range.begin;
        let mut walker = TrackWalker::new(source, range);
        // Note-wait mode: when on, a note's duration also advances time
        let mut note_wait = false;

        while walker.is_running() {
            let Some((op_offset, op)) = walker.fetch_op() else {
                break;
            };
            match op {
                // Note: key, velocity, VLQ duration
                0x00..=0x7F => {
                    let Some(velocity) = walker.fetch_u8() else { break };
                    let Some(duration) = walker.fetch_vlq() else { break };
                    walker.emit(
                        op_offset,
                        EventKind::Note {
                            key: op,
                            velocity,
                            duration,
                        },
                    );
                    if note_wait {
                        walker.advance_ticks(duration);
                    }
                }
                // Rest
                0x80 => {
                    let Some(ticks) = walker.fetch_vlq() else { break };
                    walker.advance_ticks(ticks);
                }
                // Program change
                0x81 => {
                    let Some(program) = walker.fetch_vlq() else { break };
                    walker.emit(
                        op_offset,
                        EventKind::ProgramChange {
                            program: (program & 0x7F) as u8,
                        },
                    );
                }
                // Track-open entry; already handled during scanning
                0x93 => walker.skip(4),
                // Unconditional jump; backward form is the song loop,
                // forward form a plain goto
                0x94 => {
                    let Some(offset) = walker.fetch_u24(Endian::Little) else {
                        break;
                    };
                    let target = data_begin + offset as usize;
                    if target <= op_offset {
                        walker.jump_song_loop(target);
                    } else {
                        walker.redirect(target);
                    }
                }
                // Subroutine call/return
                0x95 => {
                    let Some(offset) = walker.fetch_u24(Endian::Little) else {
                        break;
                    };
                    walker.call(data_begin + offset as usize);
                }
                0xFD => walker.ret(),
                // Pan and volume map onto their MIDI controllers
                0xC0 => {
                    let Some(value) = walker.fetch_u8() else { break };
                    walker.emit(
                        op_offset,
                        EventKind::Controller {
                            controller: 10,
                            value,
                        },
                    );
                }
                0xC1 => {
                    let Some(value) = walker.fetch_u8() else { break };
                    walker.emit(
                        op_offset,
                        EventKind::Controller {
                            controller: 7,
                            value,
                        },
                    );
                }
                // Note-wait mode toggle
                0xC7 => {
                    let Some(value) = walker.fetch_u8() else { break };
                    note_wait = value != 0;
                }
                // Expression
                0xD5 => {
                    let Some(value) = walker.fetch_u8() else { break };
                    walker.emit(
                        op_offset,
                        EventKind::Controller {
                            controller: 11,
                            value,
                        },
                    );
                }
                // Remaining single-operand channel parameters: consumed, not modeled
                0xC2..=0xC6 | 0xC8..=0xCF | 0xD0..=0xD3 | 0xD6 => walker.skip(1),
                // Loop region: operand is extra repeats, 0 means unbounded
                0xD4 => {
                    let Some(repeats) = walker.fetch_u8() else { break };
                    let total = if repeats == 0 {
                        0
                    } else {
                        u32::from(repeats) + 1
                    };
                    walker.loop_begin(total);
                }
                0xFC => walker.loop_end(),
                // Two-operand parameters: modulation delay, sweep pitch
                0xE0 | 0xE3 => walker.skip(2),
                // Tempo in beats per minute
                0xE1 => {
                    let Some(bpm) = walker.fetch_u16(Endian::Little) else {
                        break;
                    };
                    if bpm > 0 {
                        walker.emit(
                            op_offset,
                            EventKind::TempoChange {
                                usec_per_quarter: 60_000_000 / u32::from(bpm),
                            },
                        );
                    }
                }
                // In-stream track allocation: skip the bitmask
                0xFE => walker.skip(2),
                // Explicit end of track
                0xFF => walker.finish(DecodeFlags::empty()),
                // Unknown opcode: no way to stay in sync
                _ => {
                    debug!("sseq unknown opcode {op:#04x} at {op_offset:#x}");
                    walker.finish(DecodeFlags::TRUNCATED);
                }
            }
        }

        walker.into_timeline()
    }
}
