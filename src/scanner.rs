//! Scanner contract and sequence headers
//!
//! One [`FormatScanner`] exists per supported format. Scanning sweeps a
//! source for the format's signature and validates a minimal header on every
//! hit; a hit that fails validation is a false positive and is skipped
//! silently. Every header field is untrusted: pointer and length fields are
//! checked against the source's bounds before a match is committed, so a
//! mis-detected or adversarial header can never push a decoder out of bounds.

use crate::event::EventKind;
use crate::source::ByteSource;
use crate::timeline::{LoopPoint, Timeline};

/// One track's byte region plus the offset where its event stream starts
///
/// Formats with pointer tables (SSEQ) let several tracks share one region
/// with distinct entry offsets; formats with contiguous tracks (SEQ) use
/// `entry == begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackRange {
    /// First legal byte (absolute)
    pub begin: usize,
    /// One past the last legal byte (absolute)
    pub end: usize,
    /// Where decoding starts; `begin <= entry < end`
    pub entry: usize,
}

impl TrackRange {
    /// A contiguous track decoded from its first byte
    pub fn contiguous(begin: usize, end: usize) -> Self {
        Self {
            begin,
            end,
            entry: begin,
        }
    }

    /// Region length in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    /// Whether the range is internally consistent and inside `source`
    pub fn is_valid_for(&self, source: &dyn ByteSource) -> bool {
        self.begin <= self.entry && self.entry < self.end && self.end <= source.len()
    }
}

/// Instrument/bank reference declared by a decoded sequence
///
/// Handed to the external collection matcher so the right timbre data can be
/// paired with the sequence; this crate never resolves instruments itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrumentRef {
    /// Program number
    pub program: u8,
}

/// Format-specific playback parameters established by a validated header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Static format identifier ("seqp", "sseq", ...)
    pub format: &'static str,
    /// Absolute offset of the signature hit
    pub base_offset: usize,
    /// Byte length claimed by the match
    pub byte_len: usize,
    /// Pulses per quarter note (tick resolution)
    pub ppqn: u16,
    /// Format-global initial tempo in microseconds per quarter, if declared
    pub initial_tempo: Option<u32>,
    /// Per-track byte regions, all validated against the source
    pub tracks: Vec<TrackRange>,
}

impl SequenceHeader {
    /// Number of declared tracks
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// A format handler: signature scanning plus per-track event decoding
pub trait FormatScanner {
    /// Short static format identifier, also used as `SequenceHeader::format`
    fn name(&self) -> &'static str;

    /// Scan `source` for validated occurrences of this format
    ///
    /// Returns one header per committed match; zero matches is the normal
    /// negative result, never an error. Candidates whose header fields fail
    /// bounds or sanity validation are dropped silently.
    fn scan(&self, source: &dyn ByteSource) -> Vec<SequenceHeader>;

    /// Decode one track of a previously scanned sequence into a timeline
    ///
    /// `track` indexes `header.tracks`; passing an out-of-range index is a
    /// caller contract violation and panics.
    fn decode_track(&self, source: &dyn ByteSource, header: &SequenceHeader, track: usize)
        -> Timeline;
}

/// A fully decoded sequence: validated header plus one timeline per track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSequence {
    /// The validated, bounds-checked header
    pub header: SequenceHeader,
    /// One timeline per declared track, in track order
    pub tracks: Vec<Timeline>,
}

impl DecodedSequence {
    /// Static identifier of the format that produced this sequence
    pub fn format_id(&self) -> &'static str {
        self.header.format
    }

    /// Distinct instrument references used across all tracks, in first-use order
    pub fn instrument_refs(&self) -> Vec<InstrumentRef> {
        let mut seen = Vec::new();
        for timeline in &self.tracks {
            for event in timeline.events() {
                if let EventKind::ProgramChange { program } = event.kind {
                    let instrument = InstrumentRef { program };
                    if !seen.contains(&instrument) {
                        seen.push(instrument);
                    }
                }
            }
        }
        seen
    }

    /// Loop points per track index, for tracks that loop
    pub fn loop_points(&self) -> Vec<(usize, LoopPoint)> {
        self.tracks
            .iter()
            .enumerate()
            .filter_map(|(index, timeline)| timeline.loop_point().map(|lp| (index, lp)))
            .collect()
    }
}
