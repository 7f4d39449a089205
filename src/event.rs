//! Timeline event model
//!
//! The decoded output is a closed set of musical events, deliberately close
//! to what a MIDI exporter consumes. Every event carries the absolute tick
//! at which it occurs and the source byte offset of the opcode that produced
//! it, so a decoded note can always be traced back into the hex dump.

/// One decoded musical event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Absolute time in ticks, scaled by the sequence's pulses-per-quarter
    pub tick: u64,
    /// Absolute byte offset of the opcode this event was decoded from
    pub offset: usize,
    /// What happened
    pub kind: EventKind,
}

/// The closed variant set of decodable events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A note with its full gate duration resolved
    Note {
        /// MIDI key number (60 = middle C)
        key: u8,
        /// Attack velocity (1-127)
        velocity: u8,
        /// Gate length in ticks
        duration: u32,
    },
    /// A continuous controller change (pan, volume, expression, ...)
    Controller {
        /// MIDI controller number
        controller: u8,
        /// New controller value (0-127)
        value: u8,
    },
    /// An instrument/program selection
    ProgramChange {
        /// Program number within the active bank
        program: u8,
    },
    /// A tempo change
    TempoChange {
        /// Microseconds per quarter note
        usec_per_quarter: u32,
    },
    /// A time signature change
    TimeSignature {
        /// Beats per bar
        numerator: u8,
        /// Beat unit as a power of two denominator (4 = quarter)
        denominator: u8,
    },
    /// Terminal marker; every finished timeline ends with exactly one
    EndOfTrack,
}

impl Event {
    /// Whether this is the terminal end-of-track marker
    pub fn is_end_of_track(&self) -> bool {
        matches!(self.kind, EventKind::EndOfTrack)
    }
}
