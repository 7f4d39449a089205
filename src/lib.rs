//! Format Scanner & Sequence Decoder for game music rips
//!
//! Recovers musical structure from proprietary binary sound-driver data
//! embedded in disk images and ROM dumps, and re-expresses it as a timed
//! note/controller event timeline per track, ready for export (e.g. MIDI).
//!
//! # Features
//! - Registry-driven format detection by file extension and binary signature
//! - Per-format header parsing with full bounds validation of untrusted fields
//! - Track event decoding with running-status, lookup-table and delta encodings
//! - Loop and jump handling that is guaranteed to terminate on malformed input
//! - Per-track timelines with tick-ordered events and loop-point metadata
//!
//! # Crate feature flags
//! - `seqp` (default): PlayStation SEQ scanner/decoder (`formats::seqp`)
//! - `sseq` (default): Nintendo DS SSEQ scanner/decoder (`formats::sseq`)
//!
//! # Quick start
//! ```no_run
//! let data = std::fs::read("game.rom").unwrap();
//! for seq in romseq::decode(&data) {
//!     println!(
//!         "{} at {:#x}: {} track(s), ppqn {}",
//!         seq.header.format,
//!         seq.header.base_offset,
//!         seq.tracks.len(),
//!         seq.header.ppqn
//!     );
//!     for timeline in &seq.tracks {
//!         for event in timeline.events() {
//!             println!("  tick {} {:?}", event.tick, event.kind);
//!         }
//!     }
//! }
//! ```
//!
//! Malformed or truncated input never panics and never hangs: decoders record
//! anomalies as [`DecodeFlags`] on the affected [`Timeline`] and always return
//! whatever they decoded up to that point.

#![warn(missing_docs)]

// Domain modules
pub mod event; // Timeline event model
pub mod formats; // Concrete format scanners/decoders
pub mod registry; // Extension/signature scanner selection
pub mod scanner; // Scanner contract and sequence headers
pub mod signature; // Binary signature matching
pub mod source; // Read-only byte source contract
pub mod timeline; // Per-track decoded timelines
pub mod track; // Track decoding state machine

/// Error types for scanner and decoder operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RomSeqError {
    /// A read would exceed the byte source's bounds
    #[error("read of {len} byte(s) at offset {offset:#x} exceeds source length {source_len:#x}")]
    OutOfRange {
        /// Absolute offset of the attempted read
        offset: usize,
        /// Number of bytes requested
        len: usize,
        /// Total length of the byte source
        source_len: usize,
    },

    /// Header fields failed bounds or sanity validation
    #[error("malformed header: {0}")]
    MalformedHeader(String),
}

/// Result type for scanner and decoder operations
pub type Result<T> = std::result::Result<T, RomSeqError>;

// Public API exports
pub use event::{Event, EventKind};
pub use registry::{decode, FormatRegistry};
pub use scanner::{DecodedSequence, FormatScanner, InstrumentRef, SequenceHeader, TrackRange};
pub use source::{ByteSource, Endian};
pub use timeline::{DecodeFlags, LoopPoint, Timeline};
pub use track::{TrackState, TrackWalker};
