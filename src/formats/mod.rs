//! Concrete format scanners and decoders
//!
//! One module per supported format, each behind a default-on feature flag so
//! consumers can compile only the formats they ship:
//! - `seqp`: PlayStation SEQ ("pQES"), a big-endian SMF-style stream
//! - `sseq`: Nintendo DS SSEQ, a little-endian multi-track opcode stream

#[cfg(feature = "seqp")]
pub mod seqp;
#[cfg(feature = "sseq")]
pub mod sseq;
