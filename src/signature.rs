//! Binary signature matching
//!
//! Formats are identified by fixed magic byte patterns ("pQES", "SSEQ", ...).
//! Scanners use these helpers both to test a single candidate offset and to
//! sweep a whole dump for every occurrence of their signature. The sweep is a
//! plain deterministic linear search; multiple hits are legal since rips often
//! contain several concatenated assets.

use crate::source::ByteSource;

/// Whether `signature` occurs at exactly `offset` in `source`
pub fn matches_at(source: &dyn ByteSource, offset: usize, signature: &[u8]) -> bool {
    debug_assert!(!signature.is_empty(), "empty signatures match everywhere");
    match source.slice(offset, signature.len()) {
        Ok(bytes) => bytes == signature,
        Err(_) => false,
    }
}

/// All offsets in `source`, in ascending order, where `signature` occurs
///
/// Overlapping occurrences are all reported; callers validate each hit
/// independently so a false positive at one offset never shadows a real
/// sequence at the next.
pub fn find_all(source: &dyn ByteSource, signature: &[u8]) -> Vec<usize> {
    debug_assert!(!signature.is_empty(), "empty signatures match everywhere");
    let mut hits = Vec::new();
    if signature.len() > source.len() {
        return hits;
    }
    for offset in 0..=source.len() - signature.len() {
        if matches_at(source, offset, signature) {
            hits.push(offset);
        }
    }
    hits
}
