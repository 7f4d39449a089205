//! Format registry and decode entry point
//!
//! The registry maps file extensions to scanners and resolves which scanners
//! to try for a given source: extension-hinted scanners first, in
//! registration order, then every remaining scanner for the full signature
//! sweep. Selection has no side effects; an empty candidate or result list
//! is a normal negative, not an error.

use std::collections::HashMap;

use log::debug;

use crate::scanner::{DecodedSequence, FormatScanner};
use crate::source::ByteSource;

/// Ordered collection of registered format scanners
#[derive(Default)]
pub struct FormatRegistry {
    scanners: Vec<Box<dyn FormatScanner>>,
    by_extension: HashMap<String, Vec<usize>>,
}

impl FormatRegistry {
    /// An empty registry with no formats
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with every feature-enabled built-in format
    pub fn with_builtin_formats() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "seqp")]
        registry.register(Some("seq"), Box::new(crate::formats::seqp::SeqpScanner));
        #[cfg(feature = "sseq")]
        registry.register(Some("sseq"), Box::new(crate::formats::sseq::SseqScanner));
        registry
    }

    /// Register a scanner, optionally hinted by a file extension
    ///
    /// Extension matching is case-insensitive and ignores a leading dot.
    /// Scanners registered without an extension participate only in the
    /// signature sweep.
    pub fn register(&mut self, extension: Option<&str>, scanner: Box<dyn FormatScanner>) {
        assert!(
            !scanner.name().is_empty(),
            "scanner must carry a format identifier"
        );
        let index = self.scanners.len();
        self.scanners.push(scanner);
        if let Some(extension) = extension {
            self.by_extension
                .entry(normalize_extension(extension))
                .or_default()
                .push(index);
        }
    }

    /// Number of registered scanners
    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    /// Whether no scanners are registered
    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    /// Scanners to try for a source with the given extension hint, in order
    pub fn candidates_for(&self, extension: Option<&str>) -> Vec<&dyn FormatScanner> {
        let hinted: &[usize] = extension
            .map(normalize_extension)
            .and_then(|ext| self.by_extension.get(&ext).map(Vec::as_slice))
            .unwrap_or(&[]);
        let mut order: Vec<usize> = hinted.to_vec();
        for index in 0..self.scanners.len() {
            if !hinted.contains(&index) {
                order.push(index);
            }
        }
        order
            .into_iter()
            .map(|index| self.scanners[index].as_ref())
            .collect()
    }

    /// Scan and decode every recognizable sequence in `source`
    ///
    /// Deterministic for a given source and registration set; returns an
    /// empty list when nothing matches and never fails on malformed input.
    pub fn decode(&self, source: &dyn ByteSource) -> Vec<DecodedSequence> {
        self.decode_with_extension(source, None)
    }

    /// Like [`decode`](Self::decode), trying extension-hinted scanners first
    pub fn decode_with_extension(
        &self,
        source: &dyn ByteSource,
        extension: Option<&str>,
    ) -> Vec<DecodedSequence> {
        let mut sequences = Vec::new();
        let mut claimed_offsets = Vec::new();
        for scanner in self.candidates_for(extension) {
            for header in scanner.scan(source) {
                // First validated match wins per offset
                if claimed_offsets.contains(&header.base_offset) {
                    debug!(
                        "{} match at {:#x} shadowed by earlier scanner",
                        scanner.name(),
                        header.base_offset
                    );
                    continue;
                }
                debug!(
                    "{} match at {:#x}: {} track(s), ppqn {}",
                    scanner.name(),
                    header.base_offset,
                    header.track_count(),
                    header.ppqn
                );
                claimed_offsets.push(header.base_offset);
                let tracks = (0..header.track_count())
                    .map(|track| scanner.decode_track(source, &header, track))
                    .collect();
                sequences.push(DecodedSequence { header, tracks });
            }
        }
        sequences
    }
}

/// Scan and decode with the default built-in format set
///
/// Convenience entry point over [`FormatRegistry::with_builtin_formats`].
pub fn decode(source: &dyn ByteSource) -> Vec<DecodedSequence> {
    FormatRegistry::with_builtin_formats().decode(source)
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}
