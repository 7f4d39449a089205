//! Per-track decoded timelines
//!
//! A [`Timeline`] is the finished product of one track decode: an ordered,
//! finite, tick-stamped event list plus the anomaly flags raised while
//! producing it. Mutation is crate-private; once a decoder hands a timeline
//! to the caller it only ever reads.

use bitflags::bitflags;

use crate::event::{Event, EventKind};

bitflags! {
    /// Anomalies observed while decoding a track
    ///
    /// These never escalate to errors: a flagged timeline still carries every
    /// event decoded before the anomaly was hit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DecodeFlags: u8 {
        /// A read ran past the track region or the source itself
        const TRUNCATED = 1 << 0;
        /// A jump was revisited without forward progress
        const CYCLE_DETECTED = 1 << 1;
        /// The hard per-track event ceiling was reached
        const BUDGET_EXCEEDED = 1 << 2;
        /// The track ends in an unbounded song loop
        const LOOPED = 1 << 3;
    }
}

/// Where an unbounded song loop restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPoint {
    /// Absolute tick at which playback wraps back to `offset`
    pub tick: u64,
    /// Absolute byte offset of the loop target
    pub offset: usize,
}

/// Ordered, tick-stamped event list for one track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    events: Vec<Event>,
    flags: DecodeFlags,
    loop_point: Option<LoopPoint>,
}

impl Timeline {
    /// The decoded events, in non-decreasing tick order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of decoded events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events were decoded
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Anomaly flags raised during decoding
    pub fn flags(&self) -> DecodeFlags {
        self.flags
    }

    /// Song-loop restart position, if the track loops
    pub fn loop_point(&self) -> Option<LoopPoint> {
        self.loop_point
    }

    /// Tick of the final event, or 0 for an empty timeline
    pub fn end_tick(&self) -> u64 {
        self.events.last().map_or(0, |event| event.tick)
    }

    pub(crate) fn push(&mut self, event: Event) {
        debug_assert!(
            self.events.last().map_or(true, |last| last.tick <= event.tick),
            "timeline ticks must be non-decreasing"
        );
        self.events.push(event);
    }

    pub(crate) fn raise(&mut self, flags: DecodeFlags) {
        self.flags |= flags;
    }

    pub(crate) fn set_loop_point(&mut self, loop_point: LoopPoint) {
        self.loop_point = Some(loop_point);
    }

    /// Patch the gate duration of a previously pushed `Note` event.
    ///
    /// Formats that encode duration as a note-off pair (rather than inline)
    /// push the note at its start tick and resolve the duration later; this
    /// keeps the tick-order invariant intact.
    pub(crate) fn patch_note_duration(&mut self, index: usize, new_duration: u32) {
        if let Some(Event {
            kind: EventKind::Note { duration, .. },
            ..
        }) = self.events.get_mut(index)
        {
            *duration = new_duration;
        }
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(tick: u64, key: u8) -> Event {
        Event {
            tick,
            offset: 0,
            kind: EventKind::Note {
                key,
                velocity: 100,
                duration: 0,
            },
        }
    }

    #[test]
    fn test_push_and_iterate() {
        let mut timeline = Timeline::default();
        timeline.push(note(0, 60));
        timeline.push(note(48, 62));
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.end_tick(), 48);
        let keys: Vec<u8> = timeline
            .into_iter()
            .map(|e| match e.kind {
                EventKind::Note { key, .. } => key,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![60, 62]);
    }

    #[test]
    fn test_patch_note_duration() {
        let mut timeline = Timeline::default();
        timeline.push(note(0, 60));
        timeline.patch_note_duration(0, 96);
        assert_eq!(
            timeline.events()[0].kind,
            EventKind::Note {
                key: 60,
                velocity: 100,
                duration: 96
            }
        );
    }

    #[test]
    fn test_flags_accumulate() {
        let mut timeline = Timeline::default();
        timeline.raise(DecodeFlags::TRUNCATED);
        timeline.raise(DecodeFlags::LOOPED);
        assert!(timeline.flags().contains(DecodeFlags::TRUNCATED));
        assert!(timeline.flags().contains(DecodeFlags::LOOPED));
        assert!(!timeline.flags().contains(DecodeFlags::CYCLE_DETECTED));
    }
}
