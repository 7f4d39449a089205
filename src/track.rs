//! Track decoding state machine
//!
//! [`TrackWalker`] is the shared core of every format decoder: it owns the
//! read cursor, the absolute tick accumulator, the loop/call stacks and the
//! cycle-detection bookkeeping for one track, and enforces the termination
//! guarantees that make decoding safe on malformed or adversarial input:
//!
//! - every fetch is bounds-checked against the track region and the source;
//!   a read past either ends the track with [`DecodeFlags::TRUNCATED`]
//! - every backward redirect is checked against a visited map keyed by
//!   (target offset, loop/call iteration state); revisiting a key without
//!   tick or event progress ends the track with
//!   [`DecodeFlags::CYCLE_DETECTED`]
//! - hard ceilings on fetches and emitted events end the track with
//!   [`DecodeFlags::BUDGET_EXCEEDED`] even when aliasing offsets fool the
//!   cycle detector
//!
//! Format decoders drive the walker in a fetch/decode/emit loop and never
//! touch the source directly, so the guarantees hold uniformly across
//! formats. All state is private to one decode pass; nothing is shared.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use log::trace;

use crate::event::{Event, EventKind};
use crate::scanner::TrackRange;
use crate::source::{ByteSource, Endian};
use crate::timeline::{DecodeFlags, LoopPoint, Timeline};

/// Decoder state for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Cursor at track entry, nothing fetched yet
    Ready,
    /// Normal forward walk
    Decoding,
    /// Cursor was redirected backward by a song-loop jump
    InLoop,
    /// Terminal; the timeline is complete
    Done,
}

/// Maximum nesting depth for finite loops and subroutine calls
pub const MAX_LOOP_DEPTH: usize = 8;

/// Hard ceiling on emitted events per track
pub const MAX_TRACK_EVENTS: usize = 20_000;

/// Hard ceiling on byte fetches per track, independent of cycle detection
pub const MAX_TRACK_STEPS: usize = 1_000_000;

#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    /// First byte of the loop body
    start: usize,
    /// Iterations left; `None` for an unbounded loop opcode
    remaining: Option<u32>,
}

/// Per-track decoding state machine
pub struct TrackWalker<'a> {
    source: &'a dyn ByteSource,
    begin: usize,
    end: usize,
    cursor: usize,
    tick: u64,
    state: TrackState,
    timeline: Timeline,
    loop_stack: Vec<LoopFrame>,
    call_stack: Vec<usize>,
    /// (offset, loop/call state) -> (tick, event count) at last visit
    visited: HashMap<(usize, u64), (u64, usize)>,
    song_loop_taken: bool,
    steps: usize,
}

impl<'a> TrackWalker<'a> {
    /// Create a walker positioned at the track's entry offset
    pub fn new(source: &'a dyn ByteSource, range: &TrackRange) -> Self {
        debug_assert!(range.begin <= range.entry && range.entry < range.end);
        Self {
            source,
            begin: range.begin,
            end: range.end,
            cursor: range.entry,
            tick: 0,
            state: TrackState::Ready,
            timeline: Timeline::default(),
            loop_stack: Vec::new(),
            call_stack: Vec::new(),
            visited: HashMap::new(),
            song_loop_taken: false,
            steps: 0,
        }
    }

    /// Current decoder state
    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Whether the walker still accepts fetches
    pub fn is_running(&self) -> bool {
        self.state != TrackState::Done
    }

    /// Absolute cursor offset
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Absolute tick accumulator
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance the tick accumulator by a decoded delta
    pub fn advance_ticks(&mut self, delta: u32) {
        self.tick += u64::from(delta);
    }

    /// Fetch the next opcode, returning its offset alongside the byte
    pub fn fetch_op(&mut self) -> Option<(usize, u8)> {
        let offset = self.cursor;
        let op = self.fetch_u8()?;
        Some((offset, op))
    }

    /// Fetch one byte at the cursor and advance past it
    ///
    /// Reaching the declared track end is a clean implicit end-of-track;
    /// running past it (or past the source) raises `TRUNCATED`.
    pub fn fetch_u8(&mut self) -> Option<u8> {
        if self.state == TrackState::Done {
            return None;
        }
        if self.state == TrackState::Ready {
            self.state = TrackState::Decoding;
        }
        self.steps += 1;
        if self.steps > MAX_TRACK_STEPS {
            self.finish(DecodeFlags::BUDGET_EXCEEDED);
            return None;
        }
        if self.cursor >= self.end {
            let flags = if self.cursor == self.end {
                DecodeFlags::empty()
            } else {
                DecodeFlags::TRUNCATED
            };
            self.finish(flags);
            return None;
        }
        match self.source.read_u8(self.cursor) {
            Ok(byte) => {
                self.cursor += 1;
                Some(byte)
            }
            Err(_) => {
                self.finish(DecodeFlags::TRUNCATED);
                None
            }
        }
    }

    /// Fetch a 16-bit operand
    pub fn fetch_u16(&mut self, endian: Endian) -> Option<u16> {
        let lo = self.fetch_u8()?;
        let hi = self.fetch_u8()?;
        Some(match endian {
            Endian::Little => u16::from_le_bytes([lo, hi]),
            Endian::Big => u16::from_be_bytes([lo, hi]),
        })
    }

    /// Fetch a 24-bit operand, zero-extended
    pub fn fetch_u24(&mut self, endian: Endian) -> Option<u32> {
        let a = u32::from(self.fetch_u8()?);
        let b = u32::from(self.fetch_u8()?);
        let c = u32::from(self.fetch_u8()?);
        Some(match endian {
            Endian::Little => a | b << 8 | c << 16,
            Endian::Big => a << 16 | b << 8 | c,
        })
    }

    /// Fetch a MIDI-style variable-length quantity (at most 4 bytes)
    pub fn fetch_vlq(&mut self) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = self.fetch_u8()?;
            value = value << 7 | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        // Fifth continuation byte cannot occur in well-formed data
        self.finish(DecodeFlags::TRUNCATED);
        None
    }

    /// Consume and discard `n` operand bytes
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            if self.fetch_u8().is_none() {
                return;
            }
        }
    }

    /// Append an event at the current tick; returns its index for patching
    pub fn emit(&mut self, offset: usize, kind: EventKind) -> usize {
        let index = self.timeline.len();
        if self.state == TrackState::Done {
            return index;
        }
        if index >= MAX_TRACK_EVENTS {
            self.finish(DecodeFlags::BUDGET_EXCEEDED);
            return index;
        }
        self.timeline.push(Event {
            tick: self.tick,
            offset,
            kind,
        });
        index
    }

    /// Resolve a previously emitted note's gate duration
    pub fn patch_note_duration(&mut self, index: usize, duration: u32) {
        self.timeline.patch_note_duration(index, duration);
    }

    /// Open a loop region at the cursor; `count` is the total number of
    /// passes over the body, with 0 meaning unbounded
    pub fn loop_begin(&mut self, count: u32) {
        if self.loop_stack.len() >= MAX_LOOP_DEPTH {
            self.finish(DecodeFlags::TRUNCATED);
            return;
        }
        self.loop_stack.push(LoopFrame {
            start: self.cursor,
            remaining: if count == 0 { None } else { Some(count) },
        });
    }

    /// Close the innermost loop region, redirecting backward while iterations remain
    pub fn loop_end(&mut self) {
        let Some(frame) = self.loop_stack.last_mut() else {
            // Loop end without a matching begin: ignore, stay in stream sync
            return;
        };
        let start = frame.start;
        match &mut frame.remaining {
            Some(1) => {
                self.loop_stack.pop();
            }
            Some(n) => {
                *n -= 1;
                self.redirect(start);
            }
            None => {
                // Unbounded body: same song-loop semantics as a backward jump
                self.loop_stack.pop();
                self.jump_song_loop(start);
            }
        }
    }

    /// Take an unconditional jump with song-loop semantics
    ///
    /// The jump is followed exactly once so the looped region's events land
    /// on the timeline; arriving at the jump a second time ends the track
    /// with the target recorded as the loop point.
    pub fn jump_song_loop(&mut self, target: usize) {
        if self.state == TrackState::Done {
            return;
        }
        if !self.check_target(target) {
            return;
        }
        if self.check_cycle(target) {
            return;
        }
        if self.song_loop_taken {
            self.finish(DecodeFlags::LOOPED);
            return;
        }
        self.song_loop_taken = true;
        self.timeline.set_loop_point(LoopPoint {
            tick: self.tick,
            offset: target,
        });
        if target < self.cursor {
            self.state = TrackState::InLoop;
        }
        trace!("song loop -> {target:#x} at tick {}", self.tick);
        self.cursor = target;
    }

    /// Redirect the cursor for a finite-loop iteration or an in-range goto
    pub fn redirect(&mut self, target: usize) {
        if self.state == TrackState::Done {
            return;
        }
        if !self.check_target(target) {
            return;
        }
        if self.check_cycle(target) {
            return;
        }
        self.cursor = target;
    }

    /// Enter a subroutine, remembering where to return
    pub fn call(&mut self, target: usize) {
        if self.call_stack.len() >= MAX_LOOP_DEPTH {
            self.finish(DecodeFlags::TRUNCATED);
            return;
        }
        let return_to = self.cursor;
        self.call_stack.push(return_to);
        self.redirect(target);
    }

    /// Return from the innermost subroutine
    pub fn ret(&mut self) {
        match self.call_stack.pop() {
            Some(return_to) => self.redirect(return_to),
            // Return outside any call: malformed stream
            None => self.finish(DecodeFlags::TRUNCATED),
        }
    }

    /// Force the terminal state, raising `flags` and closing the timeline
    pub fn finish(&mut self, flags: DecodeFlags) {
        if self.state == TrackState::Done {
            return;
        }
        self.state = TrackState::Done;
        self.timeline.raise(flags);
        // A track that followed a song loop ends looped however it got here,
        // unless termination was forced by the cycle detector
        if self.song_loop_taken && !flags.contains(DecodeFlags::CYCLE_DETECTED) {
            self.timeline.raise(DecodeFlags::LOOPED);
        }
        let offset = self.cursor.min(self.end);
        self.timeline.push(Event {
            tick: self.tick,
            offset,
            kind: EventKind::EndOfTrack,
        });
    }

    /// Consume the walker, yielding the finished timeline
    ///
    /// A walker that never reached `Done` (caller bailed out of its decode
    /// loop early) is closed cleanly first.
    pub fn into_timeline(mut self) -> Timeline {
        if self.state != TrackState::Done {
            self.finish(DecodeFlags::empty());
        }
        self.timeline
    }

    /// Validate a redirect target against the track's legal region
    fn check_target(&mut self, target: usize) -> bool {
        if target < self.begin || target >= self.end {
            trace!("redirect target {target:#x} outside track region, truncating");
            self.finish(DecodeFlags::TRUNCATED);
            return false;
        }
        true
    }

    /// Record a redirect in the visited map; true if it closed a cycle
    fn check_cycle(&mut self, target: usize) -> bool {
        let key = (target, self.iteration_key());
        let progress = (self.tick, self.timeline.len());
        match self.visited.insert(key, progress) {
            Some(previous) if previous == progress => {
                trace!("redirect to {target:#x} made no progress, cycle detected");
                self.finish(DecodeFlags::CYCLE_DETECTED);
                true
            }
            _ => false,
        }
    }

    /// Fold the loop/call iteration state into a visited-map key
    fn iteration_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for frame in &self.loop_stack {
            frame.start.hash(&mut hasher);
            frame.remaining.hash(&mut hasher);
        }
        self.call_stack.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(begin: usize, end: usize) -> TrackRange {
        TrackRange {
            begin,
            end,
            entry: begin,
        }
    }

    #[test]
    fn test_ready_to_decoding_on_first_fetch() {
        let data: &[u8] = &[0x01, 0x02];
        let mut walker = TrackWalker::new(&data, &range(0, 2));
        assert_eq!(walker.state(), TrackState::Ready);
        assert_eq!(walker.fetch_u8(), Some(0x01));
        assert_eq!(walker.state(), TrackState::Decoding);
    }

    #[test]
    fn test_implicit_end_is_clean() {
        let data: &[u8] = &[0x01];
        let mut walker = TrackWalker::new(&data, &range(0, 1));
        walker.fetch_u8();
        assert_eq!(walker.fetch_u8(), None);
        assert_eq!(walker.state(), TrackState::Done);
        let timeline = walker.into_timeline();
        assert_eq!(timeline.flags(), DecodeFlags::empty());
        assert!(timeline.events().last().unwrap().is_end_of_track());
    }

    #[test]
    fn test_region_past_source_truncates() {
        let data: &[u8] = &[0x01, 0x02];
        // Declared region larger than the source: a truncated dump
        let mut walker = TrackWalker::new(&data, &range(0, 8));
        walker.fetch_u8();
        walker.fetch_u8();
        assert_eq!(walker.fetch_u16(Endian::Little), None);
        let timeline = walker.into_timeline();
        assert!(timeline.flags().contains(DecodeFlags::TRUNCATED));
    }

    #[test]
    fn test_vlq_single_and_multi_byte() {
        let data: &[u8] = &[0x48, 0x81, 0x00, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut walker = TrackWalker::new(&data, &range(0, 7));
        assert_eq!(walker.fetch_vlq(), Some(0x48));
        assert_eq!(walker.fetch_vlq(), Some(0x80));
        assert_eq!(walker.fetch_vlq(), Some(0x0FFF_FFFF));
    }

    #[test]
    fn test_vlq_runaway_truncates() {
        let data: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x80];
        let mut walker = TrackWalker::new(&data, &range(0, 5));
        assert_eq!(walker.fetch_vlq(), None);
        assert!(walker
            .into_timeline()
            .flags()
            .contains(DecodeFlags::TRUNCATED));
    }

    #[test]
    fn test_jump_outside_region_truncates() {
        let data: &[u8] = &[0u8; 16];
        let mut walker = TrackWalker::new(&data, &range(4, 12));
        walker.fetch_u8();
        walker.jump_song_loop(2);
        assert_eq!(walker.state(), TrackState::Done);
        assert!(walker
            .into_timeline()
            .flags()
            .contains(DecodeFlags::TRUNCATED));
    }

    #[test]
    fn test_self_jump_is_cycle_detected() {
        let data: &[u8] = &[0u8; 4];
        let mut walker = TrackWalker::new(&data, &range(0, 4));
        walker.fetch_u8();
        // Same jump taken twice with no tick/event progress in between
        walker.jump_song_loop(0);
        assert!(walker.is_running());
        walker.fetch_u8();
        walker.jump_song_loop(0);
        assert_eq!(walker.state(), TrackState::Done);
        assert!(walker
            .into_timeline()
            .flags()
            .contains(DecodeFlags::CYCLE_DETECTED));
    }

    #[test]
    fn test_song_loop_with_progress_finishes_looped() {
        let data: &[u8] = &[0u8; 8];
        let mut walker = TrackWalker::new(&data, &range(0, 8));
        walker.fetch_u8();
        walker.jump_song_loop(0);
        assert_eq!(walker.state(), TrackState::InLoop);
        // The looped body advances time, so the second take is a real loop
        walker.advance_ticks(96);
        walker.fetch_u8();
        walker.jump_song_loop(0);
        assert_eq!(walker.state(), TrackState::Done);
        let timeline = walker.into_timeline();
        assert!(timeline.flags().contains(DecodeFlags::LOOPED));
        assert_eq!(timeline.loop_point().unwrap().offset, 0);
        assert_eq!(timeline.loop_point().unwrap().tick, 0);
    }

    #[test]
    fn test_finite_loop_iterates_then_falls_through() {
        let data: &[u8] = &[0u8; 8];
        let mut walker = TrackWalker::new(&data, &range(0, 8));
        walker.fetch_u8();
        walker.loop_begin(3);
        let body = walker.cursor();
        for _ in 0..2 {
            walker.fetch_u8();
            walker.advance_ticks(1);
            walker.loop_end();
            assert_eq!(walker.cursor(), body);
            assert!(walker.is_running());
        }
        walker.fetch_u8();
        walker.advance_ticks(1);
        walker.loop_end();
        assert!(walker.is_running());
        assert_eq!(walker.tick(), 3);
    }

    #[test]
    fn test_loop_depth_limit() {
        let data: &[u8] = &[0u8; 4];
        let mut walker = TrackWalker::new(&data, &range(0, 4));
        walker.fetch_u8();
        for _ in 0..MAX_LOOP_DEPTH {
            walker.loop_begin(2);
            assert!(walker.is_running());
        }
        walker.loop_begin(2);
        assert_eq!(walker.state(), TrackState::Done);
        assert!(walker
            .into_timeline()
            .flags()
            .contains(DecodeFlags::TRUNCATED));
    }

    #[test]
    fn test_call_and_return() {
        let data: &[u8] = &[0u8; 16];
        let mut walker = TrackWalker::new(&data, &range(0, 16));
        walker.fetch_u8();
        let after_call = walker.cursor();
        walker.call(8);
        assert_eq!(walker.cursor(), 8);
        walker.fetch_u8();
        walker.ret();
        assert_eq!(walker.cursor(), after_call);
    }

    #[test]
    fn test_return_without_call_truncates() {
        let data: &[u8] = &[0u8; 4];
        let mut walker = TrackWalker::new(&data, &range(0, 4));
        walker.fetch_u8();
        walker.ret();
        assert_eq!(walker.state(), TrackState::Done);
    }

    #[test]
    fn test_event_budget() {
        let data: &[u8] = &[0u8; 4];
        let mut walker = TrackWalker::new(&data, &range(0, 4));
        walker.fetch_u8();
        for _ in 0..=MAX_TRACK_EVENTS {
            walker.emit(
                0,
                EventKind::Controller {
                    controller: 7,
                    value: 100,
                },
            );
        }
        assert_eq!(walker.state(), TrackState::Done);
        let timeline = walker.into_timeline();
        assert!(timeline.flags().contains(DecodeFlags::BUDGET_EXCEEDED));
        assert_eq!(timeline.len(), MAX_TRACK_EVENTS + 1); // + EndOfTrack
    }

    #[test]
    fn test_emitted_events_keep_tick_order() {
        let data: &[u8] = &[0u8; 4];
        let mut walker = TrackWalker::new(&data, &range(0, 4));
        walker.fetch_u8();
        walker.emit(0, EventKind::ProgramChange { program: 5 });
        walker.advance_ticks(10);
        walker.emit(
            1,
            EventKind::Note {
                key: 60,
                velocity: 100,
                duration: 4,
            },
        );
        let timeline = walker.into_timeline();
        let ticks: Vec<u64> = timeline.events().iter().map(|e| e.tick).collect();
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }
}
