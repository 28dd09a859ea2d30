//! The playback state machine: decides which channel and slide should be on
//! screen next.
//!
//! The machine is a synchronous step engine over the content buffer. Each of
//! `advance_slide` / `advance_channel` / `restart_cycle` moves the cursor and
//! returns a [`Step`] describing the next suspension; the region controller
//! owns the single pending wait and feeds completions back in. Keeping the
//! cursor logic free of timers makes every scheduling property testable
//! without a clock.

use chrono::{DateTime, Local};
use log::{debug, info};
use std::time::Duration;

use super::buffer::{ChannelSlot, ContentBuffer};
use super::model::Slide;
use super::schedule;

/// Timing knobs for the rotation. Defaults match production behavior; tests
/// shrink them.
#[derive(Clone, Copy, Debug)]
pub struct PlaybackTiming {
    /// Cold-start delay before the first advance, letting slide templates
    /// finish loading.
    pub settle: Duration,
    /// Backoff when nothing is schedulable anywhere.
    pub retry: Duration,
    /// Pacing delay when skipping past an unscheduled channel.
    pub skip: Duration,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1000),
            retry: Duration::from_secs(5),
            skip: Duration::from_millis(100),
        }
    }
}

/// The next suspension the driver should arm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Display this slide now; advance the slide cursor when its player
    /// completes.
    Show { channel_id: String, slide_index: usize },
    /// Wait briefly, then advance the channel cursor again (unscheduled
    /// channel in the rotation).
    SkipChannel(Duration),
    /// Nothing to show anywhere; wait, then restart the cycle.
    Retry(Duration),
}

/// Cursor state and rotation logic for one region.
#[derive(Debug)]
pub struct PlaybackMachine {
    pub buffer: ContentBuffer,
    pub timing: PlaybackTiming,
    /// Index into the live slot's key order; -1 before the first channel.
    channel_cursor: isize,
    /// Index into the current channel's slides; -1 before the first slide.
    slide_cursor: isize,
    /// Scheduled-slide count from the last cycle restart (progress box total).
    scheduled_total: usize,
    /// How many slides have been shown this cycle (progress box index).
    shown_index: usize,
    /// Set whenever a cycle restart recomputed the scheduled count, until
    /// the region broadcasts it.
    pending_info: Option<usize>,
}

impl PlaybackMachine {
    pub fn new(timing: PlaybackTiming) -> Self {
        Self {
            buffer: ContentBuffer::new(),
            timing,
            channel_cursor: -1,
            slide_cursor: -1,
            scheduled_total: 0,
            shown_index: 0,
            pending_info: None,
        }
    }

    /// Restarts the rotation from the first channel.
    ///
    /// This is the only point where staged content may become live. The
    /// evaluator then re-runs over the (possibly new) live slot, the
    /// progress totals are recomputed, and either the first channel is
    /// advanced to or — with nothing schedulable anywhere — a retry is
    /// armed so the machine stays in the restart state without spinning.
    pub fn restart_cycle(&mut self, now: DateTime<Local>) -> Step {
        info!("Restarting rotation");
        self.channel_cursor = -1;
        self.slide_cursor = -1;

        if self.buffer.slides_updated() {
            self.buffer.swap();
        }
        schedule::update_scheduling(self.buffer.live_mut(), &now);

        self.scheduled_total = count_scheduled(self.buffer.live());
        self.shown_index = 0;
        self.pending_info = Some(self.scheduled_total);

        if !slides_remain(self.buffer.live()) {
            debug!("No slide schedulable anywhere; retrying in {:?}", self.timing.retry);
            Step::Retry(self.timing.retry)
        } else {
            self.advance_channel(now)
        }
    }

    /// Moves to the next channel in key order, restarting the cycle when the
    /// key order is exhausted. Unscheduled channels are skipped after a
    /// short pacing delay.
    pub fn advance_channel(&mut self, now: DateTime<Local>) -> Step {
        self.channel_cursor += 1;
        let cursor = self.channel_cursor as usize;
        if cursor >= self.buffer.live().len() {
            return self.restart_cycle(now);
        }

        let scheduled =
            self.buffer.live().by_index(cursor).map(|c| c.is_scheduled).unwrap_or(false);
        if scheduled {
            debug!("Advancing to channel at position {}", cursor);
            self.slide_cursor = -1;
            self.advance_slide(now)
        } else {
            Step::SkipChannel(self.timing.skip)
        }
    }

    /// Moves to the next slide of the current channel.
    ///
    /// Unscheduled slides are passed over with no wall-clock delay while any
    /// slide anywhere remains schedulable this pass (bounded by the total
    /// slide count); when nothing remains, a retry is armed instead of
    /// busy-looping.
    pub fn advance_slide(&mut self, now: DateTime<Local>) -> Step {
        loop {
            if self.channel_cursor < 0 {
                return self.advance_channel(now);
            }
            self.slide_cursor += 1;

            let Some(channel) = self.buffer.live().by_index(self.channel_cursor as usize) else {
                // The live key order shrank at the last swap and the cursor
                // ran past it; treat as end of pass.
                return self.advance_channel(now);
            };

            let index = self.slide_cursor as usize;
            if index >= channel.slides.len() {
                return self.advance_channel(now);
            }

            if channel.slides[index].is_scheduled {
                return Step::Show { channel_id: channel.key(), slide_index: index };
            }

            if !slides_remain(self.buffer.live()) {
                debug!("Slide schedule exhausted mid-pass; retrying in {:?}", self.timing.retry);
                return Step::Retry(self.timing.retry);
            }
        }
    }

    /// The slide the cursor currently points at, if it still exists.
    pub fn current_slide(&self) -> Option<&Slide> {
        let channel_index = usize::try_from(self.channel_cursor).ok()?;
        let slide_index = usize::try_from(self.slide_cursor).ok()?;
        self.buffer.live().by_index(channel_index)?.slides.get(slide_index)
    }

    /// Bumps the progress-box index for a slide about to display and returns
    /// `(position, total)`.
    pub fn note_shown(&mut self) -> (usize, usize) {
        self.shown_index += 1;
        (self.shown_index, self.scheduled_total)
    }

    /// The scheduled-slide count recomputed by the last cycle restart, if it
    /// has not been broadcast yet.
    pub fn take_info(&mut self) -> Option<usize> {
        self.pending_info.take()
    }

    /// Drops all content and cursor state (backend-initiated reload).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.channel_cursor = -1;
        self.slide_cursor = -1;
        self.scheduled_total = 0;
        self.shown_index = 0;
        self.pending_info = None;
    }
}

/// Is any slide of any scheduled channel schedulable right now?
fn slides_remain(slot: &ChannelSlot) -> bool {
    slot.channels()
        .filter(|channel| channel.is_scheduled)
        .any(|channel| channel.slides.iter().any(|slide| slide.is_scheduled))
}

/// Total scheduled slides across scheduled channels (progress box total).
fn count_scheduled(slot: &ChannelSlot) -> usize {
    slot.channels()
        .filter(|channel| channel.is_scheduled)
        .map(|channel| channel.slides.iter().filter(|slide| slide.is_scheduled).count())
        .sum()
}
