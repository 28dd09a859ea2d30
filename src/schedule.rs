//! The schedule evaluator: pure eligibility rules for channels and slides.
//!
//! Every function here is a pure function of an entity and a supplied `now`;
//! nothing samples the clock or performs I/O. The only mutation in the module
//! is `update_scheduling`, which writes the derived `is_scheduled` fields
//! across a buffer slot so the playback cursor can skip ineligible entries
//! without re-deriving them on every step.

use chrono::{DateTime, Datelike, Local, Timelike};

use super::buffer::ChannelSlot;
use super::model::{Channel, Slide};

/// Is the slide's time window open at `now` (epoch seconds)?
///
/// A `schedule_from`/`schedule_to` that is absent *or zero* counts as unset,
/// matching how the backend serializes "no bound".
pub fn slide_eligible(slide: &Slide, now: i64) -> bool {
    let from = slide.schedule_from.filter(|&v| v != 0);
    let to = slide.schedule_to.filter(|&v| v != 0);

    match (from, to) {
        (Some(from), None) => from < now,
        (Some(from), Some(to)) => from < to && from < now && to > now,
        (None, Some(to)) => to > now,
        (None, None) => true,
    }
}

/// Is the channel inside its publish window at `now` (epoch seconds)?
pub fn channel_published(channel: &Channel, now: i64) -> bool {
    match (channel.publish_from, channel.publish_to) {
        (None, None) => true,
        (Some(from), to) if now > from => to.map_or(true, |to| now < to),
        (None, Some(to)) => now < to,
        _ => false,
    }
}

/// Is the channel's recurring weekly/daily window open at `now`?
///
/// A channel with `schedule_repeat = false` ignores the repeat fields and is
/// always eligible here. When repeat is on, the channel shows only on listed
/// weekdays within `[schedule_repeat_from, schedule_repeat_to)` hours. A
/// window with `from > to` (crossing midnight) evaluates to not eligible —
/// preserved compatibility behavior, see DESIGN.md.
pub fn channel_repeat_scheduled(channel: &Channel, now: &DateTime<Local>) -> bool {
    if !channel.schedule_repeat {
        return true;
    }

    let hour_from = channel.schedule_repeat_from;
    let hour_to = channel.schedule_repeat_to;
    let days = &channel.schedule_repeat_days;

    if hour_from.is_none() && hour_to.is_none() && days.is_empty() {
        return true;
    }

    // Weekday ids arrive numbered with Sunday = 0.
    let now_day = now.weekday().num_days_from_sunday();
    let now_hour = now.hour();

    if !days.iter().any(|day| day.id == now_day) {
        return false;
    }

    let hour_from = hour_from.unwrap_or(0);
    let hour_to = hour_to.unwrap_or(0);
    if hour_from > hour_to {
        return false;
    }
    now_hour >= hour_from && now_hour < hour_to
}

/// Combined channel eligibility: published AND repeat-scheduled.
pub fn channel_scheduled(channel: &Channel, now: &DateTime<Local>) -> bool {
    channel_published(channel, now.timestamp()) && channel_repeat_scheduled(channel, now)
}

/// Re-evaluates every channel and slide in a buffer slot, writing the
/// derived `is_scheduled` fields.
///
/// Runs at every rotation restart and whenever fresh content becomes live,
/// so entries scheduled for later are reconsidered each cycle.
pub fn update_scheduling(slot: &mut ChannelSlot, now: &DateTime<Local>) {
    let epoch = now.timestamp();
    for channel in slot.channels_mut() {
        channel.is_scheduled = channel_scheduled(channel, now);
        for slide in &mut channel.slides {
            slide.is_scheduled = slide_eligible(slide, epoch);
        }
    }
}
