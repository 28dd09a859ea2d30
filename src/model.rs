//! Defines the core data structures used by the playback client.
//!
//! This includes models for channels, slides and the screen descriptor.
//! These structs are deserialized from backend push payloads; the derived
//! `is_scheduled` fields are recomputed locally on every scheduling pass and
//! never come from the wire.

use serde::Deserialize;

/// The media type of a slide, selecting the player adapter that drives it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    Video,
    Rss,
    /// Legacy slides without a declared type, and unknown tags. Played with
    /// the static-duration adapter.
    Other,
}

impl Default for MediaType {
    fn default() -> Self {
        MediaType::Other
    }
}

impl<'de> serde::Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Legacy payloads may send null instead of omitting the field.
        let tag = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match tag.to_lowercase().as_str() {
            "image" | "picture" => MediaType::Image,
            "video" => MediaType::Video,
            "rss" => MediaType::Rss,
            _ => MediaType::Other,
        })
    }
}

/// One media asset reference on a slide. Image slides carry `image`; video
/// slides carry one path per container format.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct MediaAsset {
    pub image: Option<String>,
    pub mp4: Option<String>,
    pub ogv: Option<String>,
    pub webm: Option<String>,
}

/// Free-form per-type slide configuration.
///
/// Only the keys the player adapters consume are modeled; the backend may
/// send more (theming, layout) which the rendering collaborator interprets.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct SlideOptions {
    pub fontsize: Option<f32>,
    pub responsive_fontsize: Option<f32>,
    /// Source URL for image/legacy slides (cache-busted on refresh).
    pub source: Option<String>,
    /// Feed URL for RSS slides.
    pub rss_source: Option<String>,
    /// How many feed entries to show per display of the slide.
    pub rss_number: Option<usize>,
    /// Seconds each feed entry stays on screen.
    pub rss_duration: Option<f32>,
}

/// A single displayable unit within a channel.
#[derive(Deserialize, Clone, Debug)]
pub struct Slide {
    pub id: i64,
    #[serde(default)]
    pub media_type: MediaType,
    /// Display duration in seconds. Required for non-video/non-rss types;
    /// a missing value falls back to [`DEFAULT_SLIDE_DURATION_SECS`].
    pub duration: Option<f32>,
    /// Epoch seconds from which the slide is eligible. Absent or zero means
    /// no lower bound.
    #[serde(default)]
    pub schedule_from: Option<i64>,
    /// Epoch seconds until which the slide is eligible. Absent or zero means
    /// no upper bound.
    #[serde(default)]
    pub schedule_to: Option<i64>,
    #[serde(default)]
    pub media: Vec<MediaAsset>,
    #[serde(default)]
    pub options: SlideOptions,
    /// Derived eligibility, recomputed by the schedule evaluator each pass.
    #[serde(skip)]
    pub is_scheduled: bool,
}

/// Fallback display duration in seconds for slides without one.
pub const DEFAULT_SLIDE_DURATION_SECS: f32 = 5.0;

/// A weekday reference in a channel's repeat schedule.
/// `id` is numbered the way the backend numbers days: Sunday = 0.
/// The payload also carries a display name, which the scheduler ignores.
#[derive(Deserialize, Clone, Debug)]
pub struct ScheduleDay {
    pub id: u32,
}

/// A named, schedulable group of ordered slides.
#[derive(Deserialize, Clone, Debug)]
pub struct Channel {
    pub id: i64,
    #[serde(default)]
    pub slides: Vec<Slide>,
    /// Epoch seconds publish window. Absent means unbounded on that side.
    #[serde(default)]
    pub publish_from: Option<i64>,
    #[serde(default)]
    pub publish_to: Option<i64>,
    /// When false, the repeat fields below are ignored entirely and the
    /// channel is shown whenever it is published.
    #[serde(default)]
    pub schedule_repeat: bool,
    /// Hour of day (0-23) from which the channel repeats.
    #[serde(default)]
    pub schedule_repeat_from: Option<u32>,
    /// Hour of day (0-23, exclusive) until which the channel repeats.
    #[serde(default)]
    pub schedule_repeat_to: Option<u32>,
    #[serde(default)]
    pub schedule_repeat_days: Vec<ScheduleDay>,
    /// Derived eligibility (published AND repeat-scheduled), recomputed by
    /// the schedule evaluator each pass.
    #[serde(skip)]
    pub is_scheduled: bool,
}

impl Channel {
    /// The buffer key used for this channel in a region's channel maps.
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Screen template reference delivered with the `ready` event.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ScreenTemplate {
    pub path_live: Option<String>,
}

/// Screen descriptor delivered with the `ready` event.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Screen {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub template: Option<ScreenTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_payload_deserializes() {
        let payload = r#"{
            "id": 7,
            "publish_from": 1400000000,
            "publish_to": null,
            "schedule_repeat": true,
            "schedule_repeat_from": 9,
            "schedule_repeat_to": 17,
            "schedule_repeat_days": [{"id": 1, "name": "Monday"}],
            "slides": [
                {
                    "id": 42,
                    "media_type": "image",
                    "duration": 15,
                    "schedule_from": null,
                    "schedule_to": 0,
                    "media": [{"image": "/media/foo.png"}],
                    "options": {"fontsize": 24, "source": "/media/foo.png"}
                },
                {
                    "id": 43,
                    "media_type": "rss",
                    "options": {"rss_source": "http://example.com/feed", "rss_number": 4, "rss_duration": 8}
                }
            ]
        }"#;

        let channel: Channel = serde_json::from_str(payload).expect("channel should parse");
        assert_eq!(channel.id, 7);
        assert_eq!(channel.key(), "7");
        assert_eq!(channel.slides.len(), 2);
        assert_eq!(channel.slides[0].media_type, MediaType::Image);
        assert_eq!(channel.slides[0].schedule_to, Some(0));
        assert_eq!(channel.slides[1].media_type, MediaType::Rss);
        assert_eq!(channel.slides[1].options.rss_number, Some(4));
        assert_eq!(channel.schedule_repeat_days[0].id, 1);
        assert!(!channel.is_scheduled);
    }

    #[test]
    fn unknown_media_type_falls_back_to_other() {
        let slide: Slide =
            serde_json::from_str(r#"{"id": 1, "media_type": "webpage"}"#).expect("slide parses");
        assert_eq!(slide.media_type, MediaType::Other);

        let untyped: Slide = serde_json::from_str(r#"{"id": 2}"#).expect("slide parses");
        assert_eq!(untyped.media_type, MediaType::Other);
    }
}
