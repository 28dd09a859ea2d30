//! Media player adapters: per-media-type strategies that know when a slide
//! is "done".
//!
//! Each adapter's `run` resolves exactly once per slide display — after a
//! duration timer (static slides), a playback ended/error event (video) or a
//! full feed-entry cycle (RSS). The registry maps media-type tags to adapter
//! instances at startup; unknown or missing tags fall back to the static
//! adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::sleep;
use url::Url;

use super::errors::MediaError;
use super::model::{MediaType, Slide, DEFAULT_SLIDE_DURATION_SECS};
use super::render::{SlideRenderer, SurfaceEvent, SurfaceFactory, VideoSurface};

/// Minimum interval between cache-busting refreshes of a slide's source URL.
const MIN_REFRESH_MS: i64 = 30_000;
/// Feed entries shown per display when the slide does not say.
const DEFAULT_RSS_NUMBER: usize = 10;
/// Seconds per feed entry when the slide does not say.
const DEFAULT_RSS_ENTRY_SECS: f32 = 10.0;
/// Fetch attempts for a feed with no usable cache before giving up.
const FEED_RETRY_ATTEMPTS: usize = 2;

/// Timing knobs for the adapters. Defaults match production behavior; tests
/// shrink them to milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct PlayerTiming {
    /// Fade transition padding before and after a slide's visible time.
    pub fade: Duration,
    /// Backoff before retrying a failed feed fetch.
    pub retry: Duration,
    /// Poll interval while waiting for video metadata to expose a duration.
    pub duration_poll: Duration,
    /// Grace period after a video `Ended` event before advancing, letting
    /// any pending display update finish.
    pub ended_debounce: Duration,
}

impl Default for PlayerTiming {
    fn default() -> Self {
        Self {
            fade: Duration::from_millis(1000),
            retry: Duration::from_secs(5),
            duration_poll: Duration::from_millis(500),
            ended_debounce: Duration::from_millis(1000),
        }
    }
}

/// Shared services handed to every adapter invocation.
#[derive(Clone)]
pub struct PlayerContext {
    pub region_id: i64,
    pub show_progress: bool,
    pub renderer: Arc<dyn SlideRenderer>,
    pub surfaces: Arc<dyn SurfaceFactory>,
    pub http: reqwest::Client,
    /// URL probed (HEAD) before video playback; `None` assumes online.
    pub probe_url: Option<String>,
    pub feed_timeout: Duration,
    pub timing: PlayerTiming,
}

impl PlayerContext {
    fn start_progress(&self, duration_secs: f32) {
        if self.show_progress {
            self.renderer.start_progress(self.region_id, duration_secs);
        }
    }
}

/// A per-media-type playback strategy.
#[async_trait]
pub trait SlidePlayer: Send + Sync {
    /// Displays `slide` and resolves when it is done, success or failure.
    /// An error means the slide could not be (fully) shown; the caller logs
    /// it and advances — it never stops the rotation.
    async fn run(&self, slide: &Slide, ctx: &PlayerContext) -> Result<(), MediaError>;
}

/// Maps media-type tags to adapter instances, resolved at startup.
pub struct PlayerRegistry {
    players: HashMap<MediaType, Arc<dyn SlidePlayer>>,
    fallback: Arc<dyn SlidePlayer>,
}

impl PlayerRegistry {
    pub fn new(fallback: Arc<dyn SlidePlayer>) -> Self {
        Self { players: HashMap::new(), fallback }
    }

    /// Registers an adapter for a media type, replacing any previous one.
    pub fn register(&mut self, media_type: MediaType, player: Arc<dyn SlidePlayer>) {
        self.players.insert(media_type, player);
    }

    /// Resolves the adapter for a media type, falling back to the static
    /// adapter for unregistered/legacy types.
    pub fn resolve(&self, media_type: MediaType) -> Arc<dyn SlidePlayer> {
        self.players.get(&media_type).cloned().unwrap_or_else(|| self.fallback.clone())
    }

    /// The standard registration set: image and legacy slides on the static
    /// adapter, plus the video and RSS adapters.
    pub fn standard() -> Self {
        let static_player: Arc<StaticPlayer> = Arc::new(StaticPlayer::new());
        let mut registry = Self::new(static_player.clone());
        registry.register(MediaType::Image, static_player);
        registry.register(MediaType::Video, Arc::new(VideoPlayer));
        registry.register(MediaType::Rss, Arc::new(RssPlayer::new()));
        registry
    }
}

// --- Static adapter (image and legacy slides) ---

/// Shows a slide for its fixed duration, padded by the fade transition on
/// both sides. Also serves as the fallback for slides without a known type.
pub struct StaticPlayer {
    /// Last cache-bust stamp per slide id, re-stamped at most every 30 s.
    last_refresh: Mutex<HashMap<i64, i64>>,
}

impl StaticPlayer {
    pub fn new() -> Self {
        Self { last_refresh: Mutex::new(HashMap::new()) }
    }

    fn refreshed_source(&self, slide_id: i64, source: &str) -> String {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut stamps = self.last_refresh.lock().unwrap();
        let stamp = stamps.entry(slide_id).or_insert(0);
        if now_ms - *stamp > MIN_REFRESH_MS {
            *stamp = now_ms;
        }
        // Keep existing query parameters intact.
        let separator = if source.contains('?') { '&' } else { '?' };
        format!("{}{}refresh={}", source, separator, stamp)
    }
}

#[async_trait]
impl SlidePlayer for StaticPlayer {
    async fn run(&self, slide: &Slide, ctx: &PlayerContext) -> Result<(), MediaError> {
        // Image slides may carry their asset on the media list instead of
        // (or as well as) the options source.
        let source = slide
            .options
            .source
            .as_deref()
            .or_else(|| slide.media.first().and_then(|asset| asset.image.as_deref()))
            .map(|source| self.refreshed_source(slide.id, source));
        ctx.renderer.show_slide(ctx.region_id, slide, source.as_deref());

        let duration = slide.duration.unwrap_or(DEFAULT_SLIDE_DURATION_SECS).max(0.0);
        // Wait out the fade-in before the countdown, and the fade-out after.
        sleep(ctx.timing.fade).await;
        ctx.start_progress(duration);
        sleep(Duration::from_secs_f32(duration) + ctx.timing.fade).await;
        Ok(())
    }
}

// --- Video adapter ---

/// Plays a video slide on a freshly created surface, completing on the
/// surface's ended/error event.
pub struct VideoPlayer;

impl VideoPlayer {
    async fn probe_online(&self, ctx: &PlayerContext) -> bool {
        let Some(probe_url) = &ctx.probe_url else {
            return true;
        };
        match ctx.http.head(probe_url).timeout(ctx.feed_timeout).send().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Connectivity probe against {} failed: {}", probe_url, e);
                false
            }
        }
    }
}

#[async_trait]
impl SlidePlayer for VideoPlayer {
    async fn run(&self, slide: &Slide, ctx: &PlayerContext) -> Result<(), MediaError> {
        let Some(asset) = slide.media.first() else {
            return Err(MediaError::MissingSource(format!(
                "video slide {} has no media",
                slide.id
            )));
        };

        // Never stall the rotation trying to buffer without a network.
        if !self.probe_online(ctx).await {
            return Err(MediaError::Offline);
        }

        let mut surface = ctx.surfaces.create(ctx.region_id);
        if let Err(e) = surface.load(asset).await {
            surface.release();
            return Err(e);
        }
        ctx.renderer.show_slide(ctx.region_id, slide, None);

        // Don't start playback before the slide has faded in.
        sleep(ctx.timing.fade).await;
        surface.seek_to_start();
        surface.play();

        // Wait for completion, polling for the media duration until the
        // surface has discovered metadata so the progress bar can start.
        let mut progress_started = false;
        let event = loop {
            match tokio::time::timeout(ctx.timing.duration_poll, surface.next_event()).await {
                Ok(event) => break event,
                Err(_) => {
                    if !progress_started {
                        if let Some(duration) = surface.duration() {
                            ctx.start_progress(duration);
                            progress_started = true;
                        }
                    }
                }
            }
        };

        let result = match event {
            SurfaceEvent::Ended => {
                debug!("[region {}] video slide {} playback ended", ctx.region_id, slide.id);
                sleep(ctx.timing.ended_debounce).await;
                Ok(())
            }
            SurfaceEvent::Error(message) => Err(MediaError::Surface(message)),
        };
        // Always hand the element back, whatever the outcome.
        surface.release();
        result
    }
}

// --- RSS adapter ---

/// One parsed feed entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub description: String,
}

/// Cycles through feed entries at a fixed per-entry duration. Keeps the last
/// good copy of every feed so a fetch failure degrades to stale content
/// instead of a skipped slide.
pub struct RssPlayer {
    cache: Mutex<HashMap<String, Vec<FeedEntry>>>,
}

impl RssPlayer {
    pub fn new() -> Self {
        Self { cache: Mutex::new(HashMap::new()) }
    }

    async fn fetch_feed(&self, url: &str, ctx: &PlayerContext) -> Result<Vec<FeedEntry>, MediaError> {
        let response = ctx
            .http
            .get(url)
            .timeout(ctx.feed_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        parse_feed(&body)
    }

    /// Fetches the feed, falling back to the cached copy on failure; with no
    /// cache, waits and retries before giving up.
    async fn load_entries(&self, url: &str, ctx: &PlayerContext) -> Result<Vec<FeedEntry>, MediaError> {
        let mut last_error = None;
        for attempt in 0..FEED_RETRY_ATTEMPTS {
            if attempt > 0 {
                sleep(ctx.timing.retry).await;
            }
            match self.fetch_feed(url, ctx).await {
                Ok(entries) => {
                    self.cache.lock().unwrap().insert(url.to_string(), entries.clone());
                    return Ok(entries);
                }
                Err(e) => {
                    warn!("Feed fetch attempt {} for {} failed: {}", attempt + 1, url, e);
                    if let Some(cached) = self.cache.lock().unwrap().get(url).cloned() {
                        info!("Serving cached copy of feed {}", url);
                        return Ok(cached);
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| MediaError::Generic("feed unavailable".to_string())))
    }
}

#[async_trait]
impl SlidePlayer for RssPlayer {
    async fn run(&self, slide: &Slide, ctx: &PlayerContext) -> Result<(), MediaError> {
        let source = slide
            .options
            .rss_source
            .as_deref()
            .or(slide.options.source.as_deref())
            .ok_or_else(|| {
                MediaError::MissingSource(format!("rss slide {} has no feed source", slide.id))
            })?;
        let feed_url = Url::parse(source)?;

        let entries = self.load_entries(feed_url.as_str(), ctx).await?;
        if entries.is_empty() {
            warn!("Feed {} has no entries; skipping slide {}", feed_url, slide.id);
            return Ok(());
        }

        let count = slide
            .options
            .rss_number
            .unwrap_or(DEFAULT_RSS_NUMBER)
            .clamp(1, entries.len());
        let entry_secs = slide.options.rss_duration.unwrap_or(DEFAULT_RSS_ENTRY_SECS).max(0.0);

        ctx.renderer.show_slide(ctx.region_id, slide, Some(feed_url.as_str()));
        sleep(ctx.timing.fade).await;
        for entry in entries.iter().take(count) {
            ctx.renderer.show_feed_entry(ctx.region_id, slide, &entry.title, &entry.description);
            ctx.start_progress(entry_secs);
            sleep(Duration::from_secs_f32(entry_secs)).await;
        }
        sleep(ctx.timing.fade).await;
        Ok(())
    }
}

/// Extracts `<item>`/`<entry>` titles and descriptions from an RSS or Atom
/// document.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, MediaError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    #[derive(Clone, Copy, PartialEq)]
    enum Field {
        Title,
        Description,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_entry = false;
    let mut field = None;
    let mut title = String::new();
    let mut description = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    in_entry = true;
                    title.clear();
                    description.clear();
                }
                b"title" if in_entry => field = Some(Field::Title),
                b"description" | b"summary" if in_entry => field = Some(Field::Description),
                _ => field = None,
            },
            Ok(Event::Text(t)) => {
                if let Ok(text) = t.xml_content() {
                    match field {
                        Some(Field::Title) => title.push_str(&text),
                        Some(Field::Description) => description.push_str(&text),
                        None => {}
                    }
                }
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                match field {
                    Some(Field::Title) => title.push_str(&text),
                    Some(Field::Description) => description.push_str(&text),
                    None => {}
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    if in_entry && !title.is_empty() {
                        entries.push(FeedEntry {
                            title: std::mem::take(&mut title),
                            description: std::mem::take(&mut description),
                        });
                    }
                    in_entry = false;
                    field = None;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(MediaError::Feed(e.to_string())),
            _ => {}
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaAsset;
    use crate::render::VideoSurface;
    use std::sync::Mutex as StdMutex;

    /// Records every renderer call for assertions.
    #[derive(Default)]
    struct RecordingRenderer {
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingRenderer {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SlideRenderer for RecordingRenderer {
        fn show_slide(&self, region_id: i64, slide: &Slide, source: Option<&str>) {
            self.calls.lock().unwrap().push(format!(
                "show:{}:{}:{}",
                region_id,
                slide.id,
                source.unwrap_or("-")
            ));
        }
        fn show_feed_entry(&self, _region_id: i64, slide: &Slide, title: &str, _description: &str) {
            self.calls.lock().unwrap().push(format!("entry:{}:{}", slide.id, title));
        }
        fn start_progress(&self, _region_id: i64, duration_secs: f32) {
            self.calls.lock().unwrap().push(format!("progress:{}", duration_secs));
        }
        fn reset_progress(&self, _region_id: i64) {
            self.calls.lock().unwrap().push("reset".to_string());
        }
        fn show_fallback(&self, visible: bool) {
            self.calls.lock().unwrap().push(format!("fallback:{}", visible));
        }
    }

    /// A surface that replays a scripted event after play is called.
    struct ScriptedSurface {
        event: Option<SurfaceEvent>,
        duration: Option<f32>,
        released: Arc<StdMutex<bool>>,
    }

    #[async_trait]
    impl VideoSurface for ScriptedSurface {
        async fn load(&mut self, _asset: &MediaAsset) -> Result<(), MediaError> {
            Ok(())
        }
        fn seek_to_start(&mut self) {}
        fn play(&mut self) {}
        fn duration(&self) -> Option<f32> {
            self.duration
        }
        async fn next_event(&mut self) -> SurfaceEvent {
            match self.event.take() {
                Some(event) => event,
                // Keep pending forever once consumed.
                None => std::future::pending().await,
            }
        }
        fn release(&mut self) {
            *self.released.lock().unwrap() = true;
        }
    }

    struct ScriptedFactory {
        event: SurfaceEvent,
        duration: Option<f32>,
        released: Arc<StdMutex<bool>>,
    }

    impl SurfaceFactory for ScriptedFactory {
        fn create(&self, _region_id: i64) -> Box<dyn VideoSurface> {
            Box::new(ScriptedSurface {
                event: Some(self.event.clone()),
                duration: self.duration,
                released: self.released.clone(),
            })
        }
    }

    fn test_timing() -> PlayerTiming {
        PlayerTiming {
            fade: Duration::from_millis(1),
            retry: Duration::from_millis(1),
            duration_poll: Duration::from_millis(5),
            ended_debounce: Duration::from_millis(1),
        }
    }

    fn test_context(
        renderer: Arc<RecordingRenderer>,
        surfaces: Arc<dyn SurfaceFactory>,
    ) -> PlayerContext {
        PlayerContext {
            region_id: 1,
            show_progress: true,
            renderer,
            surfaces,
            http: reqwest::Client::new(),
            probe_url: None,
            feed_timeout: Duration::from_millis(200),
            timing: test_timing(),
        }
    }

    fn slide_json(json: &str) -> Slide {
        serde_json::from_str(json).unwrap()
    }

    fn null_factory() -> Arc<dyn SurfaceFactory> {
        Arc::new(crate::render::NullSurfaceFactory)
    }

    #[tokio::test]
    async fn static_player_shows_slide_then_completes_after_duration() {
        let renderer = Arc::new(RecordingRenderer::default());
        let ctx = test_context(renderer.clone(), null_factory());
        let slide = slide_json(
            r#"{"id": 1, "media_type": "image", "duration": 0.01,
                "options": {"source": "/media/a.png"}}"#,
        );

        StaticPlayer::new().run(&slide, &ctx).await.expect("static slide completes");

        let calls = renderer.calls();
        assert!(calls[0].starts_with("show:1:1:/media/a.png?refresh="));
        assert_eq!(calls[1], "progress:0.01");
    }

    #[test]
    fn refresh_stamp_is_reused_within_the_refresh_window() {
        let player = StaticPlayer::new();
        let first = player.refreshed_source(7, "/media/a.png");
        let second = player.refreshed_source(7, "/media/a.png");
        assert_eq!(first, second);

        // Existing query parameters are preserved, not overridden.
        let with_query = player.refreshed_source(8, "/media/b.png?v=2");
        assert!(with_query.starts_with("/media/b.png?v=2&refresh="));
    }

    #[tokio::test]
    async fn video_player_completes_on_ended_and_releases_surface() {
        let renderer = Arc::new(RecordingRenderer::default());
        let released = Arc::new(StdMutex::new(false));
        let factory = Arc::new(ScriptedFactory {
            event: SurfaceEvent::Ended,
            duration: Some(42.0),
            released: released.clone(),
        });
        let ctx = test_context(renderer.clone(), factory);
        let slide = slide_json(
            r#"{"id": 2, "media_type": "video", "media": [{"mp4": "/media/a.mp4"}]}"#,
        );

        VideoPlayer.run(&slide, &ctx).await.expect("video completes");
        assert!(*released.lock().unwrap());
    }

    #[tokio::test]
    async fn video_player_reports_surface_errors_but_still_releases() {
        let renderer = Arc::new(RecordingRenderer::default());
        let released = Arc::new(StdMutex::new(false));
        let factory = Arc::new(ScriptedFactory {
            event: SurfaceEvent::Error("decode failed".to_string()),
            duration: None,
            released: released.clone(),
        });
        let ctx = test_context(renderer, factory);
        let slide = slide_json(
            r#"{"id": 3, "media_type": "video", "media": [{"mp4": "/media/a.mp4"}]}"#,
        );

        let result = VideoPlayer.run(&slide, &ctx).await;
        assert!(matches!(result, Err(MediaError::Surface(_))));
        assert!(*released.lock().unwrap());
    }

    #[tokio::test]
    async fn video_player_skips_immediately_when_slide_has_no_media() {
        let renderer = Arc::new(RecordingRenderer::default());
        let ctx = test_context(renderer.clone(), null_factory());
        let slide = slide_json(r#"{"id": 4, "media_type": "video"}"#);

        let result = VideoPlayer.run(&slide, &ctx).await;
        assert!(matches!(result, Err(MediaError::MissingSource(_))));
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn video_player_treats_offline_as_immediate_completion() {
        let renderer = Arc::new(RecordingRenderer::default());
        let mut ctx = test_context(renderer.clone(), null_factory());
        // Nothing listens on the discard port, so the probe fails fast.
        ctx.probe_url = Some("http://127.0.0.1:9/ping".to_string());
        let slide = slide_json(
            r#"{"id": 5, "media_type": "video", "media": [{"mp4": "/media/a.mp4"}]}"#,
        );

        let result = VideoPlayer.run(&slide, &ctx).await;
        assert!(matches!(result, Err(MediaError::Offline)));
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn rss_player_cycles_cached_entries_when_fetch_fails() {
        let renderer = Arc::new(RecordingRenderer::default());
        let ctx = test_context(renderer.clone(), null_factory());
        let player = RssPlayer::new();
        player.cache.lock().unwrap().insert(
            "http://127.0.0.1:9/feed.xml".to_string(),
            vec![
                FeedEntry { title: "first".into(), description: String::new() },
                FeedEntry { title: "second".into(), description: String::new() },
                FeedEntry { title: "third".into(), description: String::new() },
            ],
        );
        let slide = slide_json(
            r#"{"id": 6, "media_type": "rss",
                "options": {"rss_source": "http://127.0.0.1:9/feed.xml",
                            "rss_number": 2, "rss_duration": 0.01}}"#,
        );

        player.run(&slide, &ctx).await.expect("stale cache keeps the slide alive");

        let entries: Vec<_> =
            renderer.calls().into_iter().filter(|c| c.starts_with("entry:")).collect();
        assert_eq!(entries, vec!["entry:6:first", "entry:6:second"]);
    }

    #[tokio::test]
    async fn rss_player_without_source_fails_fast() {
        let renderer = Arc::new(RecordingRenderer::default());
        let ctx = test_context(renderer, null_factory());
        let slide = slide_json(r#"{"id": 7, "media_type": "rss"}"#);

        let result = RssPlayer::new().run(&slide, &ctx).await;
        assert!(matches!(result, Err(MediaError::MissingSource(_))));
    }

    #[test]
    fn parse_feed_handles_rss_items_and_cdata() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
                <title>Channel title is not an entry</title>
                <item>
                    <title>First headline</title>
                    <description><![CDATA[Body <b>one</b>]]></description>
                </item>
                <item>
                    <title>Second &amp; last</title>
                    <description>Body two</description>
                </item>
            </channel></rss>"#;

        let entries = parse_feed(xml).expect("feed parses");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "First headline");
        assert_eq!(entries[0].description, "Body <b>one</b>");
        assert_eq!(entries[1].title, "Second & last");
    }

    #[test]
    fn truncated_feed_never_yields_a_half_built_entry() {
        match parse_feed("<rss><item><title>oops") {
            Ok(entries) => assert!(entries.is_empty()),
            Err(MediaError::Feed(_)) => {}
            Err(other) => panic!("unexpected error kind: {:?}", other),
        }
        assert!(parse_feed("not xml at all").map(|e| e.is_empty()).unwrap_or(true));
    }

    #[test]
    fn registry_resolves_unknown_types_to_the_fallback_adapter() {
        let registry = PlayerRegistry::standard();
        let fallback = registry.resolve(MediaType::Other);
        let image = registry.resolve(MediaType::Image);
        // Legacy/unknown slides share the static adapter instance.
        assert!(Arc::ptr_eq(&fallback, &image));
    }
}
