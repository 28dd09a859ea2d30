//! Rendering seams consumed by the regions and player adapters.
//!
//! The actual on-screen templates (DOM/GUI, stylesheets, fades) are an
//! external collaborator; this module defines the traits the scheduler talks
//! to, plus headless implementations that log what would be displayed. Tests
//! substitute recording fakes.

use async_trait::async_trait;
use log::{debug, info, warn};

use super::errors::MediaError;
use super::model::{MediaAsset, Slide};

/// Receives display instructions from regions and player adapters.
pub trait SlideRenderer: Send + Sync {
    /// Put a slide on screen. `source` carries the resolved (cache-busted)
    /// asset URL for slide types that have one.
    fn show_slide(&self, region_id: i64, slide: &Slide, source: Option<&str>);

    /// Show one feed entry of an RSS slide.
    fn show_feed_entry(&self, region_id: i64, slide: &Slide, title: &str, description: &str);

    /// Start the progress bar animation over `duration_secs`.
    fn start_progress(&self, region_id: i64, duration_secs: f32);

    /// Reset the progress bar ahead of the next slide.
    fn reset_progress(&self, region_id: i64);

    /// Toggle the screen-wide fallback image, shown when no region has
    /// anything scheduled.
    fn show_fallback(&self, visible: bool);
}

/// Events produced by a video surface during playback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Playback reached the end of the media.
    Ended,
    /// The surface failed to play the media.
    Error(String),
}

/// One video playback element, created per video slide display and released
/// afterwards so repeated source swaps cannot accumulate decoder state.
#[async_trait]
pub trait VideoSurface: Send {
    /// Attach a media asset to the surface.
    async fn load(&mut self, asset: &MediaAsset) -> Result<(), MediaError>;

    /// Rewind to the start, clearing any position left by a prior playback.
    fn seek_to_start(&mut self);

    /// Begin playback.
    fn play(&mut self);

    /// Media duration in seconds, once metadata has been discovered.
    fn duration(&self) -> Option<f32>;

    /// Waits for the next playback event. Resolves at most once per
    /// display session with `Ended` or `Error`.
    async fn next_event(&mut self) -> SurfaceEvent;

    /// Detach the media and free the underlying element. Events arriving
    /// after release are dropped by the caller ceasing to listen.
    fn release(&mut self);
}

/// Creates a fresh [`VideoSurface`] per video slide display.
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, region_id: i64) -> Box<dyn VideoSurface>;
}

/// Headless renderer: logs every display instruction. Used when the client
/// core runs without its display collaborator attached.
pub struct LogRenderer;

impl SlideRenderer for LogRenderer {
    fn show_slide(&self, region_id: i64, slide: &Slide, source: Option<&str>) {
        // Responsive font sizing wins over the fixed size when both are set.
        let fontsize = slide.options.responsive_fontsize.or(slide.options.fontsize);
        info!(
            "[region {}] showing slide {} ({:?}) source={} fontsize={:?}",
            region_id,
            slide.id,
            slide.media_type,
            source.unwrap_or("-"),
            fontsize
        );
    }

    fn show_feed_entry(&self, region_id: i64, slide: &Slide, title: &str, _description: &str) {
        info!("[region {}] slide {} feed entry: {}", region_id, slide.id, title);
    }

    fn start_progress(&self, region_id: i64, duration_secs: f32) {
        debug!("[region {}] progress bar over {:.1}s", region_id, duration_secs);
    }

    fn reset_progress(&self, region_id: i64) {
        debug!("[region {}] progress bar reset", region_id);
    }

    fn show_fallback(&self, visible: bool) {
        info!("Fallback image {}", if visible { "shown" } else { "hidden" });
    }
}

/// Headless video surface: accepts any asset and reports `Ended` as soon as
/// playback starts, keeping the rotation moving without a real player.
#[derive(Default)]
pub struct NullSurface {
    region_id: i64,
    playing: bool,
}

#[async_trait]
impl VideoSurface for NullSurface {
    async fn load(&mut self, asset: &MediaAsset) -> Result<(), MediaError> {
        debug!(
            "[region {}] null surface loaded {}",
            self.region_id,
            asset.mp4.as_deref().or(asset.webm.as_deref()).or(asset.ogv.as_deref()).unwrap_or("-")
        );
        Ok(())
    }

    fn seek_to_start(&mut self) {}

    fn play(&mut self) {
        self.playing = true;
    }

    fn duration(&self) -> Option<f32> {
        Some(0.0)
    }

    async fn next_event(&mut self) -> SurfaceEvent {
        if !self.playing {
            warn!("[region {}] null surface asked for events before play", self.region_id);
        }
        SurfaceEvent::Ended
    }

    fn release(&mut self) {
        self.playing = false;
    }
}

/// Factory for [`NullSurface`] instances.
pub struct NullSurfaceFactory;

impl SurfaceFactory for NullSurfaceFactory {
    fn create(&self, region_id: i64) -> Box<dyn VideoSurface> {
        Box::new(NullSurface { region_id, playing: false })
    }
}
