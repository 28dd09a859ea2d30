use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

// Project Modules
mod buffer;
mod config;
mod errors;
mod events;
mod model;
mod playback;
mod players;
mod region;
mod render;
mod schedule;

use config::{load_config, AppConfig};
use errors::AppError;
use events::{BackendEvent, RegionCommand, RegionInfo};
use model::Channel;
use playback::PlaybackTiming;
use players::{PlayerContext, PlayerRegistry, PlayerTiming};
use region::RegionController;
use render::{LogRenderer, NullSurfaceFactory, SlideRenderer};

// --- Constants ---
const DEFAULT_CONFIG_PATH: &str = "/etc/infoscreen.conf";

#[tokio::main]
async fn main() {
    env_logger::init(); // Initialize logger
    info!("Starting infoscreen_rs application...");

    let config_path =
        std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    if let Err(e) = run(&config_path).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: &str) -> Result<(), AppError> {
    let config = load_config(config_path)?;

    let renderer: Arc<dyn SlideRenderer> = Arc::new(LogRenderer);
    let http = reqwest::Client::new();
    let players = Arc::new(PlayerRegistry::standard());
    let player_timing = PlayerTiming {
        fade: Duration::from_millis(config.fade_ms),
        ..PlayerTiming::default()
    };

    // One controller task per configured region, each with its own command
    // channel; all report scheduled-slide counts into one aggregator.
    let (info_tx, info_rx) = mpsc::unbounded_channel();
    let mut region_txs = Vec::with_capacity(config.regions.len());
    for &region_id in &config.regions {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let ctx = PlayerContext {
            region_id,
            show_progress: config.show_progress,
            renderer: renderer.clone(),
            surfaces: Arc::new(NullSurfaceFactory),
            http: http.clone(),
            probe_url: config.probe_url.clone(),
            feed_timeout: Duration::from_secs(config.feed_timeout_secs),
            timing: player_timing,
        };
        let controller = RegionController::new(
            region_id,
            PlaybackTiming::default(),
            players.clone(),
            ctx,
            command_rx,
            info_tx.clone(),
        );
        debug!("Spawning controller task for region {}", region_id);
        tokio::spawn(controller.run());
        region_txs.push(command_tx);
    }
    drop(info_tx);

    let fallback_regions = config.regions.clone();
    let fallback_renderer = renderer.clone();
    tokio::spawn(async move {
        aggregate_region_info(info_rx, fallback_renderer, fallback_regions).await;
    });

    dispatch_events(&config, &region_txs).await;

    // The transport is gone but pushed content keeps rotating; a signage
    // screen never blanks just because the backend went quiet.
    info!("Event stream ended; continuing playback with current content");
    std::future::pending::<()>().await;
    Ok(())
}

/// Tracks every region's scheduled-slide count and toggles the fallback
/// image when no region has anything to show.
async fn aggregate_region_info(
    mut info_rx: mpsc::UnboundedReceiver<RegionInfo>,
    renderer: Arc<dyn SlideRenderer>,
    regions: Vec<i64>,
) {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    let mut fallback_visible: Option<bool> = None;

    while let Some(info) = info_rx.recv().await {
        debug!("Region {} reports {} scheduled slide(s)", info.id, info.scheduled_slides);
        counts.insert(info.id, info.scheduled_slides);

        let all_reported = regions.iter().all(|id| counts.contains_key(id));
        let nothing_scheduled = all_reported && counts.values().all(|&count| count == 0);
        if fallback_visible != Some(nothing_scheduled) {
            fallback_visible = Some(nothing_scheduled);
            renderer.show_fallback(nothing_scheduled);
        }
    }
}

/// Reads newline-delimited JSON backend events from stdin and routes them to
/// the region controllers. Channel pushes arriving before the screen is
/// ready are buffered and replayed after the template settle delay.
async fn dispatch_events(config: &AppConfig, regions: &[mpsc::UnboundedSender<RegionCommand>]) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut screen_ready = false;
    let mut saved_pushes: Vec<(Vec<i64>, Channel)> = Vec::new();

    info!("Awaiting backend events on stdin");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read event stream: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<BackendEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed backend event ({}): {}", e, line);
                continue;
            }
        };

        match event {
            BackendEvent::Ready { screen, status_code } => {
                if let Some(code) = status_code {
                    if code != 200 {
                        error!("Backend accepted the screen with status {}", code);
                    }
                }
                if screen_ready {
                    debug!("Duplicate ready event ignored");
                    continue;
                }
                info!(
                    "Screen {:?} accepted (template {:?}); settling for {} ms before emitting content",
                    screen.title.as_deref().unwrap_or("unnamed"),
                    screen.template.as_ref().and_then(|t| t.path_live.as_deref()),
                    config.screen_settle_ms
                );
                tokio::time::sleep(Duration::from_millis(config.screen_settle_ms)).await;
                screen_ready = true;
                for (region_list, channel) in saved_pushes.drain(..) {
                    info!("Emitting saved channel {}", channel.id);
                    broadcast(regions, RegionCommand::AddChannel {
                        regions: region_list,
                        channel,
                    });
                }
            }
            BackendEvent::AwaitingContent => info!("Connected; awaiting content"),
            BackendEvent::ActivationNotComplete => {
                warn!("Screen is not activated; an activation prompt should be shown")
            }
            BackendEvent::ChannelPush { regions: region_list, data } => {
                if screen_ready {
                    broadcast(regions, RegionCommand::AddChannel {
                        regions: region_list,
                        channel: data,
                    });
                } else {
                    debug!("Saving channel {} until the screen is ready", data.id);
                    saved_pushes.push((region_list, data));
                }
            }
            BackendEvent::ChannelRemoved { id } => {
                broadcast(regions, RegionCommand::RemoveChannel { id })
            }
            BackendEvent::Reload => {
                info!("Reload requested; dropping all content");
                screen_ready = false;
                saved_pushes.clear();
                broadcast(regions, RegionCommand::Reload);
            }
        }
    }
}

fn broadcast(regions: &[mpsc::UnboundedSender<RegionCommand>], command: RegionCommand) {
    for tx in regions {
        let _ = tx.send(command.clone());
    }
}
