//! Region controller: one independent playback loop per screen region.
//!
//! Each controller is a single tokio task owning one content buffer and one
//! playback state machine. Commands from the transport (channel pushes and
//! removals) are applied to the staging slot even while a slide is showing;
//! the live slot is only ever touched at the rotation boundary inside the
//! machine. The task holds at most one pending wait — a slide player run or
//! a backoff timer — in a single slot, so arming a new wait structurally
//! cancels the previous one and duplicate advances cannot happen.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::events::{RegionCommand, RegionInfo};
use super::playback::{PlaybackMachine, PlaybackTiming, Step};
use super::players::{PlayerContext, PlayerRegistry};

/// What to do when the pending wait resolves.
enum AfterWait {
    AdvanceSlide,
    AdvanceChannel,
    RestartCycle,
}

type PendingWait = Pin<Box<dyn Future<Output = AfterWait> + Send>>;

enum LoopEvent {
    Command(Option<RegionCommand>),
    Waited(AfterWait),
}

/// Effect of a command on the playback loop.
enum CommandEffect {
    /// Staging-only change (or no change); the rotation is undisturbed.
    None,
    /// First content arrived: start the rotation after the settle delay.
    StartSettle,
    /// All content dropped; cancel any pending wait and go idle.
    Reset,
}

pub struct RegionController {
    id: i64,
    machine: PlaybackMachine,
    players: Arc<PlayerRegistry>,
    player_ctx: PlayerContext,
    commands: mpsc::UnboundedReceiver<RegionCommand>,
    info_tx: mpsc::UnboundedSender<RegionInfo>,
    running: bool,
}

impl RegionController {
    pub fn new(
        id: i64,
        timing: PlaybackTiming,
        players: Arc<PlayerRegistry>,
        player_ctx: PlayerContext,
        commands: mpsc::UnboundedReceiver<RegionCommand>,
        info_tx: mpsc::UnboundedSender<RegionInfo>,
    ) -> Self {
        Self {
            id,
            machine: PlaybackMachine::new(timing),
            players,
            player_ctx,
            commands,
            info_tx,
            running: false,
        }
    }

    /// Runs the region until its command channel closes.
    pub async fn run(mut self) {
        info!("Region {} controller started", self.id);
        self.emit_info(0);

        let mut pending: Option<PendingWait> = None;
        loop {
            let event = match pending.as_mut() {
                Some(wait) => tokio::select! {
                    command = self.commands.recv() => LoopEvent::Command(command),
                    after = wait.as_mut() => LoopEvent::Waited(after),
                },
                None => LoopEvent::Command(self.commands.recv().await),
            };

            match event {
                LoopEvent::Command(None) => break,
                LoopEvent::Command(Some(command)) => match self.handle_command(command) {
                    CommandEffect::None => {}
                    CommandEffect::StartSettle => {
                        let settle = self.machine.timing.settle;
                        debug!("Region {}: settling for {:?} before first advance", self.id, settle);
                        pending = Some(Box::pin(async move {
                            sleep(settle).await;
                            AfterWait::RestartCycle
                        }));
                    }
                    CommandEffect::Reset => pending = None,
                },
                LoopEvent::Waited(after) => {
                    let now = Local::now();
                    let step = match after {
                        AfterWait::AdvanceSlide => self.machine.advance_slide(now),
                        AfterWait::AdvanceChannel => self.machine.advance_channel(now),
                        AfterWait::RestartCycle => self.machine.restart_cycle(now),
                    };
                    self.broadcast_pending_info();
                    pending = Some(self.arm(step));
                }
            }
        }
        info!("Region {} controller stopped", self.id);
    }

    /// Applies one transport command to the buffer.
    fn handle_command(&mut self, command: RegionCommand) -> CommandEffect {
        match command {
            RegionCommand::AddChannel { regions, channel } => {
                if !regions.contains(&self.id) {
                    // Not (or no longer) assigned here; drop it from staging
                    // if we hold it.
                    self.machine.buffer.remove_channel(&channel.key());
                    return CommandEffect::None;
                }
                info!("Adding channel {} to region {}", channel.id, self.id);
                if self.running {
                    self.machine.buffer.upsert_channel(channel, true);
                    CommandEffect::None
                } else {
                    self.machine.buffer.upsert_channel(channel, false);
                    self.running = true;
                    CommandEffect::StartSettle
                }
            }
            RegionCommand::RemoveChannel { id } => {
                self.machine.buffer.remove_channel(&id.to_string());
                CommandEffect::None
            }
            RegionCommand::Reload => {
                info!("Region {}: reload, dropping all content", self.id);
                self.machine.reset();
                self.running = false;
                if self.player_ctx.show_progress {
                    self.player_ctx.renderer.reset_progress(self.id);
                }
                self.emit_info(0);
                CommandEffect::Reset
            }
        }
    }

    /// Turns a machine step into the next pending wait.
    fn arm(&mut self, step: Step) -> PendingWait {
        match step {
            Step::Show { .. } => {
                let Some(slide) = self.machine.current_slide().cloned() else {
                    // The cursor no longer resolves (content shrank under a
                    // racing update); fold into the retry path.
                    warn!("Region {}: slide at cursor is gone, retrying shortly", self.id);
                    let retry = self.machine.timing.retry;
                    return Box::pin(async move {
                        sleep(retry).await;
                        AfterWait::RestartCycle
                    });
                };

                if self.player_ctx.show_progress {
                    self.player_ctx.renderer.reset_progress(self.id);
                }
                let (position, total) = self.machine.note_shown();
                info!(
                    "Region {}: displaying slide {} ({:?}, {}/{})",
                    self.id, slide.id, slide.media_type, position, total
                );

                let player = self.players.resolve(slide.media_type);
                let ctx = self.player_ctx.clone();
                Box::pin(async move {
                    if let Err(e) = player.run(&slide, &ctx).await {
                        warn!("Slide {} playback incomplete: {}", slide.id, e);
                    }
                    AfterWait::AdvanceSlide
                })
            }
            Step::SkipChannel(delay) => Box::pin(async move {
                sleep(delay).await;
                AfterWait::AdvanceChannel
            }),
            Step::Retry(delay) => Box::pin(async move {
                sleep(delay).await;
                AfterWait::RestartCycle
            }),
        }
    }

    fn broadcast_pending_info(&mut self) {
        if let Some(scheduled_slides) = self.machine.take_info() {
            self.emit_info(scheduled_slides);
        }
    }

    fn emit_info(&self, scheduled_slides: usize) {
        let _ = self.info_tx.send(RegionInfo { id: self.id, scheduled_slides });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, Slide};
    use crate::players::{PlayerTiming, SlidePlayer};
    use crate::render::{NullSurfaceFactory, SlideRenderer};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct QuietRenderer;
    impl SlideRenderer for QuietRenderer {
        fn show_slide(&self, _: i64, _: &Slide, _: Option<&str>) {}
        fn show_feed_entry(&self, _: i64, _: &Slide, _: &str, _: &str) {}
        fn start_progress(&self, _: i64, _: f32) {}
        fn reset_progress(&self, _: i64) {}
        fn show_fallback(&self, _: bool) {}
    }

    /// Records each displayed slide id and completes almost immediately.
    struct CountingPlayer {
        shown: Arc<StdMutex<Vec<i64>>>,
    }

    #[async_trait]
    impl SlidePlayer for CountingPlayer {
        async fn run(
            &self,
            slide: &Slide,
            _ctx: &PlayerContext,
        ) -> Result<(), crate::errors::MediaError> {
            self.shown.lock().unwrap().push(slide.id);
            sleep(Duration::from_millis(1)).await;
            Ok(())
        }
    }

    fn fast_timing() -> PlaybackTiming {
        PlaybackTiming {
            settle: Duration::from_millis(1),
            retry: Duration::from_millis(5),
            skip: Duration::from_millis(1),
        }
    }

    fn test_ctx(region_id: i64) -> PlayerContext {
        PlayerContext {
            region_id,
            show_progress: true,
            renderer: Arc::new(QuietRenderer),
            surfaces: Arc::new(NullSurfaceFactory),
            http: reqwest::Client::new(),
            probe_url: None,
            feed_timeout: Duration::from_millis(100),
            timing: PlayerTiming {
                fade: Duration::from_millis(1),
                retry: Duration::from_millis(1),
                duration_poll: Duration::from_millis(5),
                ended_debounce: Duration::from_millis(1),
            },
        }
    }

    fn counting_registry(shown: Arc<StdMutex<Vec<i64>>>) -> Arc<PlayerRegistry> {
        Arc::new(PlayerRegistry::new(Arc::new(CountingPlayer { shown })))
    }

    fn channel_json(json: &str) -> Channel {
        serde_json::from_str(json).unwrap()
    }

    fn controller(
        id: i64,
        shown: Arc<StdMutex<Vec<i64>>>,
    ) -> (
        RegionController,
        mpsc::UnboundedSender<RegionCommand>,
        mpsc::UnboundedReceiver<RegionInfo>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = mpsc::unbounded_channel();
        let region = RegionController::new(
            id,
            fast_timing(),
            counting_registry(shown),
            test_ctx(id),
            command_rx,
            info_tx,
        );
        (region, command_tx, info_rx)
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
    }

    #[tokio::test]
    async fn region_rotates_through_pushed_content() {
        let shown = Arc::new(StdMutex::new(Vec::new()));
        let (region, command_tx, mut info_rx) = controller(1, shown.clone());
        let task = tokio::spawn(region.run());

        command_tx
            .send(RegionCommand::AddChannel {
                regions: vec![1],
                channel: channel_json(
                    r#"{"id": 1, "slides": [
                        {"id": 10, "duration": 1},
                        {"id": 11, "duration": 1}
                    ]}"#,
                ),
            })
            .expect("send push");

        // The startup broadcast reports zero scheduled slides, then the
        // first cycle restart reports both.
        assert_eq!(info_rx.recv().await, Some(RegionInfo { id: 1, scheduled_slides: 0 }));
        assert_eq!(info_rx.recv().await, Some(RegionInfo { id: 1, scheduled_slides: 2 }));

        // The rotation visits both slides and wraps around.
        let shown_check = shown.clone();
        wait_for("three displays", move || shown_check.lock().unwrap().len() >= 3).await;
        let seen = shown.lock().unwrap().clone();
        assert_eq!(&seen[..3], &[10, 11, 10]);

        drop(command_tx);
        task.await.expect("region task ends when commands close");
    }

    #[tokio::test]
    async fn push_for_other_region_removes_a_held_channel() {
        let shown = Arc::new(StdMutex::new(Vec::new()));
        let (mut region, _command_tx, _info_rx) = controller(1, shown);

        let channel = channel_json(r#"{"id": 5, "slides": [{"id": 1, "duration": 1}]}"#);
        assert!(matches!(
            region.handle_command(RegionCommand::AddChannel {
                regions: vec![1, 2],
                channel: channel.clone(),
            }),
            CommandEffect::StartSettle
        ));
        // Re-push while running: staging only.
        assert!(matches!(
            region.handle_command(RegionCommand::AddChannel {
                regions: vec![1],
                channel: channel.clone(),
            }),
            CommandEffect::None
        ));

        // The channel is no longer assigned to this region.
        region.handle_command(RegionCommand::AddChannel { regions: vec![2], channel });
        assert!(region.machine.buffer.slides_updated());
        region.machine.buffer.swap();
        assert!(!region.machine.buffer.live().contains("5"));
    }

    #[tokio::test]
    async fn reload_drops_content_and_reports_zero() {
        let shown = Arc::new(StdMutex::new(Vec::new()));
        let (mut region, _command_tx, mut info_rx) = controller(1, shown);

        region.handle_command(RegionCommand::AddChannel {
            regions: vec![1],
            channel: channel_json(r#"{"id": 5, "slides": [{"id": 1, "duration": 1}]}"#),
        });
        assert!(region.running);

        assert!(matches!(
            region.handle_command(RegionCommand::Reload),
            CommandEffect::Reset
        ));
        assert!(!region.running);
        assert!(region.machine.buffer.live().is_empty());
        assert_eq!(info_rx.recv().await, Some(RegionInfo { id: 1, scheduled_slides: 0 }));
    }

    #[tokio::test]
    async fn removal_while_running_takes_effect_at_the_boundary() {
        let shown = Arc::new(StdMutex::new(Vec::new()));
        let (mut region, _command_tx, _info_rx) = controller(1, shown);

        region.handle_command(RegionCommand::AddChannel {
            regions: vec![1],
            channel: channel_json(r#"{"id": 5, "slides": [{"id": 1, "duration": 1}]}"#),
        });
        region.handle_command(RegionCommand::RemoveChannel { id: 5 });

        // Live still holds the channel; staging does not.
        assert!(region.machine.buffer.live().contains("5"));
        assert!(region.machine.buffer.slides_updated());
    }

    #[tokio::test]
    async fn unknown_media_type_rotates_via_the_fallback_player() {
        // A slide with a legacy/unknown type must still rotate.
        let shown = Arc::new(StdMutex::new(Vec::new()));
        let (region, command_tx, _info_rx) = controller(1, shown.clone());
        let task = tokio::spawn(region.run());

        command_tx
            .send(RegionCommand::AddChannel {
                regions: vec![1],
                channel: channel_json(
                    r#"{"id": 1, "slides": [{"id": 77, "media_type": "marquee", "duration": 1}]}"#,
                ),
            })
            .expect("send push");

        let shown_check = shown.clone();
        wait_for("fallback display", move || !shown_check.lock().unwrap().is_empty()).await;
        assert_eq!(shown.lock().unwrap()[0], 77);

        drop(command_tx);
        task.await.expect("region task ends");
    }
}
