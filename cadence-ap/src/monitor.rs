//! Idle and stuck-playback sweep
//!
//! Runs out of band from the playback loops. Two independent checks per channel:
//! a playing channel whose health check is stale is force-stopped (and restarted when it
//! still has something to play), and a connected channel that has not played for the idle
//! timeout is disconnected.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cadence_common::config::{MonitorConfig, PlayerConfig};
use cadence_common::time;

use crate::orchestrator::Registry;
use crate::player::ChannelPlayer;

/// What a sweep did to one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Healthy,
    /// Stuck playback was stopped and the loop started again
    Restarted,
    /// Stuck playback was stopped
    Stopped,
    /// Idle channel was disconnected
    Disconnected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub stopped: usize,
    pub restarted: usize,
    pub disconnected: usize,
}

impl SweepReport {
    fn record(&mut self, action: SweepAction) {
        self.checked += 1;
        match action {
            SweepAction::Healthy => {}
            SweepAction::Restarted => {
                self.stopped += 1;
                self.restarted += 1;
            }
            SweepAction::Stopped => self.stopped += 1,
            SweepAction::Disconnected => self.disconnected += 1,
        }
    }

    pub fn acted(&self) -> bool {
        self.stopped > 0 || self.disconnected > 0
    }
}

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    config: MonitorConfig,
    idle_timeout: Duration,
}

impl IdleMonitor {
    pub fn new(config: MonitorConfig, player: &PlayerConfig) -> Self {
        Self {
            config,
            idle_timeout: player.idle_timeout(),
        }
    }

    /// Judge one channel and act on it
    pub async fn check(&self, player: &Arc<ChannelPlayer>) -> SweepAction {
        let health = player.health().await;
        let channel = player.channel();

        if health.playing {
            let stale = time::elapsed_since(health.last_health_check);
            if stale <= self.config.stuck_threshold() {
                return SweepAction::Healthy;
            }

            warn!(
                channel_id = %channel,
                stale_ms = stale.as_millis() as u64,
                "Playback appears stuck, forcing stop"
            );
            player.force_stop().await;

            if (health.autoplay || !player.queue().is_empty()) && player.ensure_playing() {
                info!(channel_id = %channel, "Restarted playback after forced stop");
                return SweepAction::Restarted;
            }
            return SweepAction::Stopped;
        }

        if health.connected && !health.loop_running {
            let idle = time::elapsed_since(health.last_activity);
            if idle > self.idle_timeout {
                info!(
                    channel_id = %channel,
                    idle_ms = idle.as_millis() as u64,
                    "Channel idle, disconnecting"
                );
                if let Err(e) = player.disconnect_idle().await {
                    warn!(channel_id = %channel, error = %e, "Idle disconnect failed");
                }
                return SweepAction::Disconnected;
            }
        }

        SweepAction::Healthy
    }

    pub async fn sweep(&self, players: &[Arc<ChannelPlayer>]) -> SweepReport {
        let mut report = SweepReport::default();
        for player in players {
            report.record(self.check(player).await);
        }
        report
    }

    /// Sweep every registered channel on a fixed interval until cancelled
    pub fn spawn(self, registry: Registry, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.sweep_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_ms = period.as_millis() as u64,
                stuck_threshold_ms = self.config.stuck_threshold_ms,
                idle_timeout_ms = self.idle_timeout.as_millis() as u64,
                "Idle monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Idle monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let players: Vec<Arc<ChannelPlayer>> =
                            registry.read().await.values().cloned().collect();
                        let report = self.sweep(&players).await;
                        if report.acted() {
                            info!(
                                checked = report.checked,
                                stopped = report.stopped,
                                restarted = report.restarted,
                                disconnected = report.disconnected,
                                "Idle sweep acted"
                            );
                        } else {
                            debug!(checked = report.checked, "Idle sweep found nothing to do");
                        }
                    }
                }
            }
        })
    }
}
