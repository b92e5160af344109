//! MirrorHandle - public API for the MirrorActor
//!
//! Fire-and-forget methods for control traffic, async methods with oneshot
//! channels for queries. Graph events do not go through the handle; the
//! backend feeds the actor's event channel directly.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::commands::MirrorCommand;
use super::{AppNameFilter, CandidateFilter, EntrySummary, MirrorOptions, StallReport};
use crate::config::AppConfig;

/// Handle for interacting with the MirrorActor
///
/// # Fire-and-forget
/// - `apply_config` / `reconfigure` - swap filter, options and stall threshold
/// - `shutdown` - tear down every entry and stop the actor
///
/// # Queries
/// - `snapshot` - summaries of live entries
/// - `stalled` - entries pending longer than a given age
#[derive(Clone)]
pub struct MirrorHandle {
    cmd_tx: mpsc::UnboundedSender<MirrorCommand>,
}

impl MirrorHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<MirrorCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Apply a (reloaded) configuration to the running mirror
    pub fn apply_config(&self, config: &AppConfig) {
        self.reconfigure(
            Box::new(AppNameFilter::from_config(&config.matching)),
            MirrorOptions::from_config(config),
            config.stall_after(),
        );
    }

    pub fn reconfigure(
        &self,
        filter: Box<dyn CandidateFilter>,
        options: MirrorOptions,
        stall_after: Option<Duration>,
    ) {
        let _ = self.cmd_tx.send(MirrorCommand::Reconfigure {
            filter,
            options,
            stall_after,
        });
    }

    /// Ask the actor to release everything and stop
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(MirrorCommand::Shutdown);
    }

    /// True while the actor's run loop is alive
    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Summaries of every live entry; empty once the actor has stopped
    pub async fn snapshot(&self) -> Vec<EntrySummary> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = MirrorCommand::Snapshot {
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }

    /// Entries still short of bound after `older_than`
    pub async fn stalled(&self, older_than: Duration) -> Vec<StallReport> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = MirrorCommand::Stalled {
            older_than,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }
}
