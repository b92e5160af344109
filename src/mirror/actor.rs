//! MirrorActor - owns the mirror and drains graph events on one task
//!
//! The mirror is never shared: every graph event, control command and stall
//! check is processed sequentially by the actor's run loop, so no mirror state
//! is locked.
//!
//! ```text
//!   backend thread ──GraphEvent──►┐
//!                                 ├──► MirrorActor ──► Mirror
//!   MirrorHandle ──MirrorCommand─►┘         ▲
//!                                           └── stall ticker
//! ```

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::actor_handle::MirrorHandle;
use super::commands::MirrorCommand;
use super::Mirror;
use crate::graph::{EndpointId, GraphEvent};

/// How often pending entries are checked against the stall threshold
pub const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub struct MirrorActor {
    mirror: Mirror,
    events_rx: mpsc::UnboundedReceiver<GraphEvent>,
    command_rx: mpsc::UnboundedReceiver<MirrorCommand>,
    /// None disables the stall warning
    stall_after: Option<Duration>,
    /// Entries already warned about, so each stall is logged once
    reported: HashSet<EndpointId>,
}

impl MirrorActor {
    /// Spawn the actor's run loop on the current runtime.
    ///
    /// # Arguments
    ///
    /// * `mirror` - Controller to own; usually fresh and empty
    /// * `events_rx` - Events from the audio-graph backend
    /// * `stall_after` - Age after which a pending entry is reported
    ///
    /// # Returns
    ///
    /// A handle for control traffic and the task running the loop. The task
    /// finishes after [`MirrorHandle::shutdown`], when every handle is dropped,
    /// or when the backend closes the event channel.
    pub fn spawn(
        mirror: Mirror,
        events_rx: mpsc::UnboundedReceiver<GraphEvent>,
        stall_after: Option<Duration>,
    ) -> (MirrorHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = MirrorActor {
            mirror,
            events_rx,
            command_rx: cmd_rx,
            stall_after,
            reported: HashSet::new(),
        };

        let task = tokio::spawn(actor.run());
        info!("MirrorActor spawned");

        (MirrorHandle::new(cmd_tx), task)
    }

    async fn run(mut self) {
        debug!("MirrorActor run loop started");

        let mut stall_ticker = tokio::time::interval(STALL_CHECK_INTERVAL);
        stall_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Pending graph events go first so queries see them applied
                biased;

                event = self.events_rx.recv() => match event {
                    Some(event) => self.mirror.handle_event(event),
                    None => {
                        warn!("Graph event channel closed, stopping mirror");
                        break;
                    }
                },
                cmd = self.command_rx.recv() => match cmd {
                    Some(MirrorCommand::Shutdown) | None => {
                        debug!("MirrorActor shutdown requested");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },
                _ = stall_ticker.tick() => self.report_stalls(Instant::now()),
            }
        }

        self.mirror.shutdown();
        debug!("MirrorActor run loop ended");
    }

    fn handle_command(&mut self, cmd: MirrorCommand) {
        trace!(?cmd, "Processing command");

        match cmd {
            MirrorCommand::Reconfigure {
                filter,
                options,
                stall_after,
            } => {
                self.mirror.reconfigure(filter, options);
                self.stall_after = stall_after;
                self.reported.clear();
            }
            MirrorCommand::Snapshot { response } => {
                let _ = response.send(self.mirror.snapshot());
            }
            MirrorCommand::Stalled {
                older_than,
                response,
            } => {
                let _ = response.send(self.mirror.stalled(Instant::now(), older_than));
            }
            MirrorCommand::Shutdown => {}
        }
    }

    fn report_stalls(&mut self, now: Instant) {
        let Some(threshold) = self.stall_after else {
            return;
        };

        let stalled = self.mirror.stalled(now, threshold);
        self.reported
            .retain(|id| stalled.iter().any(|report| report.endpoint == *id));

        for report in stalled {
            if self.reported.insert(report.endpoint) {
                warn!(
                    endpoint = report.endpoint,
                    stage = report.stage.name(),
                    age_secs = report.age.as_secs(),
                    "Endpoint has not reached bound state"
                );
            }
        }
    }
}
