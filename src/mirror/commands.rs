//! Commands accepted by the mirror actor
//!
//! Graph events travel on their own channel; this one carries control
//! traffic from the runtime shell (config reloads, queries, shutdown).

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;

use super::{CandidateFilter, EntrySummary, MirrorOptions, StallReport};

/// Control messages for [`MirrorActor`](super::MirrorActor)
pub enum MirrorCommand {
    /// Replace the candidate filter, options and stall threshold.
    ///
    /// Live entries keep running; only new discoveries see the new filter.
    Reconfigure {
        filter: Box<dyn CandidateFilter>,
        options: MirrorOptions,
        stall_after: Option<Duration>,
    },

    /// Summaries of every live entry
    Snapshot {
        response: oneshot::Sender<Vec<EntrySummary>>,
    },

    /// Entries not yet bound after `older_than`
    Stalled {
        older_than: Duration,
        response: oneshot::Sender<Vec<StallReport>>,
    },

    /// Tear down every entry and stop the actor
    Shutdown,
}

impl fmt::Debug for MirrorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorCommand::Reconfigure {
                options,
                stall_after,
                ..
            } => f
                .debug_struct("Reconfigure")
                .field("options", options)
                .field("stall_after", stall_after)
                .finish_non_exhaustive(),
            MirrorCommand::Snapshot { .. } => f.write_str("Snapshot"),
            MirrorCommand::Stalled { older_than, .. } => f
                .debug_struct("Stalled")
                .field("older_than", older_than)
                .finish_non_exhaustive(),
            MirrorCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}
