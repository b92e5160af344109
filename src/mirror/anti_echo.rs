//! Anti-echo parameter sync between an original and its shadow
//!
//! Pushing a parameter blob to one side makes that side report the same blob
//! back as a change notification. A single suppression flag per session breaks
//! the cycle: whichever side changes first sets the flag and pushes to its
//! peer, and the peer's echo clears the flag instead of being pushed back. Each
//! genuine change therefore produces exactly one push.

use tracing::{debug, trace, warn};

use crate::graph::{EndpointId, Handle, ParamBlob, ScopedHandle};

/// Which side reported a parameter change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Shadow,
    Original,
}

impl Side {
    fn peer(self) -> Side {
        match self {
            Side::Shadow => Side::Original,
            Side::Original => Side::Shadow,
        }
    }
}

/// Outcome of a parameter change on a sync session
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Push the blob to the given node
    Push { target: Handle, blob: ParamBlob },
    /// The change was the echo of our own push
    SwallowEcho,
}

/// Steady-state sync between a bound shadow and its original
#[derive(Debug)]
pub struct SyncSession {
    /// Param observers on both sides, in creation order
    observers: Vec<ScopedHandle>,
    shadow_remote: ScopedHandle,
    /// Owned by the entry; the session only pushes to it
    original_remote: Handle,
    last_blob: Option<ParamBlob>,
    feedback_suppressed: bool,
}

impl SyncSession {
    pub fn new(
        shadow_remote: ScopedHandle,
        original_remote: Handle,
        observers: Vec<ScopedHandle>,
    ) -> Self {
        Self {
            observers,
            shadow_remote,
            original_remote,
            last_blob: None,
            feedback_suppressed: false,
        }
    }

    pub fn shadow_remote(&self) -> Handle {
        self.shadow_remote.handle()
    }

    pub fn original_remote(&self) -> Handle {
        self.original_remote
    }

    pub fn last_blob(&self) -> Option<&ParamBlob> {
        self.last_blob.as_ref()
    }

    pub fn is_suppressed(&self) -> bool {
        self.feedback_suppressed
    }

    pub fn observer_handles(&self) -> Vec<Handle> {
        self.observers.iter().map(ScopedHandle::handle).collect()
    }

    fn remote(&self, side: Side) -> Handle {
        match side {
            Side::Shadow => self.shadow_remote.handle(),
            Side::Original => self.original_remote,
        }
    }

    /// Record a change reported by `side` and decide what to do with it.
    pub fn on_changed(&mut self, side: Side, blob: ParamBlob) -> SyncAction {
        if self.feedback_suppressed {
            self.feedback_suppressed = false;
            return SyncAction::SwallowEcho;
        }

        self.feedback_suppressed = true;
        self.last_blob = Some(blob.clone());
        SyncAction::Push {
            target: self.remote(side.peer()),
            blob,
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        // Newest observer first; the shadow remote field drops afterwards.
        while let Some(observer) = self.observers.pop() {
            drop(observer);
        }
    }
}

impl super::Mirror {
    /// Apply a Props change reported by `side` of the entry for `id`.
    pub(super) fn on_params_changed(&mut self, id: EndpointId, side: Side, blob: ParamBlob) {
        if blob.is_empty() {
            trace!(endpoint = id, ?side, "Ignoring empty props");
            return;
        }

        let Some(sync) = self.store.find_mut(id).and_then(|entry| entry.sync.as_mut()) else {
            trace!(endpoint = id, ?side, "Props change without sync session");
            return;
        };

        match sync.on_changed(side, blob) {
            SyncAction::SwallowEcho => {
                trace!(endpoint = id, ?side, "Swallowed echo of pushed props");
            }
            SyncAction::Push { target, blob } => {
                debug!(
                    endpoint = id,
                    from = ?side,
                    volume = ?blob.volume,
                    mute = ?blob.mute,
                    "Syncing props to {:?}",
                    side.peer()
                );
                if let Err(e) = self.graph.push_params(target, &blob) {
                    warn!(endpoint = id, error = %e, "Failed to push props");
                }
            }
        }
    }
}
