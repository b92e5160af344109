//! Handles naming backend objects, and their scoped owners

use std::fmt;
use std::sync::Arc;

use super::AudioGraph;

/// Opaque name for an object the mirror asked a backend to create or watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// The daemon connection the backend opens at startup
    pub const MAIN: Handle = Handle(0);

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out handles that are never reused within a process
///
/// Starts above [`Handle::MAIN`].
#[derive(Debug)]
pub struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> Handle {
        let handle = Handle(self.next);
        self.next += 1;
        handle
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one backend object; releases it when dropped
///
/// Entries hold their sessions, streams, remote nodes and observers as
/// `ScopedHandle`s, so every exit path (completion, failure, removal) releases
/// each object exactly once.
pub struct ScopedHandle {
    handle: Handle,
    graph: Arc<dyn AudioGraph>,
}

impl ScopedHandle {
    pub fn new(handle: Handle, graph: Arc<dyn AudioGraph>) -> Self {
        Self { handle, graph }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for ScopedHandle {
    fn drop(&mut self) {
        self.graph.release(self.handle);
    }
}

impl fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedHandle").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::recording::{Call, RecordingGraph};

    #[test]
    fn test_allocator_never_hands_out_main() {
        let mut alloc = HandleAllocator::new();
        let first = alloc.next();
        let second = alloc.next();
        assert_ne!(first, Handle::MAIN);
        assert!(second > first);
    }

    #[test]
    fn test_scoped_handle_releases_once_on_drop() {
        let graph = Arc::new(RecordingGraph::new());
        let scoped = ScopedHandle::new(Handle::from_raw(7), graph.clone());
        assert_eq!(scoped.handle().raw(), 7);
        assert!(graph.calls().is_empty());

        drop(scoped);
        assert_eq!(graph.calls(), vec![Call::Release(Handle::from_raw(7))]);
    }
}
