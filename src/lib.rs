//! pw-shadow - shadow outputs for application audio streams
//!
//! Watches the PipeWire object directory for candidate application streams,
//! gives each one a synthetic "shadow" output stream with the same audio
//! format, and keeps volume and mute in sync between the two in both
//! directions for as long as both exist.
//!
//! The coordinator ([`mirror::Mirror`]) only talks to the audio server through
//! the [`graph::AudioGraph`] trait and the [`graph::GraphEvent`] stream, so it
//! runs unchanged against the native backend (feature `pipewire`) or the
//! in-memory [`graph::recording::RecordingGraph`].

pub mod config;
pub mod error;
pub mod graph;
pub mod mirror;
pub mod paths;

pub use config::AppConfig;
pub use error::{GraphError, GraphResult};
pub use mirror::{Mirror, MirrorActor, MirrorHandle, MirrorOptions};
