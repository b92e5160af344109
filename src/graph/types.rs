//! Plain data carried across the audio-graph seam
//!
//! These types are backend-neutral: the PipeWire backend converts SPA pods to
//! and from them, the recording graph stores them as-is.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Global id of an original endpoint in the server's object directory
pub type EndpointId = u32;

/// String properties of a global object or node info
pub type Properties = BTreeMap<String, String>;

/// Property keys the mirror reads and writes
pub mod keys {
    pub const APP_NAME: &str = "application.name";
    pub const APP_ICON_NAME: &str = "application.icon-name";
    pub const APP_PROCESS_BINARY: &str = "application.process.binary";
    pub const MEDIA_CLASS: &str = "media.class";
    pub const MEDIA_NAME: &str = "media.name";
    pub const MEDIA_TYPE: &str = "media.type";
    pub const NODE_NAME: &str = "node.name";

    /// Object type string of audio nodes in the directory
    pub const NODE_TYPE: &str = "PipeWire:Interface:Node";
}

/// Parameter kinds the mirror subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Negotiated audio format
    Format,
    /// Volume, mute and channel layout
    Props,
}

/// Speaker position of one channel
///
/// Discriminants follow the SPA `spa_audio_channel` numbering so backends can
/// convert with [`AudioChannel::from_raw`] / [`AudioChannel::as_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioChannel {
    Mono,
    FL,
    FR,
    FC,
    LFE,
    SL,
    SR,
    FLC,
    FRC,
    RC,
    RL,
    RR,
    Unknown(u32),
}

impl AudioChannel {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            2 => Self::Mono,
            3 => Self::FL,
            4 => Self::FR,
            5 => Self::FC,
            6 => Self::LFE,
            7 => Self::SL,
            8 => Self::SR,
            9 => Self::FLC,
            10 => Self::FRC,
            11 => Self::RC,
            12 => Self::RL,
            13 => Self::RR,
            other => Self::Unknown(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::Mono => 2,
            Self::FL => 3,
            Self::FR => 4,
            Self::FC => 5,
            Self::LFE => 6,
            Self::SL => 7,
            Self::SR => 8,
            Self::FLC => 9,
            Self::FRC => 10,
            Self::RC => 11,
            Self::RL => 12,
            Self::RR => 13,
            Self::Unknown(raw) => raw,
        }
    }

    /// Conventional layout for a channel count, used when the original
    /// reported no positions.
    pub fn default_layout(channels: u32) -> Vec<AudioChannel> {
        use AudioChannel::*;
        match channels {
            1 => vec![Mono],
            2 => vec![FL, FR],
            3 => vec![FL, FR, LFE],
            4 => vec![FL, FR, RL, RR],
            5 => vec![FL, FR, FC, RL, RR],
            6 => vec![FL, FR, FC, LFE, RL, RR],
            8 => vec![FL, FR, FC, LFE, RL, RR, SL, SR],
            n => (0..n).map(|_| Unknown(0)).collect(),
        }
    }
}

impl std::fmt::Display for AudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioChannel::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Raw audio format of an endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    /// One entry per channel; may be empty when the server sent none
    pub positions: Vec<AudioChannel>,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u32) -> Self {
        Self {
            sample_rate,
            channels,
            positions: AudioChannel::default_layout(channels),
        }
    }

    /// Positions to advertise for the shadow, falling back to the default
    /// layout when the original did not report a complete map.
    pub fn effective_positions(&self) -> Vec<AudioChannel> {
        if self.positions.len() == self.channels as usize {
            self.positions.clone()
        } else {
            AudioChannel::default_layout(self.channels)
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// Volume and mute parameters pushed between endpoints
///
/// Absent fields were not present in the server's parameter object and are
/// left untouched on the receiving side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamBlob {
    pub volume: Option<f32>,
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_volumes: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_map: Vec<AudioChannel>,
}

impl ParamBlob {
    pub fn volume_mute(volume: f32, mute: bool) -> Self {
        Self {
            volume: Some(volume),
            mute: Some(mute),
            ..Default::default()
        }
    }

    /// True when the blob carries nothing worth pushing
    pub fn is_empty(&self) -> bool {
        self.volume.is_none()
            && self.mute.is_none()
            && self.channel_volumes.is_empty()
            && self.channel_map.is_empty()
    }
}

/// Decoded parameter carried by a node param event
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Format(AudioFormat),
    Props(ParamBlob),
    /// Any other parameter id; carried so callers can log it
    Other(u32),
}

/// Stream states as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Error(String),
    Unconnected,
    Connecting,
    /// Format negotiated and buffers set up; the stream is ready
    Paused,
    Streaming,
}

impl StreamState {
    pub fn is_ready(&self) -> bool {
        matches!(self, StreamState::Paused)
    }
}

/// Connection flags for the shadow stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFlags {
    /// Let the session manager route the stream
    pub autoconnect: bool,
    /// Map buffers into the client's address space
    pub map_buffers: bool,
}

impl Default for ConnectFlags {
    fn default() -> Self {
        Self {
            autoconnect: true,
            map_buffers: true,
        }
    }
}

/// Everything a backend needs to create and connect a shadow stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSpec {
    /// Stream name (the original's media name)
    pub name: String,
    /// Properties attached to the stream node
    pub properties: Properties,
    /// Single format offered in the `EnumFormat` parameter
    pub format: AudioFormat,
    pub flags: ConnectFlags,
}
