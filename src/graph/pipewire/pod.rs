//! Conversions between SPA pods and the backend-neutral param types

use std::io::Cursor;

use pipewire as pw;
use pw::spa::param::audio::{AudioFormat as SpaAudioFormat, AudioInfoRaw, MAX_CHANNELS};
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::param::ParamType;
use pw::spa::pod::deserialize::PodDeserializer;
use pw::spa::pod::serialize::PodSerializer;
use pw::spa::pod::{Object, Pod, Property, PropertyFlags, Value, ValueArray};
use pw::spa::utils::{Id, SpaTypes};

use crate::error::{GraphError, GraphResult};
use crate::graph::{AudioChannel, AudioFormat, ParamBlob};

const PROP_VOLUME: u32 = pw::spa::sys::SPA_PROP_volume;
const PROP_MUTE: u32 = pw::spa::sys::SPA_PROP_mute;
const PROP_CHANNEL_VOLUMES: u32 = pw::spa::sys::SPA_PROP_channelVolumes;
const PROP_CHANNEL_MAP: u32 = pw::spa::sys::SPA_PROP_channelMap;

/// `EnumFormat` object offering exactly `format` as interleaved F32LE
pub(super) fn enum_format_value(format: &AudioFormat) -> Value {
    let mut info = AudioInfoRaw::new();
    info.set_format(SpaAudioFormat::F32LE);
    info.set_rate(format.sample_rate);
    info.set_channels(format.channels);

    let mut position = [0u32; MAX_CHANNELS];
    for (slot, channel) in position
        .iter_mut()
        .zip(format.effective_positions().into_iter())
    {
        *slot = channel.as_raw();
    }
    info.set_position(position);

    Value::Object(Object {
        type_: SpaTypes::ObjectParamFormat.as_raw(),
        id: ParamType::EnumFormat.as_raw(),
        properties: info.into(),
    })
}

/// `Props` object carrying whatever fields `blob` has
pub(super) fn props_value(blob: &ParamBlob) -> Value {
    let mut properties = Vec::new();
    let mut push = |key: u32, value: Value| {
        properties.push(Property {
            key,
            flags: PropertyFlags::empty(),
            value,
        })
    };

    if let Some(volume) = blob.volume {
        push(PROP_VOLUME, Value::Float(volume));
    }
    if let Some(mute) = blob.mute {
        push(PROP_MUTE, Value::Bool(mute));
    }
    if !blob.channel_volumes.is_empty() {
        push(
            PROP_CHANNEL_VOLUMES,
            Value::ValueArray(ValueArray::Float(blob.channel_volumes.clone())),
        );
    }
    if !blob.channel_map.is_empty() {
        push(
            PROP_CHANNEL_MAP,
            Value::ValueArray(ValueArray::Id(
                blob.channel_map.iter().map(|c| Id(c.as_raw())).collect(),
            )),
        );
    }

    Value::Object(Object {
        type_: SpaTypes::ObjectParamProps.as_raw(),
        id: ParamType::Props.as_raw(),
        properties,
    })
}

/// Pull volume and mute fields out of a deserialized `Props` object.
///
/// Unknown keys and unexpected value types are skipped.
pub(super) fn blob_from_value(value: &Value) -> ParamBlob {
    let mut blob = ParamBlob::default();
    let Value::Object(object) = value else {
        return blob;
    };

    for property in &object.properties {
        match (property.key, &property.value) {
            (PROP_VOLUME, Value::Float(volume)) => blob.volume = Some(*volume),
            (PROP_MUTE, Value::Bool(mute)) => blob.mute = Some(*mute),
            (PROP_CHANNEL_VOLUMES, Value::ValueArray(ValueArray::Float(volumes))) => {
                blob.channel_volumes = volumes.clone();
            }
            (PROP_CHANNEL_MAP, Value::ValueArray(ValueArray::Id(ids))) => {
                blob.channel_map = ids.iter().map(|id| AudioChannel::from_raw(id.0)).collect();
            }
            _ => {}
        }
    }

    blob
}

pub(super) fn serialize(value: &Value) -> GraphResult<Vec<u8>> {
    PodSerializer::serialize(Cursor::new(Vec::new()), value)
        .map(|(cursor, _)| cursor.into_inner())
        .map_err(|e| GraphError::Pod(format!("{:?}", e)))
}

pub(super) fn as_pod(bytes: &[u8]) -> GraphResult<&Pod> {
    Pod::from_bytes(bytes).ok_or_else(|| GraphError::Pod("malformed pod".to_string()))
}

/// Decode a `Props` pod
pub(super) fn parse_props(pod: &Pod) -> GraphResult<ParamBlob> {
    let (_, value) = PodDeserializer::deserialize_any_from(pod.as_bytes())
        .map_err(|e| GraphError::Pod(format!("{:?}", e)))?;
    Ok(blob_from_value(&value))
}

/// Decode a `Format` pod; `None` when it is not raw audio
pub(super) fn parse_format(pod: &Pod) -> GraphResult<Option<AudioFormat>> {
    let (media_type, media_subtype) =
        format_utils::parse_format(pod).map_err(|e| GraphError::Pod(e.to_string()))?;
    if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
        return Ok(None);
    }

    let mut info = AudioInfoRaw::new();
    info.parse(pod)
        .map_err(|e| GraphError::Pod(format!("{:?}", e)))?;

    let channels = info.channels();
    let positions = info
        .position()
        .iter()
        .take(channels as usize)
        .map(|raw| AudioChannel::from_raw(*raw))
        .collect();

    Ok(Some(AudioFormat {
        sample_rate: info.rate(),
        channels,
        positions,
    }))
}
