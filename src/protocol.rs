//! Telemetry frame decoding
//!
//! The gateway pushes one protobuf-encoded message per WebSocket frame. The
//! logical shape is a mapping of group keys to inner mappings of packed OBIS
//! identifier to measured value:
//!
//! ```text
//! GdrFrame  { gdrs:   map<string, GdrValues> }
//! GdrValues { values: map<uint64, double>    }
//! ```
//!
//! Frames arrive either as binary WebSocket frames carrying the raw message,
//! or as text frames carrying the same bytes base64-encoded. Decoding
//! flattens the groups away: the group key only distinguishes redundant
//! channels of the same physical meter, so when one display name shows up in
//! several groups the last one decoded wins.

use crate::error::Result;
use crate::obis;
use base64::{engine::general_purpose, Engine as _};
use prost::Message;
use std::collections::HashMap;

/// Inner mapping of packed OBIS identifier to measured value.
#[derive(Clone, PartialEq, Message)]
pub struct GdrValues {
    #[prost(map = "uint64, double", tag = "1")]
    pub values: HashMap<u64, f64>,
}

/// Outer envelope: group key to inner value map.
#[derive(Clone, PartialEq, Message)]
pub struct GdrFrame {
    #[prost(map = "string, message", tag = "1")]
    pub gdrs: HashMap<String, GdrValues>,
}

/// Decode one binary frame into `(display name, value)` readings.
///
/// Output order is deterministic: groups are visited in ascending key order
/// and identifiers in ascending numeric order. A display name repeated
/// across groups keeps its first position but takes the last value decoded.
pub fn decode_frame(raw: &[u8]) -> Result<Vec<(String, f64)>> {
    let frame = GdrFrame::decode(raw)?;

    let mut groups: Vec<(&String, &GdrValues)> = frame.gdrs.iter().collect();
    groups.sort_by(|a, b| a.0.cmp(b.0));

    let mut readings: Vec<(String, f64)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (_, group) in groups {
        let mut entries: Vec<(&u64, &f64)> = group.values.iter().collect();
        entries.sort_by_key(|(id, _)| **id);

        for (id, value) in entries {
            let name = obis::display_name(*id);
            match positions.get(&name) {
                Some(&at) => readings[at].1 = *value,
                None => {
                    positions.insert(name.clone(), readings.len());
                    readings.push((name, *value));
                }
            }
        }
    }

    Ok(readings)
}

/// Decode a text frame: base64 payload wrapping the binary message.
pub fn decode_text_frame(text: &str) -> Result<Vec<(String, f64)>> {
    let raw = general_purpose::STANDARD.decode(text.trim())?;
    decode_frame(&raw)
}
