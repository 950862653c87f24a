//! Record bodies are JSON documents framed by a 4-byte big-endian length.

use serde::{Serialize, de::DeserializeOwned};

use crate::{BusError, Result};

const PREFIX: usize = 4;

pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(body)?;
    let len = u32::try_from(json.len())
        .map_err(|_| BusError::Frame(format!("body of {} bytes is too large", json.len())))?;
    let mut frame = Vec::with_capacity(PREFIX + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    if frame.len() < PREFIX {
        return Err(BusError::Frame(format!(
            "frame of {} bytes has no length prefix",
            frame.len()
        )));
    }
    let (prefix, body) = frame.split_at(PREFIX);
    let declared = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if declared != body.len() {
        return Err(BusError::Frame(format!(
            "length prefix {} does not match body of {} bytes",
            declared,
            body.len()
        )));
    }
    Ok(serde_json::from_slice(body)?)
}
