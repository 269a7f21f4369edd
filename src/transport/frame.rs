//! Chunk and end frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::transport::{TransportError, TransportResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Chunk {
        id: String,
        index: u32,
        count: u32,
        /// Base64 slice of the message.
        data: String,
    },
    End {
        id: String,
    },
}

impl Frame {
    pub fn id(&self) -> &str {
        match self {
            Frame::Chunk { id, .. } | Frame::End { id } => id,
        }
    }

    pub fn parse(bytes: &[u8]) -> TransportResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TransportError::Encode(e.to_string()))
    }
}

/// Raw bytes carried by one chunk of `chunk_size` encoded characters.
pub fn raw_chunk_len(chunk_size: usize) -> usize {
    (chunk_size / 4).max(1) * 3
}

/// Split `payload` into chunk frames followed by an end frame.
///
/// An empty payload still produces one (empty) chunk so the receiver can
/// tell "empty message" from "nothing arrived".
pub fn split_message(id: &str, payload: &[u8], chunk_size: usize) -> Vec<Frame> {
    let raw = raw_chunk_len(chunk_size);
    let pieces: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(raw).collect()
    };
    let count = pieces.len() as u32;

    let mut frames: Vec<Frame> = pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| Frame::Chunk {
            id: id.to_string(),
            index: index as u32,
            count,
            data: STANDARD.encode(piece),
        })
        .collect();
    frames.push(Frame::End { id: id.to_string() });
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let frames = split_message("m1", b"abc", 160);
        let chunk = serde_json::to_value(&frames[0]).unwrap();
        assert_eq!(chunk["type"], "chunk");
        assert_eq!(chunk["id"], "m1");
        assert_eq!(chunk["index"], 0);
        assert_eq!(chunk["count"], 1);
        assert_eq!(chunk["data"], "YWJj");

        let end = serde_json::to_value(&frames[1]).unwrap();
        assert_eq!(end, serde_json::json!({"type": "end", "id": "m1"}));
    }

    #[test]
    fn test_encoded_chunks_respect_size() {
        let payload = vec![7u8; 1000];
        let frames = split_message("m", &payload, 160);
        assert_eq!(frames.len(), 1000usize.div_ceil(120) + 1);
        for frame in &frames {
            if let Frame::Chunk { data, .. } = frame {
                assert!(data.len() <= 160);
            }
        }
    }

    #[test]
    fn test_empty_payload_has_one_chunk() {
        let frames = split_message("m", b"", 160);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Chunk { count: 1, data, .. } if data.is_empty()));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(Frame::parse(br#"{"type":"chunk","id":"x"}"#).is_err());
        assert!(Frame::parse(br#"{"type":"bogus","id":"x"}"#).is_err());
        assert_eq!(
            Frame::parse(br#"{"type":"end","id":"x"}"#).unwrap(),
            Frame::End { id: "x".into() }
        );
    }
}
