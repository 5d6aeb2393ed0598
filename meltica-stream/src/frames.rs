//! Control-frame shapes shared by every venue's SUBSCRIBE/UNSUBSCRIBE wire format, plus the
//! response envelope the read loop checks text frames against.

use serde::{Deserialize, Serialize};

/// Maximum stream names per SUBSCRIBE/UNSUBSCRIBE control frame.
pub const MAX_STREAMS_PER_FRAME: usize = 100;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMethod {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ControlFrame {
    pub method: ControlMethod,
    pub params: Vec<String>,
    pub id: u64,
}

/// Splits `streams` into chunks of at most [`MAX_STREAMS_PER_FRAME`] entries, one
/// [`ControlFrame`] per chunk, each with its own request id drawn from `next_id`.
pub fn chunk_control_frames(method: ControlMethod, streams: &[String], mut next_id: impl FnMut() -> u64) -> Vec<ControlFrame> {
    streams
        .chunks(MAX_STREAMS_PER_FRAME)
        .map(|chunk| ControlFrame { method, params: chunk.to_vec(), id: next_id() })
        .collect()
}

/// A control-response envelope, present on frames that reply to a request `id`. Binary frames
/// and data frames with no (or a zero) `id` never parse as this.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<ControlResponseError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponseError {
    pub code: i64,
    pub msg: String,
}

/// Attempts to parse `text` as a [`ControlResponse`] with a non-zero id. Plain market-data
/// frames fail this (no `id` field, or `id` is absent/zero) and fall through to the message
/// handler instead.
pub fn parse_control_response(text: &str) -> Option<ControlResponse> {
    let response: ControlResponse = serde_json::from_str(text).ok()?;
    if response.id == 0 {
        return None;
    }
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_streams_at_the_configured_boundary() {
        let streams: Vec<String> = (0..250).map(|i| format!("s{i}")).collect();
        let mut id = 0u64;
        let frames = chunk_control_frames(ControlMethod::Subscribe, &streams, || {
            id += 1;
            id
        });
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].params.len(), 100);
        assert_eq!(frames[2].params.len(), 50);
        assert_eq!(frames.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn parse_control_response_rejects_frames_without_an_id() {
        assert!(parse_control_response(r#"{"stream":"btcusdt@trade","data":{}}"#).is_none());
    }

    #[test]
    fn parse_control_response_accepts_a_matching_envelope() {
        let response = parse_control_response(r#"{"id":7,"result":null}"#).unwrap();
        assert_eq!(response.id, 7);
        assert!(response.error.is_none());
    }
}
