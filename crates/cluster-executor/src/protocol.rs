//! Wire protocol between coordinator and workers
//!
//! Every point-to-point message starts with a signal byte:
//!
//! | byte   | direction          | body                                  |
//! |--------|--------------------|---------------------------------------|
//! | `0x00` | worker → coord     | optional single byte: free slots      |
//! | `0x01` | worker → coord     | one JSON [`Response`]                 |
//! | other  | worker → coord     | custom request, opaque                |
//!
//! The coordinator answers both `0x00` and `0x01` with a pull response: a
//! JSON array of [`Request`] envelopes, possibly empty.
//!
//! On the broadcast channel `0x00` alone means "work is pending"; any other
//! first byte is a custom signal followed by an opaque payload.

use serde::{Deserialize, Serialize};

use crate::callable::{CallableError, CallablePayload, CallableResult};
use crate::task::{DistributedTask, TaskId};

/// Broadcast: work is pending
pub const SIGNAL_EXEC: u8 = 0x00;

/// Point-to-point: pull request
pub const REQUEST_EXEC: u8 = 0x00;

/// Point-to-point: result delivery
pub const REQUEST_CALLBACK: u8 = 0x01;

/// Slots assumed when a pull request carries no availability byte
pub const DEFAULT_PULL_SLOTS: usize = 1;

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Message without a signal byte
    #[error("empty message")]
    EmptyMessage,

    /// Signal reserved for internal use
    #[error("signal {0:#04x} is reserved")]
    ReservedSignal(u8),

    /// Envelope could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Work handed to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: TaskId,
    pub callable: CallablePayload,
}

impl Request {
    /// Build the envelope for a pulled task
    ///
    /// Returns `None` if the task already completed and released its payload.
    pub fn from_task(task: &DistributedTask) -> Option<Self> {
        task.payload().map(|callable| Self {
            id: task.id(),
            callable,
        })
    }
}

/// Outcome of a callable as carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(serde_json::Value),
    Error(CallableError),
}

impl From<CallableResult> for Outcome {
    fn from(result: CallableResult) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Error(error),
        }
    }
}

/// Result reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: TaskId,
    pub outcome: Outcome,
}

impl Response {
    /// Build a response from a callable result
    pub fn new(id: TaskId, result: CallableResult) -> Self {
        Self {
            id,
            outcome: result.into(),
        }
    }

    /// Whether the callable raised an error
    pub fn has_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Decoded point-to-point message, as seen by the coordinator
#[derive(Debug)]
pub enum Message<'a> {
    /// Worker asks for up to `slots` tasks
    Pull { slots: usize },
    /// Worker delivers a result; body still encoded
    Callback { body: &'a [u8] },
    /// Anything else
    Custom { signal: u8, body: &'a [u8] },
}

/// Split a point-to-point message into signal and body
pub fn parse_message(bytes: &[u8]) -> Result<Message<'_>, ProtocolError> {
    let (&signal, body) = bytes.split_first().ok_or(ProtocolError::EmptyMessage)?;

    Ok(match signal {
        REQUEST_EXEC => Message::Pull {
            slots: body
                .first()
                .map(|&slots| slots as usize)
                .unwrap_or(DEFAULT_PULL_SLOTS),
        },
        REQUEST_CALLBACK => Message::Callback { body },
        signal => Message::Custom { signal, body },
    })
}

/// Encode a pull request; availability above 255 is clamped
pub fn encode_pull(available: usize) -> Vec<u8> {
    vec![REQUEST_EXEC, available.min(u8::MAX as usize) as u8]
}

/// Encode a callback message carrying one response
pub fn encode_callback(response: &Response) -> Result<Vec<u8>, ProtocolError> {
    let mut buffer = vec![REQUEST_CALLBACK];
    serde_json::to_writer(&mut buffer, response)?;
    Ok(buffer)
}

/// Decode the body of a callback message
pub fn decode_callback(body: &[u8]) -> Result<Response, ProtocolError> {
    Ok(serde_json::from_slice(body)?)
}

/// Encode a pull response
pub fn encode_batch(requests: &[Request]) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(requests)?)
}

/// Pull response carrying no work
pub fn empty_batch() -> Vec<u8> {
    b"[]".to_vec()
}

/// Decode a pull response; an empty body is an empty batch
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Request>, ProtocolError> {
    if bytes.is_empty() {
        return Ok(vec![]);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a custom broadcast signal
pub fn encode_signal(signal: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if signal == SIGNAL_EXEC {
        return Err(ProtocolError::ReservedSignal(signal));
    }

    let mut buffer = Vec::with_capacity(1 + payload.len());
    buffer.push(signal);
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn task_id() -> TaskId {
        TaskId(Uuid::now_v7())
    }

    #[test]
    fn test_parse_pull_with_slots() {
        match parse_message(&[REQUEST_EXEC, 3]).unwrap() {
            Message::Pull { slots } => assert_eq!(slots, 3),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_pull_defaults_to_one_slot() {
        match parse_message(&[REQUEST_EXEC]).unwrap() {
            Message::Pull { slots } => assert_eq!(slots, 1),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_pull_reads_unsigned_byte() {
        match parse_message(&[REQUEST_EXEC, 0xFF]).unwrap() {
            Message::Pull { slots } => assert_eq!(slots, 255),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty_message() {
        assert!(matches!(
            parse_message(&[]),
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[test]
    fn test_parse_custom() {
        match parse_message(&[0x07, 1, 2]).unwrap() {
            Message::Custom { signal, body } => {
                assert_eq!(signal, 0x07);
                assert_eq!(body, &[1, 2]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_encode_pull_clamps() {
        assert_eq!(encode_pull(3), vec![REQUEST_EXEC, 3]);
        assert_eq!(encode_pull(1000), vec![REQUEST_EXEC, 255]);
    }

    #[test]
    fn test_callback_message() {
        let response = Response::new(
            task_id(),
            Err(CallableError::new("DivideByZero", "division by zero")),
        );
        let bytes = encode_callback(&response).unwrap();
        assert_eq!(bytes[0], REQUEST_CALLBACK);

        match parse_message(&bytes).unwrap() {
            Message::Callback { body } => {
                let decoded = decode_callback(body).unwrap();
                assert_eq!(decoded, response);
                assert!(decoded.has_error());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_callback() {
        assert!(matches!(
            decode_callback(b"{not json"),
            Err(ProtocolError::Codec(_))
        ));
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(encode_batch(&[]).unwrap(), empty_batch());
        assert!(decode_batch(b"[]").unwrap().is_empty());
        assert!(decode_batch(b"").unwrap().is_empty());
    }

    #[test]
    fn test_batch_preserves_order() {
        let requests: Vec<Request> = (0..3)
            .map(|n| Request {
                id: task_id(),
                callable: CallablePayload::new("echo", json!(n)),
            })
            .collect();

        let decoded = decode_batch(&encode_batch(&requests).unwrap()).unwrap();
        assert_eq!(decoded, requests);
    }

    #[test]
    fn test_exec_signal_is_reserved() {
        assert!(matches!(
            encode_signal(SIGNAL_EXEC, b"x"),
            Err(ProtocolError::ReservedSignal(0))
        ));
        assert_eq!(encode_signal(0x02, b"ab").unwrap(), vec![0x02, b'a', b'b']);
    }
}
