//! Coordinator-side packet handling
//!
//! Answers worker messages synchronously: pull requests are served straight
//! from the execution queue, callbacks are handed to the callback dispatcher.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::callable::CallableError;
use crate::protocol::{
    decode_callback, empty_batch, encode_batch, parse_message, Message, Request, Response,
};
use crate::queue::ExecutionQueue;
use crate::transport::RequestListener;

/// Handles point-to-point messages with a signal other than pull/callback
pub trait CustomRequestHandler: Send + Sync {
    /// Produce the reply to a custom request
    fn on_custom_request(&self, signal: u8, payload: &[u8]) -> Vec<u8>;
}

/// Message consumed by the callback dispatcher
#[derive(Debug)]
pub(crate) enum CallbackMessage {
    Response(Response),
    Poison,
}

pub(crate) struct PacketListener {
    queue: Arc<ExecutionQueue>,
    callbacks: mpsc::UnboundedSender<CallbackMessage>,
    custom: RwLock<Option<Arc<dyn CustomRequestHandler>>>,
}

impl PacketListener {
    pub(crate) fn new(
        queue: Arc<ExecutionQueue>,
        callbacks: mpsc::UnboundedSender<CallbackMessage>,
    ) -> Self {
        Self {
            queue,
            callbacks,
            custom: RwLock::new(None),
        }
    }

    pub(crate) fn set_custom_handler(&self, handler: Arc<dyn CustomRequestHandler>) {
        *self.custom.write() = Some(handler);
    }

    /// Pull up to `slots` tasks and encode them as a pull response
    fn encode_requests(&self, slots: usize) -> Vec<u8> {
        let mut requests = Vec::new();

        for _ in 0..slots {
            let Some(task) = self.queue.pull_next() else {
                break;
            };

            // None when cancelled right after the pull
            if let Some(request) = Request::from_task(&task) {
                requests.push(request);
            }
        }

        if requests.is_empty() {
            return empty_batch();
        }

        match encode_batch(&requests) {
            Ok(bytes) => {
                debug!(count = requests.len(), "Handing out tasks");
                bytes
            }
            Err(e) => {
                error!("Failed to encode pull response: {}", e);
                for request in &requests {
                    if let Some(task) = self.queue.complete_running(&request.id) {
                        task.set_exception(CallableError::new("Encode", e.to_string()));
                    }
                }
                empty_batch()
            }
        }
    }

    fn on_exec_request(&self, slots: usize) -> Vec<u8> {
        trace!(slots, "Pull request received");
        self.encode_requests(slots)
    }

    fn on_callback_request(&self, body: &[u8]) -> Vec<u8> {
        let response = match decode_callback(body) {
            Ok(response) => response,
            Err(e) => {
                error!("Dropping malformed callback: {}", e);
                return empty_batch();
            }
        };

        trace!(task_id = %response.id, error = response.has_error(), "Callback received");

        if self
            .callbacks
            .send(CallbackMessage::Response(response))
            .is_err()
        {
            debug!("Callback dispatcher stopped, dropping response");
        }

        self.encode_requests(1)
    }

    fn on_custom_request(&self, signal: u8, body: &[u8]) -> Vec<u8> {
        let handler = self.custom.read().clone();
        match handler {
            Some(handler) => handler.on_custom_request(signal, body),
            None => {
                warn!(signal, "No handler for custom request");
                Vec::new()
            }
        }
    }
}

impl RequestListener for PacketListener {
    fn on_request_received(&self, payload: &[u8]) -> Vec<u8> {
        match parse_message(payload) {
            Ok(Message::Pull { slots }) => self.on_exec_request(slots),
            Ok(Message::Callback { body }) => self.on_callback_request(body),
            Ok(Message::Custom { signal, body }) => self.on_custom_request(signal, body),
            Err(e) => {
                error!("Dropping malformed message: {}", e);
                Vec::new()
            }
        }
    }
}
