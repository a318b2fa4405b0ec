pub mod zmq_sub;

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::info;

use crate::core::RiskEvent;
use crate::core::pipeline::RiskSink;
use crate::error::TransportError;

/// How long a closing socket may keep flushing queued messages.
pub const SOCKET_LINGER_MS: i32 = 1000;

/// Bound ZMQ PUB socket. Every message goes out as
/// `[topic, routing_key, json]`.
pub struct ZmqPublisher {
    socket: Mutex<zmq::Socket>,
    topic: String,
}

impl ZmqPublisher {
    pub fn bind(ctx: &zmq::Context, endpoint: &str, topic: &str) -> Result<Self, TransportError> {
        let socket = ctx.socket(zmq::PUB)?;
        socket.set_linger(SOCKET_LINGER_MS)?;
        socket.bind(endpoint)?;
        info!(endpoint, topic, "ZMQ publisher bound");
        Ok(Self {
            socket: Mutex::new(socket),
            topic: topic.to_string(),
        })
    }

    pub fn send_json<T: Serialize>(&self, routing_key: &str, value: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(value)?;
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        socket.send_multipart(
            [self.topic.as_bytes(), routing_key.as_bytes(), body.as_slice()],
            0,
        )?;
        Ok(())
    }
}

impl RiskSink for ZmqPublisher {
    fn name(&self) -> &str {
        "zmq"
    }

    fn publish(&self, routing_key: &str, event: &RiskEvent) -> Result<(), TransportError> {
        self.send_json(routing_key, event)
    }
}
