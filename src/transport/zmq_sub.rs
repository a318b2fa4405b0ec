use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::TransportConfig;
use crate::core::InboundMessage;
use crate::error::TransportError;
use crate::transport::SOCKET_LINGER_MS;

/// The two socket calls the reader loop makes.
pub trait FrameSource {
    /// Wait up to `timeout_ms` for a message. Returns whether one is ready.
    fn wait_readable(&self, timeout_ms: i64) -> Result<bool, zmq::Error>;
    fn recv_frames(&self) -> Result<Vec<Vec<u8>>, zmq::Error>;
}

impl FrameSource for zmq::Socket {
    fn wait_readable(&self, timeout_ms: i64) -> Result<bool, zmq::Error> {
        let mut items = [self.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut items, timeout_ms)?;
        Ok(items[0].is_readable())
    }

    fn recv_frames(&self) -> Result<Vec<Vec<u8>>, zmq::Error> {
        self.recv_multipart(zmq::DONTWAIT)
    }
}

/// ZMQ subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub endpoint: String,
    pub topic: String,
    /// Upper bound on how long a stop request goes unnoticed.
    pub poll_timeout: Duration,
    /// Pause after a transport error before reading again.
    pub read_backoff: Duration,
}

impl From<&TransportConfig> for SubscriberConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            endpoint: config.signals_endpoint.clone(),
            topic: config.signals_topic.clone(),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms.max(1)),
            read_backoff: Duration::from_millis(config.read_backoff_ms),
        }
    }
}

/// Split a multipart message.
/// Format: `[topic, routing_key, json]`, or `[topic, json]` without a key.
pub fn parse_frames(mut frames: Vec<Vec<u8>>) -> Option<InboundMessage> {
    match frames.len() {
        2 => Some(InboundMessage {
            routing_key: None,
            payload: frames.pop()?,
        }),
        3 => {
            let payload = frames.pop()?;
            let routing_key = frames.pop().and_then(|k| String::from_utf8(k).ok());
            Some(InboundMessage { routing_key, payload })
        }
        _ => None,
    }
}

/// Connect the signal subscriber and start its reader thread (the zmq crate
/// is synchronous). Connection errors are returned before the thread starts.
///
/// The thread forwards every message into `tx` and exits when `stop` is set
/// or the receiving side goes away.
pub fn start_signal_subscriber(
    ctx: &zmq::Context,
    config: SubscriberConfig,
    tx: mpsc::UnboundedSender<InboundMessage>,
    stop: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>, TransportError> {
    let socket = ctx.socket(zmq::SUB)?;
    socket.set_linger(SOCKET_LINGER_MS)?;
    socket.connect(&config.endpoint)?;
    socket.set_subscribe(config.topic.as_bytes())?;
    info!(endpoint = %config.endpoint, topic = %config.topic, "ZMQ signal subscriber connected");

    Ok(std::thread::spawn(move || run_subscriber(socket, config, tx, stop)))
}

fn run_subscriber<S: FrameSource>(
    socket: S,
    config: SubscriberConfig,
    tx: mpsc::UnboundedSender<InboundMessage>,
    stop: Arc<AtomicBool>,
) {
    let timeout_ms = config.poll_timeout.as_millis() as i64;
    let mut received: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        match socket.wait_readable(timeout_ms) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                error!("ZMQ poll error: {e}");
                std::thread::sleep(config.read_backoff);
                continue;
            }
        }

        match socket.recv_frames() {
            Ok(frames) => match parse_frames(frames) {
                Some(msg) => {
                    received += 1;
                    if tx.send(msg).is_err() {
                        info!("Channel closed, stopping ZMQ subscriber");
                        return;
                    }
                }
                None => warn!("Unexpected signal message format"),
            },
            Err(zmq::Error::EAGAIN) => {}
            Err(e) => {
                error!("ZMQ recv error: {e}");
                std::thread::sleep(config.read_backoff);
            }
        }
    }

    info!("ZMQ subscriber stopped after {received} messages");
}
