//! Realtime progress channel
//!
//! One websocket per watched task. A supervisor task owns the socket, turns
//! inbound frames into [`ChannelEvent`]s and reconnects with exponential
//! backoff after abnormal closes. Consumers read the event stream returned
//! by [`RealtimeChannel::connect`]; dropping it closes the connection.

use super::backoff::ReconnectBackoff;
use crate::api::{ChannelMessage, ProgressEvent};
use crate::config::RealtimeConfig;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    /// Waiting out a backoff delay after an abnormal close
    Reconnecting,
    Closing,
}

/// Why the event stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Server closed with the normal-closure code
    Normal,
    /// Reconnect attempts ran out
    Exhausted { attempts: u32 },
    /// Closed from this side, or the consumer went away
    Disconnected,
}

/// Item of the per-connection event stream
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Progress(ProgressEvent),
    /// Error frame; `task_id` is the task the backend named, if any
    Error {
        task_id: Option<String>,
        message: String,
    },
    Reconnecting { attempt: u32, delay: Duration },
    Closed(CloseReason),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    #[error("Abnormal close: {0}")]
    AbnormalClose(String),
}

struct ActiveConnection {
    task_id: String,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

impl ActiveConnection {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("Channel supervisor for task {} panicked: {}", self.task_id, e);
            }
        }
    }
}

/// Realtime channel; at most one task connection at a time
pub struct RealtimeChannel {
    base_url: Url,
    config: RealtimeConfig,
    state: Arc<watch::Sender<ChannelState>>,
    active: Mutex<Option<ActiveConnection>>,
}

impl RealtimeChannel {
    pub fn new(base_url: &str, config: RealtimeConfig) -> Result<Self, ChannelError> {
        let base_url = Url::parse(base_url).map_err(|e| ChannelError::InvalidUrl(e.to_string()))?;
        if base_url.scheme() != "ws" && base_url.scheme() != "wss" {
            return Err(ChannelError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                base_url.scheme()
            )));
        }

        let (state, _) = watch::channel(ChannelState::Disconnected);
        Ok(Self {
            base_url,
            config,
            state: Arc::new(state),
            active: Mutex::new(None),
        })
    }

    /// `{base}/ws/tasks/{task_id}`
    pub fn task_url(&self, task_id: &str) -> Result<Url, ChannelError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["ws", "tasks", task_id]);
        Ok(url)
    }

    /// Open the channel for a task and return its event stream.
    ///
    /// Any connection already held (for this or another task) is closed first.
    pub async fn connect(
        &self,
        task_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ChannelError> {
        let url = self.task_url(task_id)?;

        if let Some(previous) = self.take_active() {
            info!(
                "Closing channel for task {} before opening task {}",
                previous.task_id, task_id
            );
            self.state.send_replace(ChannelState::Closing);
            previous.shutdown().await;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.state.send_replace(ChannelState::Connecting);
        let supervisor = Supervisor {
            url,
            task_id: task_id.to_string(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            events: events_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(supervisor.run());

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveConnection {
            task_id: task_id.to_string(),
            cancel,
            outbound: outbound_tx,
            handle,
        });

        Ok(events_rx)
    }

    /// Close with the normal-closure code and cancel any pending reconnect.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if let Some(active) = self.take_active() {
            info!("Disconnecting channel for task {}", active.task_id);
            self.state.send_replace(ChannelState::Closing);
            active.shutdown().await;
        }
        self.state.send_replace(ChannelState::Disconnected);
    }

    /// Best-effort send; logged and dropped unless the channel is open
    pub fn send(&self, message: impl Into<String>) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(active) if self.state() == ChannelState::Open => {
                if active.outbound.send(message.into()).is_err() {
                    warn!("Channel for task {} is gone, message dropped", active.task_id);
                }
            }
            _ => warn!("Channel is not open ({:?}), message dropped", self.state()),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Task the channel is currently bound to
    pub fn current_task(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.task_id.clone())
    }

    fn take_active(&self) -> Option<ActiveConnection> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(active) = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            active.cancel.cancel();
        }
    }
}

/// Owns the socket for one task across reconnects
struct Supervisor {
    url: Url,
    task_id: String,
    config: RealtimeConfig,
    state: Arc<watch::Sender<ChannelState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let mut backoff = ReconnectBackoff::from(&self.config);
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);

        let reason = loop {
            self.state.send_replace(ChannelState::Connecting);
            debug!("Connecting to {}", self.url);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break CloseReason::Disconnected,
                _ = self.events.closed() => break CloseReason::Disconnected,
                result = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str())) => result,
            };

            let failure = match attempt {
                Ok(Ok((ws, _))) => {
                    backoff.reset();
                    self.state.send_replace(ChannelState::Open);
                    info!("Channel open for task {}", self.task_id);
                    let _ = self.events.send(ChannelEvent::Open);

                    match self.pump(ws).await {
                        Ok(reason) => break reason,
                        Err(e) => e,
                    }
                }
                Ok(Err(e)) => ChannelError::WebSocket(e.to_string()),
                Err(_) => ChannelError::Timeout(connect_timeout),
            };

            let Some(delay) = backoff.next_delay() else {
                warn!(
                    "Channel for task {} lost ({}); giving up after {} reconnect attempts",
                    self.task_id,
                    failure,
                    backoff.max_attempts()
                );
                break CloseReason::Exhausted {
                    attempts: backoff.max_attempts(),
                };
            };

            let attempt = backoff.attempt();
            warn!(
                "Channel for task {} lost ({}); reconnect {}/{} in {:?}",
                self.task_id,
                failure,
                attempt,
                backoff.max_attempts(),
                delay
            );
            self.state.send_replace(ChannelState::Reconnecting);
            let _ = self.events.send(ChannelEvent::Reconnecting { attempt, delay });

            tokio::select! {
                _ = self.cancel.cancelled() => break CloseReason::Disconnected,
                _ = self.events.closed() => break CloseReason::Disconnected,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.state.send_replace(ChannelState::Disconnected);
        info!("Channel for task {} closed: {:?}", self.task_id, reason);
        let _ = self.events.send(ChannelEvent::Closed(reason));
    }

    /// Drive one open socket. `Ok` ends the channel, `Err` asks for a reconnect.
    async fn pump(&mut self, ws: WsStream) -> Result<CloseReason, ChannelError> {
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    close_normally(&mut write).await;
                    return Ok(CloseReason::Disconnected);
                }
                _ = self.events.closed() => {
                    debug!("Event stream for task {} dropped, closing channel", self.task_id);
                    close_normally(&mut write).await;
                    return Ok(CloseReason::Disconnected);
                }
                Some(text) = self.outbound.recv() => {
                    write
                        .send(Message::Text(text))
                        .await
                        .map_err(|e| ChannelError::WebSocket(e.to_string()))?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(Some(frame)))) if frame.code == CloseCode::Normal => {
                        info!("Server closed channel for task {}", self.task_id);
                        return Ok(CloseReason::Normal);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let detail = frame
                            .map(|f| format!("code {} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "no close code".to_string());
                        return Err(ChannelError::AbnormalClose(detail));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ChannelError::WebSocket(e.to_string())),
                    None => {
                        return Err(ChannelError::AbnormalClose(
                            "connection dropped without close frame".to_string(),
                        ));
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ChannelMessage>(text) {
            Ok(ChannelMessage::Progress(event)) => {
                let _ = self.events.send(ChannelEvent::Progress(event));
            }
            Ok(ChannelMessage::Error(error)) => {
                let message = error
                    .error_message
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!("Task {} reported error: {}", self.task_id, message);
                let _ = self.events.send(ChannelEvent::Error {
                    task_id: error.task_id,
                    message,
                });
            }
            Err(e) => {
                warn!("Dropping malformed frame on task {} channel: {}", self.task_id, e);
            }
        }
    }
}

async fn close_normally(write: &mut SplitSink<WsStream, Message>) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    };
    if let Err(e) = write.send(Message::Close(Some(frame))).await {
        debug!("Close frame not delivered: {}", e);
    }
}
