//! Connection state machine for the realtime channel.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::protocol::{self, ChangeAction, Frame};
use crate::auth::TokenStore;
use crate::config::{ClientConfig, RealtimeConfig};
use crate::{Error, Result};

const STOP_REASON: &str = "client_stop";

/// Where the listener is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Connecting,
    Joined,
    Reconnecting,
}

/// Notifications published by the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    StateChanged(ListenerState),
    Change(ChangeAction),
    /// A connection attempt failed. Sent at most once until the next successful open.
    ConnectionError(String),
}

/// Why a connection ended
enum Exit {
    Stopped,
    Closed,
}

/// Keeps one subscription alive per account, reconnecting after failures.
pub struct RealtimeListener {
    config: RealtimeConfig,
    heartbeat_interval: Duration,
    reconnect_backoff: Duration,
    tables: Vec<String>,
    user_id: String,
    tokens: Arc<dyn TokenStore>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    state: watch::Sender<ListenerState>,
    started: AtomicBool,
    next_ref: AtomicU64,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl RealtimeListener {
    /// Build a listener for `user_id` watching `tables`.
    ///
    /// Returns the listener and the receiving end of its event channel.
    pub fn new(
        config: &ClientConfig,
        realtime: RealtimeConfig,
        tables: Vec<String>,
        user_id: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ListenerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ListenerState::Idle);
        let listener = Arc::new(Self {
            config: realtime,
            heartbeat_interval: config.heartbeat_interval,
            reconnect_backoff: config.reconnect_backoff,
            tables,
            user_id: user_id.into(),
            tokens,
            events,
            state,
            started: AtomicBool::new(false),
            next_ref: AtomicU64::new(1),
            running: Mutex::new(None),
        });
        (listener, receiver)
    }

    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start connecting. Does nothing while already started.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        if let Ok(mut running) = self.running.lock() {
            *running = Some((cancel, task));
        }
    }

    /// Stop reconnecting and close the socket with a normal closure.
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        let running = self.running.lock().ok().and_then(|mut running| running.take());
        if let Some((cancel, task)) = running {
            cancel.cancel();
            if let Err(error) = task.await {
                tracing::warn!("Realtime task ended abnormally: {}", error);
            }
        }
    }

    fn reference(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
        self.emit(ListenerEvent::StateChanged(state));
    }

    fn emit(&self, event: ListenerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Realtime event dropped, no receiver");
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut error_reported = false;
        loop {
            self.set_state(ListenerState::Connecting);
            match self.connect_and_serve(&cancel, &mut error_reported).await {
                Ok(Exit::Stopped) => break,
                Ok(Exit::Closed) => tracing::info!("Realtime socket closed by server"),
                Err(error) => {
                    tracing::warn!("Realtime connection failed: {}", error);
                    if !error_reported {
                        error_reported = true;
                        self.emit(ListenerEvent::ConnectionError(error.to_string()));
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            self.set_state(ListenerState::Reconnecting);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(self.reconnect_backoff) => {}
            }
        }
        self.set_state(ListenerState::Idle);
    }

    async fn connect_and_serve(
        &self,
        cancel: &CancellationToken,
        error_reported: &mut bool,
    ) -> Result<Exit> {
        let token = self.tokens.access_token()?;
        let url = protocol::socket_url(&self.config, token.as_deref());
        let connected = tokio::select! {
            () = cancel.cancelled() => return Ok(Exit::Stopped),
            connected = connect_async(url) => connected,
        };
        let (socket, _) = connected.map_err(realtime_error)?;
        let (mut write, mut read) = socket.split();
        *error_reported = false;

        for table in &self.tables {
            let join = Frame::join(table, &self.user_id, self.reference());
            write
                .send(Message::Text(serde_json::to_string(&join)?))
                .await
                .map_err(realtime_error)?;
        }
        self.set_state(ListenerState::Joined);
        tracing::info!("Realtime channel joined for {} table(s)", self.tables.len());

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Cow::Borrowed(STOP_REASON),
                    };
                    if let Err(error) = write.send(Message::Close(Some(close))).await {
                        tracing::debug!("Realtime close frame not sent: {}", error);
                    }
                    return Ok(Exit::Stopped);
                }
                _ = heartbeat.tick() => {
                    let frame = Frame::heartbeat(self.reference());
                    write
                        .send(Message::Text(serde_json::to_string(&frame)?))
                        .await
                        .map_err(realtime_error)?;
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(action) = protocol::route(&text, &self.user_id) {
                            tracing::debug!("Realtime change on {}: {}", action.table(), action.label());
                            self.emit(ListenerEvent::Change(action));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(Exit::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(realtime_error(error)),
                },
            }
        }
    }
}

fn realtime_error(error: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::Realtime(error.to_string())
}
