//! Long-lived push connection with bounded automatic reconnect.
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnected
//! (retry) -> ... -> Failed`. After a disconnect the channel waits
//! `reconnect_delay` before each attempt; once `max_attempts` consecutive
//! attempts have failed it enters `Failed`, emits one `Error` event and stops
//! retrying until `open` is called again. A successful connect resets the
//! attempt counter.
//!
//! The channel never blocks: connects run on a short-lived thread and `poll`
//! picks up the result, and reads drain whatever the connection has buffered
//! and return.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::events::{ChannelEvent, EventKind, EventRegistry, Listener, ListenerId, StreamEvent};
use crate::error::ChannelError;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Upper bound on reads per `poll`, so one chatty connection
/// cannot hold the loop.
const MAX_MESSAGES_PER_POLL: usize = 64;

/// Outcome of a non-blocking read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recv {
    Idle,
    Message(String),
    Closed,
}

pub trait StreamConnection: Send {
    fn recv(&mut self) -> Result<Recv, ChannelError>;
    fn send(&mut self, text: &str) -> Result<(), ChannelError>;
    fn close(&mut self);
}

pub trait StreamTransport: Send {
    fn describe(&self) -> String;
    fn connect(&mut self) -> Result<Box<dyn StreamConnection>, ChannelError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub reconnect_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

type ConnectResult = Result<Box<dyn StreamConnection>, ChannelError>;

pub struct ReconnectingChannel {
    transport: Arc<Mutex<Box<dyn StreamTransport>>>,
    target: String,
    policy: ReconnectPolicy,
    state: ChannelState,
    connection: Option<Box<dyn StreamConnection>>,
    pending: Option<Receiver<ConnectResult>>,
    opened: bool,
    attempts: u32,
    total_attempts: u64,
    next_attempt: Option<Instant>,
    registry: EventRegistry,
}

impl ReconnectingChannel {
    pub fn new(transport: Box<dyn StreamTransport>, policy: ReconnectPolicy) -> Self {
        Self {
            target: transport.describe(),
            transport: Arc::new(Mutex::new(transport)),
            policy,
            state: ChannelState::Disconnected,
            connection: None,
            pending: None,
            opened: false,
            attempts: 0,
            total_attempts: 0,
            next_attempt: None,
            registry: EventRegistry::new(),
        }
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.registry.subscribe(kind, listener)
    }

    pub fn subscribe_all(&mut self, listener: Listener) -> ListenerId {
        self.registry.subscribe_all(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Start connecting now. No-op while already open; after `Failed` this is
    /// the external reset and starts a fresh attempt budget.
    pub fn open(&mut self, now: Instant) {
        if self.opened && self.state != ChannelState::Failed {
            return;
        }
        self.opened = true;
        self.attempts = 0;
        self.next_attempt = None;
        self.connect(now);
    }

    pub fn close(&mut self) {
        self.opened = false;
        self.next_attempt = None;
        self.state = ChannelState::Disconnected;
        // A connect still in progress is dropped when it lands.
        self.pending = None;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            log::info!("channel closed: {}", self.target);
            self.registry.dispatch(&ChannelEvent::Disconnected {
                reason: "closed locally".to_string(),
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reconnect attempts made over the channel's lifetime.
    pub fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// Fails with `NotConnected` unless `Connected`; never blocks or retries.
    pub fn send(&mut self, text: &str) -> Result<(), ChannelError> {
        if self.state != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }
        match self.connection.as_mut() {
            Some(connection) => connection.send(text),
            None => Err(ChannelError::NotConnected),
        }
    }

    /// Pick up a finished connect, drain inbound messages and start any due
    /// reconnect. Returns the number of stream messages dispatched.
    pub fn poll(&mut self, now: Instant) -> usize {
        match self.state {
            ChannelState::Connected => self.drain(now),
            ChannelState::Connecting => {
                if self.finish_connect(now) {
                    self.drain(now)
                } else {
                    0
                }
            }
            ChannelState::Disconnected => {
                if self.opened && self.next_attempt.is_some_and(|due| now >= due) {
                    self.attempts += 1;
                    self.total_attempts += 1;
                    log::info!(
                        "channel reconnecting: attempt={}/{} target={}",
                        self.attempts,
                        self.policy.max_attempts,
                        self.target
                    );
                    self.connect(now);
                }
                0
            }
            ChannelState::Failed => 0,
        }
    }

    fn connect(&mut self, now: Instant) {
        self.state = ChannelState::Connecting;
        self.next_attempt = None;
        let (tx, rx) = mpsc::channel();
        let transport = self.transport.clone();
        let spawned = thread::Builder::new()
            .name("channel-connect".to_string())
            .spawn(move || {
                let result = transport
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .connect();
                let _ = tx.send(result);
            });
        match spawned {
            Ok(_) => self.pending = Some(rx),
            Err(e) => self.disconnected(format!("connect thread: {}", e), now),
        }
    }

    /// Returns true once connected. Leaves the state `Connecting` while the
    /// attempt is still running.
    fn finish_connect(&mut self, now: Instant) -> bool {
        let result = match self.pending.as_ref().map(Receiver::try_recv) {
            Some(Err(TryRecvError::Empty)) => return false,
            Some(Ok(result)) => result,
            Some(Err(TryRecvError::Disconnected)) | None => {
                Err(ChannelError::Transport("connect attempt abandoned".into()))
            }
        };
        self.pending = None;
        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = ChannelState::Connected;
                self.attempts = 0;
                log::info!("channel connected: {}", self.target);
                self.registry.dispatch(&ChannelEvent::Connected);
                true
            }
            Err(e) => {
                self.disconnected(e.to_string(), now);
                false
            }
        }
    }

    fn drain(&mut self, now: Instant) -> usize {
        let mut dispatched = 0;
        for _ in 0..MAX_MESSAGES_PER_POLL {
            let Some(connection) = self.connection.as_mut() else {
                break;
            };
            match connection.recv() {
                Ok(Recv::Idle) => break,
                Ok(Recv::Message(text)) => match StreamEvent::parse(&text) {
                    Ok(event) => {
                        dispatched += 1;
                        self.registry.dispatch(&ChannelEvent::Message(event));
                    }
                    Err(e) => log::warn!("dropping malformed stream message: {}", e),
                },
                Ok(Recv::Closed) => {
                    self.drop_connection();
                    self.disconnected("closed by remote".to_string(), now);
                    break;
                }
                Err(e) => {
                    self.drop_connection();
                    self.disconnected(e.to_string(), now);
                    break;
                }
            }
        }
        dispatched
    }

    fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }

    fn disconnected(&mut self, reason: String, now: Instant) {
        self.registry
            .dispatch(&ChannelEvent::Disconnected { reason: reason.clone() });
        if self.attempts >= self.policy.max_attempts {
            self.state = ChannelState::Failed;
            self.next_attempt = None;
            let error = ChannelError::Failed {
                attempts: self.attempts,
            };
            log::error!("{}: last error: {}", error, reason);
            self.registry.dispatch(&ChannelEvent::Error(error));
            return;
        }
        self.state = ChannelState::Disconnected;
        self.next_attempt = Some(now + self.policy.reconnect_delay);
        log::warn!(
            "channel disconnected: reason={} reconnect_in_ms={} attempts_used={}",
            reason,
            self.policy.reconnect_delay.as_millis(),
            self.attempts
        );
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.drop_connection();
    }
}
