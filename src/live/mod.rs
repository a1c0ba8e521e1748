//! Live feed push client
//!
//! One WebSocket connection per process, shared by every mounted
//! conversation view. Inbound events are handed to every registered handler;
//! handlers filter by conversation id themselves.

pub mod frame;
pub mod websocket;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

pub use frame::{ClientFrame, LiveEvent};
use websocket::FeedSocket;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A connection that stayed up this long resets the reconnect backoff.
const STABLE_AFTER: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SECS: u64 = 64;

/// Live channel unavailable.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("invalid live feed URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("live feed has been shut down")]
    Closed,
}

pub type HandlerId = u64;

type Handler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_handler: HandlerId,
    /// Ordered by registration
    handlers: BTreeMap<HandlerId, Handler>,
    /// Conversation id -> number of live subscriptions
    interest: HashMap<String, usize>,
    connected: bool,
}

/// State shared between the feed handle and its connection task.
struct Shared {
    registry: Mutex<Registry>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl Shared {
    /// Lock the registry, recovering from poisoning: a panicking handler
    /// must not take the feed down for every other view.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the connection up and return every conversation to resubscribe.
    fn mark_connected(&self) -> Vec<String> {
        let mut reg = self.lock();
        reg.connected = true;
        let mut ids: Vec<String> = reg.interest.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn mark_disconnected(&self) {
        self.lock().connected = false;
    }

    /// Queue a frame if a connection is up; otherwise the next connect
    /// resubscribes from the interest table.
    fn send_if_connected(
        reg: &Registry,
        outbound: &mpsc::UnboundedSender<ClientFrame>,
        frame: ClientFrame,
    ) {
        if reg.connected && outbound.send(frame).is_err() {
            tracing::debug!("Live feed task gone, frame dropped");
        }
    }

    /// Invoke every handler with `event`.
    ///
    /// Handlers are cloned out of the registry first so a handler may add
    /// or remove handlers without deadlocking.
    fn dispatch(&self, event: &LiveEvent) {
        let handlers: Vec<Handler> = self.lock().handlers.values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn dispatch_text(&self, text: &str) {
        match LiveEvent::parse(text) {
            Ok(LiveEvent::Pong) => tracing::debug!("Live feed pong"),
            Ok(LiveEvent::Other) => tracing::debug!("Ignoring live event: {}", text),
            Ok(event) => {
                tracing::debug!(
                    "Live event for conversation {}",
                    event.conversation_id().unwrap_or("-")
                );
                self.dispatch(&event)
            }
            Err(e) => tracing::warn!("Malformed live feed frame ({}): {}", e, text),
        }
    }
}

/// Reason a connected session ended.
enum DisconnectReason {
    /// Shutdown requested. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// Process-wide live feed client.
///
/// Create one with [`LiveFeed::new`], hand `Arc` clones to views, and call
/// [`LiveFeed::connect`] once. Views acquire a [`Subscription`] per mounted
/// conversation.
pub struct LiveFeed {
    url: String,
    shared: Arc<Shared>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientFrame>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl LiveFeed {
    /// Build a feed for `url`, authenticating with `token`. Does not connect.
    pub fn new(url: &str, token: &str) -> Result<Arc<Self>, SubscriptionError> {
        let url = feed_url(url, token)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            url,
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                outbound,
            }),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
            shutdown,
        }))
    }

    /// Start the connection task. Calling it again while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<(), SubscriptionError> {
        if self.is_shut_down() {
            return Err(SubscriptionError::Closed);
        }
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            tracing::debug!("Live feed already connected");
            return Ok(());
        }

        let outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(SubscriptionError::Closed)?;

        *task = Some(tokio::spawn(run_connection(
            self.url.clone(),
            Arc::clone(&self.shared),
            outbound_rx,
            self.shutdown.subscribe(),
        )));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop the connection task. The feed cannot be reconnected afterwards.
    pub fn shutdown(&self) {
        tracing::debug!("Live feed shutting down");
        self.shutdown.send_replace(true);
    }

    /// Register interest in a conversation's events.
    pub fn subscribe(&self, conversation_id: &str) {
        let mut reg = self.shared.lock();
        let count = reg.interest.entry(conversation_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            tracing::debug!("Subscribing to conversation {}", conversation_id);
            Shared::send_if_connected(
                &reg,
                &self.shared.outbound,
                ClientFrame::Subscribe {
                    conversation_id: conversation_id.to_string(),
                },
            );
        }
    }

    /// Drop one unit of interest; the last one unsubscribes on the wire.
    pub fn unsubscribe(&self, conversation_id: &str) {
        let mut reg = self.shared.lock();
        let Some(count) = reg.interest.get_mut(conversation_id) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            reg.interest.remove(conversation_id);
            tracing::debug!("Unsubscribing from conversation {}", conversation_id);
            Shared::send_if_connected(
                &reg,
                &self.shared.outbound,
                ClientFrame::Unsubscribe {
                    conversation_id: conversation_id.to_string(),
                },
            );
        }
    }

    /// Register a handler for every inbound event.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        let mut reg = self.shared.lock();
        let id = reg.next_handler;
        reg.next_handler += 1;
        reg.handlers.insert(id, Arc::new(handler));
        id
    }

    /// Deregister a handler. Returns false if it was not registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.shared.lock().handlers.remove(&id).is_some()
    }

    /// Subscribe to `conversation_id` and route every inbound event into the
    /// returned guard. Dropping the guard undoes both.
    pub fn mount(
        self: &Arc<Self>,
        conversation_id: &str,
    ) -> Result<Subscription, SubscriptionError> {
        if self.is_shut_down() {
            return Err(SubscriptionError::Closed);
        }

        let (tx, events) = mpsc::unbounded_channel();
        let handler = self.on_message(move |event| {
            let _ = tx.send(event.clone());
        });
        self.subscribe(conversation_id);

        Ok(Subscription {
            feed: Arc::clone(self),
            conversation_id: conversation_id.to_string(),
            handler,
            events,
        })
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self) -> usize {
        self.shared.lock().handlers.len()
    }

    /// Deliver `event` as if it had arrived on the socket.
    #[cfg(test)]
    pub(crate) fn inject(&self, event: &LiveEvent) {
        self.shared.dispatch(event);
    }

    #[cfg(test)]
    fn interest(&self, conversation_id: &str) -> usize {
        self.shared
            .lock()
            .interest
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// A mounted conversation's hold on the live feed.
///
/// Receives every inbound event (not only this conversation's). Dropping it
/// removes the handler and releases the conversation subscription.
pub struct Subscription {
    feed: Arc<LiveFeed>,
    conversation_id: String,
    handler: HandlerId,
    events: mpsc::UnboundedReceiver<LiveEvent>,
}

impl Subscription {
    /// Next inbound event.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feed.remove_handler(self.handler);
        self.feed.unsubscribe(&self.conversation_id);
    }
}

/// Append the auth token to the feed URL.
fn feed_url(url: &str, token: &str) -> Result<String, SubscriptionError> {
    let invalid = |reason: String| SubscriptionError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let mut parsed = url::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    parsed.query_pairs_mut().append_pair("token", token);
    Ok(parsed.into())
}

/// Keep the feed connected until shutdown.
///
/// Reconnects with exponential backoff (1s, 2s, 4s, ... capped at 64s); a
/// session that stayed up for a minute resets the backoff.
async fn run_connection(
    url: String,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = 1u64;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let started = Instant::now();
        let result = run_session(&url, &shared, &mut outbound, &mut shutdown).await;

        shared.mark_disconnected();
        // Frames queued for the dead connection are superseded by the
        // resubscribe on the next connect.
        while outbound.try_recv().is_ok() {}

        let delay = match result {
            Ok(DisconnectReason::Shutdown) => {
                tracing::info!("Live feed stopped");
                return;
            }
            Ok(DisconnectReason::Error(e)) if started.elapsed() >= STABLE_AFTER => {
                backoff = 1;
                tracing::warn!("Live feed disconnected: {:#}. Reconnecting in 1s...", e);
                1
            }
            Ok(DisconnectReason::Error(e)) | Err(e) => {
                let delay = backoff;
                tracing::warn!(
                    "Live feed disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    delay
                );
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                delay
            }
        };

        tokio::select! {
            _ = time::sleep(Duration::from_secs(delay)) => {}
            _ = shutdown.changed() => {
                tracing::info!("Live feed stopped");
                return;
            }
        }
    }
}

/// Run one connected session: resubscribe, then pump frames both ways.
///
/// `Err` means the connection was never established.
async fn run_session(
    url: &str,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<DisconnectReason> {
    let mut socket = tokio::select! {
        socket = FeedSocket::connect(url) => socket?,
        _ = shutdown.changed() => return Ok(DisconnectReason::Shutdown),
    };

    for conversation_id in shared.mark_connected() {
        tracing::debug!("Resubscribing to conversation {}", conversation_id);
        if let Err(e) = socket
            .send_frame(&ClientFrame::Subscribe { conversation_id })
            .await
        {
            return Ok(DisconnectReason::Error(e));
        }
    }

    let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // skip first immediate tick

    let reason = loop {
        tokio::select! {
            frame = socket.recv_text() => {
                match frame {
                    Ok(Some(text)) => shared.dispatch_text(&text),
                    Ok(None) => {
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Err(e) => break DisconnectReason::Error(e),
                }
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = socket.send_frame(&frame).await {
                    break DisconnectReason::Error(e);
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = socket.send_frame(&ClientFrame::Ping).await {
                    break DisconnectReason::Error(e.context("Heartbeat send failed"));
                }
            }
            _ = shutdown.changed() => {
                socket.close().await;
                break DisconnectReason::Shutdown;
            }
        }
    };

    Ok(reason)
}
