//! Publish/subscribe over the key-value backend.
//!
//! Publishing is fire-and-forget. Subscribing parks one pooled connection in
//! subscriber mode on a dedicated OS thread, because the driver's receive call
//! blocks until a message arrives. The thread reads with a short socket timeout
//! so that it can observe a stop request between reads; it is joined on
//! [`PubSubChannel::unsubscribe`] and [`PubSubChannel::close`]. Both calls block
//! the calling thread while they wait, so async code should run them through
//! [`tokio::task::spawn_blocking`] rather than on a runtime worker.
//!
//! A channel instance holds at most one active subscription:
//!
//! ```text
//! Idle --subscribe--> Listening --unsubscribe--> Idle
//!   \                     |
//!    \------close---------+--close--> Closed
//! ```

use crate::error::{DbError, DbResult};
use crate::kv::pool::{KeyValueDatabase, KvPool};
use crate::operation::{AsyncOperation, Completer};
use redis::{Commands, PubSub, RedisResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Upper bound on how long a stop request waits for the listen thread.
pub const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug)]
struct Listener {
    channel: String,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Listener {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        // A handler that closes its own channel cannot join itself
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!(channel = %self.channel, "Pub/sub listen thread panicked");
        }
    }
}

#[derive(Debug)]
enum ListenerState {
    Idle,
    Listening(Listener),
    Closed,
}

/// Publisher and single-subscription listener for one key-value pool.
#[derive(Debug)]
pub struct PubSubChannel {
    database: KeyValueDatabase,
    state: Mutex<ListenerState>,
}

impl PubSubChannel {
    pub fn new(database: KeyValueDatabase) -> Self {
        Self {
            database,
            state: Mutex::new(ListenerState::Idle),
        }
    }

    /// Publish `message` on `channel` without waiting for the server.
    ///
    /// Delivery is not confirmed; failures after dispatch are logged. Only a
    /// missing or closed pool is reported to the caller.
    pub fn publish(&self, channel: impl Into<String>, message: impl Into<String>) -> DbResult<()> {
        let pool = self.database.pool()?;
        let channel = channel.into();
        let message = message.into();

        let task = move || {
            let result = pool
                .get()
                .map_err(DbError::from)
                .and_then(|mut conn| {
                    conn.publish::<_, _, u64>(&channel, message)
                        .map_err(DbError::from)
                });
            match result {
                Ok(receivers) => debug!(channel = %channel, receivers, "Published"),
                Err(e) => warn!(channel = %channel, error = %e, "Publish failed"),
            }
        };

        // Handlers run off the runtime, so publishing from one must not need it
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(task);
            }
            Err(_) => {
                thread::Builder::new()
                    .name("pubsub-publish".to_string())
                    .spawn(task)
                    .map_err(|e| DbError::internal(format!("Failed to spawn publisher: {}", e)))?;
            }
        }
        Ok(())
    }

    /// Start listening on `channel`, calling `handler(channel, payload)` for
    /// every message in arrival order.
    ///
    /// The handler runs on the dedicated listen thread and must not block for
    /// long. The returned operation resolves once the server has confirmed the
    /// subscription; messages published before that point are not delivered.
    /// Failures inside the listen loop are logged and end the subscription.
    pub fn subscribe<F>(
        &self,
        channel: impl Into<String>,
        handler: F,
    ) -> DbResult<AsyncOperation<()>>
    where
        F: FnMut(&str, &str) + Send + 'static,
    {
        let channel = channel.into();
        if channel.is_empty() {
            return Err(DbError::invalid_input("Channel name cannot be empty"));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            ListenerState::Closed => {
                return Err(DbError::connection(
                    "Pub/sub channel is closed",
                    "Create a new PubSubChannel",
                ));
            }
            ListenerState::Listening(listener) if listener.is_running() => {
                return Err(DbError::invalid_input(format!(
                    "Already subscribed to '{}'; unsubscribe first",
                    listener.channel
                )));
            }
            _ => {}
        }
        let pool = self.database.pool()?;

        let stop = Arc::new(AtomicBool::new(false));
        let (ready, completer) = AsyncOperation::pending();
        let handle = {
            let channel = channel.clone();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("pubsub-{}", channel))
                .spawn(move || listen(pool, channel, stop, handler, completer))
                .map_err(|e| DbError::internal(format!("Failed to spawn listen thread: {}", e)))?
        };

        info!(channel = %channel, "Subscription started");
        // A finished listener left over from a failed subscription is replaced
        *state = ListenerState::Listening(Listener {
            channel,
            stop,
            handle,
        });
        Ok(ready)
    }

    /// Subscribe and receive messages through a channel instead of a callback.
    ///
    /// The stream ends when the subscription stops.
    pub fn subscribe_stream(
        &self,
        channel: impl Into<String>,
    ) -> DbResult<(AsyncOperation<()>, mpsc::UnboundedReceiver<PubSubMessage>)> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let ready = self.subscribe(channel, move |channel, payload| {
            let _ = sender.send(PubSubMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        })?;
        Ok((ready, receiver))
    }

    /// True while a listen thread is running.
    pub fn is_listening(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*state, ListenerState::Listening(listener) if listener.is_running())
    }

    /// Stop the active subscription, if any, and return to idle.
    ///
    /// Blocks the calling thread until the listen thread exits. That takes up to
    /// one [`LISTEN_POLL_INTERVAL`], or longer while the listener is still
    /// checking out its connection. From async code, call it inside
    /// [`tokio::task::spawn_blocking`].
    pub fn unsubscribe(&self) {
        let listener = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, ListenerState::Idle) {
                ListenerState::Listening(listener) => Some(listener),
                ListenerState::Closed => {
                    *state = ListenerState::Closed;
                    None
                }
                ListenerState::Idle => None,
            }
        };
        if let Some(listener) = listener {
            info!(channel = %listener.channel, "Unsubscribing");
            listener.stop();
        }
    }

    /// Stop any subscription and refuse further subscribes. Safe to call repeatedly.
    ///
    /// Blocks like [`unsubscribe`](Self::unsubscribe) when a listener is running.
    pub fn close(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, ListenerState::Closed)
        };
        if let ListenerState::Listening(listener) = previous {
            info!(channel = %listener.channel, "Closing pub/sub channel");
            listener.stop();
        }
    }
}

impl Drop for PubSubChannel {
    fn drop(&mut self) {
        // Signal only; joining in drop could stall the dropping thread
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let ListenerState::Listening(listener) = state {
            listener.stop.store(true, Ordering::Release);
        }
    }
}

fn listen<F>(
    pool: KvPool,
    channel: String,
    stop: Arc<AtomicBool>,
    mut handler: F,
    ready: Completer<()>,
) where
    F: FnMut(&str, &str),
{
    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            let err = DbError::listen(&channel, e.to_string());
            error!(channel = %channel, error = %err, "Listen thread could not acquire a connection");
            ready.complete(Err(err));
            return;
        }
    };

    {
        let mut pubsub = conn.as_pubsub();
        if let Err(e) = open_subscription(&mut pubsub, &channel) {
            let err = DbError::listen(&channel, e.to_string());
            error!(channel = %channel, error = %err, "Subscribe failed");
            ready.complete(Err(err));
            return;
        }
        ready.complete(Ok(()));

        while !stop.load(Ordering::Acquire) {
            let msg = match pubsub.get_message() {
                Ok(msg) => msg,
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    let err = DbError::listen(&channel, e.to_string());
                    error!(channel = %channel, error = %err, "Listen loop stopped");
                    break;
                }
            };
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Dropping message with non-string payload");
                    continue;
                }
            };
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                handler(msg.get_channel_name(), &payload)
            }));
            if delivered.is_err() {
                error!(channel = %channel, "Message handler panicked");
            }
        }

        if let Err(e) = pubsub.unsubscribe(&channel) {
            debug!(channel = %channel, error = %e, "Unsubscribe failed");
        }
    }

    // Return the connection to the pool in normal (blocking) read mode
    if let Err(e) = conn.set_read_timeout(None) {
        debug!(error = %e, "Failed to reset read timeout");
    }
    debug!(channel = %channel, "Listen thread exiting");
}

fn open_subscription(pubsub: &mut PubSub<'_>, channel: &str) -> RedisResult<()> {
    pubsub.subscribe(channel)?;
    pubsub.set_read_timeout(Some(LISTEN_POLL_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyValueConfig;

    #[test]
    fn test_publish_before_connect_fails_synchronously() {
        let channel = PubSubChannel::new(KeyValueDatabase::new());
        assert!(matches!(
            channel.publish("chat", "hello"),
            Err(DbError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_subscribe_before_connect_fails_synchronously() {
        let channel = PubSubChannel::new(KeyValueDatabase::new());
        let result = channel.subscribe("chat", |_, _| {});
        assert!(matches!(result, Err(DbError::NotConnected { .. })));
        assert!(!channel.is_listening());
    }

    #[test]
    fn test_subscribe_after_close_is_rejected() {
        let channel = PubSubChannel::new(KeyValueDatabase::new());
        channel.close();
        channel.close();
        let result = channel.subscribe("chat", |_, _| {});
        assert!(matches!(result, Err(DbError::Connection { .. })));
    }

    #[test]
    fn test_empty_channel_name_rejected() {
        let channel = PubSubChannel::new(KeyValueDatabase::new());
        let result = channel.subscribe("", |_, _| {});
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_listen_failure_resolves_subscription_and_returns_to_idle() {
        let database = KeyValueDatabase::new();
        let mut config = KeyValueConfig::new("127.0.0.1", 1);
        config.pool.acquire_timeout_secs = 1;
        config.pool.connect_timeout_ms = 200;
        database.connect(&config).unwrap();

        let channel = PubSubChannel::new(database);
        let ready = channel.subscribe("chat", |_, _| {}).unwrap();
        let err = ready.await.unwrap_err();
        assert!(matches!(err, DbError::Listen { .. }));

        // The failed listener does not block a new subscription
        let mut attempts = 0;
        while channel.is_listening() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert!(!channel.is_listening());
        let retry = channel.subscribe("chat", |_, _| {});
        assert!(retry.is_ok());
        channel.close();
    }
}
