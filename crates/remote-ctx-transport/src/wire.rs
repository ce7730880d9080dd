//! Message endpoint over a text WebSocket.
//!
//! Wraps either side of a WebSocket (an axum server socket or a
//! tokio-tungstenite client stream) as a message channel with JSON payloads:
//! `post_message` serializes and sends, listeners receive parsed payloads.
//! Frames that are not valid JSON are dropped, since the socket may carry
//! traffic that is not ours. Messages that arrive before anyone listens are
//! held and handed to the first listener.

use std::{
    fmt::Display,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Wire error.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connection closed")]
    Closed,
}

/// Incoming message, parsed from a text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub data: Value,
}

/// Handle returned by [`Endpoint::add_event_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What a socket message means to the endpoint.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Close,
    /// Control frames and anything else with no payload for us.
    Skip,
}

/// Socket message types the endpoint can drive.
pub trait TextFrame: Send + Unpin + 'static {
    /// Build a text message.
    fn text(text: String) -> Self;

    /// Build a close message.
    fn close() -> Self;

    /// Classify an incoming message.
    fn into_frame(self) -> Frame;
}

type Listener = Arc<dyn Fn(MessageEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    listeners: Vec<(ListenerId, Listener)>,
    /// Messages received while `listeners` was empty.
    backlog: Vec<Value>,
}

type SharedSubscribers = Arc<Mutex<Subscribers>>;

fn lock(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Outbound {
    Text(String),
    Close,
}

/// JSON message endpoint over a WebSocket.
///
/// Cloning yields another handle to the same socket.
#[derive(Clone)]
pub struct Endpoint {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Outbound>,
    subscribers: SharedSubscribers,
    next_listener: Arc<AtomicU64>,
    closed: watch::Receiver<bool>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Attach to a socket.
    ///
    /// Spawns a writer task and a reader task on the current tokio runtime.
    /// Both end when the socket closes or errors.
    #[must_use]
    pub fn attach<S, M, E>(socket: S) -> Self
    where
        S: Stream<Item = Result<M, E>> + Sink<M> + Send + 'static,
        <S as Sink<M>>::Error: Display + Send,
        M: TextFrame,
        E: Display + Send,
    {
        let id = Uuid::new_v4();
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let (closed_tx, closed) = watch::channel(false);
        let subscribers = SharedSubscribers::default();

        // Forward queued messages to the socket
        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let (frame, last) = match msg {
                    Outbound::Text(text) => (M::text(text), false),
                    Outbound::Close => (M::close(), true),
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(connection = %id, "Failed to send frame: {e}");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        let reader_subscribers = Arc::clone(&subscribers);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(msg) => match msg.into_frame() {
                        Frame::Text(text) => text,
                        Frame::Close => break,
                        Frame::Skip => continue,
                    },
                    Err(e) => {
                        tracing::debug!(connection = %id, "WebSocket error: {e}");
                        break;
                    }
                };
                dispatch(&reader_subscribers, &text);
            }
            send_task.abort();
            let _ = closed_tx.send(true);
        });

        Self {
            id,
            outbound,
            subscribers,
            next_listener: Arc::new(AtomicU64::new(1)),
            closed,
        }
    }

    /// Connection identifier, for logging.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Serialize `message` to JSON and send it as a text frame.
    ///
    /// # Errors
    /// Returns error if encoding fails or the socket is gone.
    pub fn post_message<T: Serialize>(&self, message: &T) -> Result<(), WireError> {
        let json = serde_json::to_string(message)?;
        self.outbound
            .send(Outbound::Text(json))
            .map_err(|_| WireError::Closed)
    }

    /// Subscribe to parsed incoming messages.
    ///
    /// Every call adds one subscription, even for the same closure.
    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        let backlog = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.listeners.push((id, Arc::clone(&listener)));
            std::mem::take(&mut subscribers.backlog)
        };
        for data in backlog {
            listener(MessageEvent { data });
        }
        id
    }

    /// Drop a subscription. Unknown ids are ignored.
    pub fn remove_event_listener(&self, id: ListenerId) {
        lock(&self.subscribers)
            .listeners
            .retain(|(existing, _)| *existing != id);
    }

    /// Ask the peer to close the socket.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the socket has closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

fn dispatch(subscribers: &Mutex<Subscribers>, text: &str) {
    let data: Value = match serde_json::from_str(text) {
        Ok(data) => data,
        Err(e) => {
            tracing::trace!("Ignoring non-JSON frame: {e}");
            return;
        }
    };

    // Snapshot so listeners may (un)subscribe while being called
    let snapshot: Vec<Listener> = {
        let mut subscribers = lock(subscribers);
        if subscribers.listeners.is_empty() {
            subscribers.backlog.push(data);
            return;
        }
        subscribers
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    };

    for listener in snapshot {
        listener(MessageEvent { data: data.clone() });
    }
}

#[cfg(feature = "server")]
impl TextFrame for axum::extract::ws::Message {
    fn text(text: String) -> Self {
        Self::Text(text.into())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn into_frame(self) -> Frame {
        match self {
            Self::Text(text) => Frame::Text(text.as_str().to_owned()),
            Self::Binary(data) => {
                String::from_utf8(data.to_vec()).map_or(Frame::Skip, Frame::Text)
            }
            Self::Close(_) => Frame::Close,
            Self::Ping(_) | Self::Pong(_) => Frame::Skip,
        }
    }
}

#[cfg(feature = "client")]
impl TextFrame for tokio_tungstenite::tungstenite::Message {
    fn text(text: String) -> Self {
        Self::Text(text.into())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn into_frame(self) -> Frame {
        match self {
            Self::Text(text) => Frame::Text(text.as_str().to_owned()),
            Self::Binary(data) => {
                String::from_utf8(data.to_vec()).map_or(Frame::Skip, Frame::Text)
            }
            Self::Close(_) => Frame::Close,
            Self::Ping(_) | Self::Pong(_) | Self::Frame(_) => Frame::Skip,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        convert::Infallible,
        pin::Pin,
        sync::Mutex,
        task::{Context, Poll},
    };

    use futures::channel::mpsc as fmpsc;
    use serde_json::json;

    use super::*;

    /// Message type for in-memory sockets.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TestMessage {
        Text(String),
        Close,
    }

    impl TextFrame for TestMessage {
        fn text(text: String) -> Self {
            Self::Text(text)
        }

        fn close() -> Self {
            Self::Close
        }

        fn into_frame(self) -> Frame {
            match self {
                Self::Text(text) => Frame::Text(text),
                Self::Close => Frame::Close,
            }
        }
    }

    /// One end of an in-memory socket pair.
    pub struct Duplex {
        rx: fmpsc::UnboundedReceiver<Result<TestMessage, Infallible>>,
        tx: fmpsc::UnboundedSender<Result<TestMessage, Infallible>>,
    }

    impl Stream for Duplex {
        type Item = Result<TestMessage, Infallible>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.rx.poll_next_unpin(cx)
        }
    }

    impl Sink<TestMessage> for Duplex {
        type Error = fmpsc::SendError;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.tx).poll_ready(cx)
        }

        fn start_send(mut self: Pin<&mut Self>, item: TestMessage) -> Result<(), Self::Error> {
            Pin::new(&mut self.tx).start_send(Ok(item))
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.tx).poll_flush(cx)
        }

        fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.tx).poll_close(cx)
        }
    }

    /// Two connected in-memory sockets.
    pub fn duplex_pair() -> (Duplex, Duplex) {
        let (a_tx, b_rx) = fmpsc::unbounded();
        let (b_tx, a_rx) = fmpsc::unbounded();
        (Duplex { rx: a_rx, tx: a_tx }, Duplex { rx: b_rx, tx: b_tx })
    }

    fn collecting_listener(endpoint: &Endpoint) -> (ListenerId, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = endpoint.add_event_listener(move |event| sink.lock().unwrap().push(event.data));
        (id, seen)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_post_message_delivers_parsed_json() {
        let (a, b) = duplex_pair();
        let left = Endpoint::attach(a);
        let right = Endpoint::attach(b);
        let (_, seen) = collecting_listener(&right);

        left.post_message(&json!({ "hello": [1, 2] })).unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![json!({ "hello": [1, 2] })]);
    }

    #[tokio::test]
    async fn test_non_json_frames_are_ignored() {
        let (mut raw, b) = duplex_pair();
        let endpoint = Endpoint::attach(b);
        let (_, seen) = collecting_listener(&endpoint);

        raw.send(TestMessage::Text("not json {".into())).await.unwrap();
        raw.send(TestMessage::Text("42".into())).await.unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![json!(42)]);
        assert!(!endpoint.is_closed());
    }

    #[tokio::test]
    async fn test_each_subscription_receives_once() {
        let (a, b) = duplex_pair();
        let left = Endpoint::attach(a);
        let right = Endpoint::attach(b);
        let (_, first) = collecting_listener(&right);
        let (second_id, second) = collecting_listener(&right);

        left.post_message(&"one").unwrap();
        settle().await;
        right.remove_event_listener(second_id);
        left.post_message(&"two").unwrap();
        settle().await;

        assert_eq!(*first.lock().unwrap(), vec![json!("one"), json!("two")]);
        assert_eq!(*second.lock().unwrap(), vec![json!("one")]);
    }

    #[tokio::test]
    async fn test_early_messages_wait_for_first_listener() {
        let (a, b) = duplex_pair();
        let left = Endpoint::attach(a);
        let right = Endpoint::attach(b);

        left.post_message(&"early").unwrap();
        settle().await;
        let (_, first) = collecting_listener(&right);
        let (_, second) = collecting_listener(&right);
        left.post_message(&"late").unwrap();
        settle().await;

        assert_eq!(*first.lock().unwrap(), vec![json!("early"), json!("late")]);
        assert_eq!(*second.lock().unwrap(), vec![json!("late")]);
    }

    #[tokio::test]
    async fn test_close_resolves_both_sides() {
        let (a, b) = duplex_pair();
        let left = Endpoint::attach(a);
        let right = Endpoint::attach(b);

        left.close();
        right.closed().await;
        assert!(right.is_closed());
    }
}
