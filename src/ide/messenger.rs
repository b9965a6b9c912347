//! Request/response messaging over an abstract duplex channel.
//!
//! [`Messenger`] provides the three primitives the engine needs from the
//! host:
//!
//! - [`Messenger::post`]: fire-and-forget, retried with exponential backoff
//! - [`Messenger::request`]: one round trip correlated by message id
//! - [`Messenger::stream_request`]: a cancellable streamed response
//!
//! The transport reader hands every incoming envelope to
//! [`Messenger::receive`], which routes replies to the waiting caller and
//! returns anything unsolicited (such as apply state updates).
//!
//! Streamed responses are buffered on arrival and drained by polling at a
//! fixed interval. A stream ends only after its terminal chunk has been seen
//! and every buffered chunk before it has been yielded. The terminal chunk's
//! content is the stream's return value and comes last, as
//! [`StreamItem::Done`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::protocol::{message_types, AbortRequest, Envelope, HostResponse, StreamChunk};
use crate::error::{FlowError, FlowResult};
use crate::types::config::EngineConfig;

/// Errors from a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

impl ChannelError {
    /// A closed channel never recovers; an unavailable one may.
    fn into_flow_error(self, message_type: &str) -> FlowError {
        match self {
            Self::Closed => FlowError::transport_protocol(format!("{message_type}: channel closed")),
            Self::Unavailable(reason) => FlowError::transport_request(message_type, reason),
        }
    }
}

/// Outgoing half of the duplex channel to the host.
pub trait Channel: Send + Sync + 'static {
    /// Delivers one envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope could not be handed to the transport.
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError>;
}

impl Channel for mpsc::UnboundedSender<Envelope> {
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        mpsc::UnboundedSender::send(self, envelope.clone()).map_err(|_| ChannelError::Closed)
    }
}

/// One item of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Chunks buffered since the previous poll.
    Chunks(Vec<Value>),
    /// The stream's return value, if the terminal chunk carried one.
    Done(Option<Value>),
}

#[derive(Debug, Default)]
struct StreamBuffer {
    chunks: Vec<Value>,
    done: bool,
    final_value: Option<Value>,
    error: Option<String>,
}

struct Shared<C> {
    channel: C,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    streams: Mutex<HashMap<String, StreamBuffer>>,
    post_retries: u32,
    post_backoff: Duration,
    poll_interval: Duration,
}

impl<C> Shared<C> {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, StreamBuffer>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Correlates requests and responses over a [`Channel`].
pub struct Messenger<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Messenger<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> fmt::Debug for Messenger<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("pending", &self.shared.pending().len())
            .field("streams", &self.shared.streams().len())
            .finish_non_exhaustive()
    }
}

impl<C: Channel> Messenger<C> {
    /// Creates a messenger with retry and polling settings from `config`.
    #[must_use]
    pub fn new(channel: C, config: &EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                pending: Mutex::new(HashMap::new()),
                streams: Mutex::new(HashMap::new()),
                post_retries: config.post_retries.max(1),
                post_backoff: config.post_backoff,
                poll_interval: config.stream_poll_interval,
            }),
        }
    }

    /// Returns the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &C {
        &self.shared.channel
    }

    async fn send_with_retry(&self, envelope: &Envelope) -> FlowResult<()> {
        let attempts = self.shared.post_retries;
        let mut delay = self.shared.post_backoff;

        for attempt in 1..=attempts {
            match self.shared.channel.send(envelope) {
                Ok(()) => {
                    debug!(
                        message_type = %envelope.message_type,
                        message_id = %envelope.message_id,
                        attempt,
                        "Message sent"
                    );
                    return Ok(());
                }
                Err(e) => {
                    let error = e.into_flow_error(&envelope.message_type);
                    warn!(
                        message_type = %envelope.message_type,
                        attempt,
                        error = %error,
                        "Failed to post message"
                    );
                    if !error.is_retryable() {
                        error!(message_type = %envelope.message_type, attempt, "Channel cannot deliver");
                        return Err(error);
                    }
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        error!(
            message_type = %envelope.message_type,
            attempts,
            "Giving up on message delivery"
        );
        Err(FlowError::transport_delivery(&envelope.message_type, attempts))
    }

    /// Sends a message without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::TransportDelivery`] once every attempt failed.
    pub async fn post(&self, message_type: &str, data: impl Serialize) -> FlowResult<()> {
        let envelope = Envelope::new(message_type, data)?;
        self.send_with_retry(&envelope).await
    }

    /// Sends a request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails, the host answers with an error,
    /// or the reply has the wrong shape.
    pub async fn request<T: DeserializeOwned>(
        &self,
        message_type: &str,
        data: impl Serialize,
    ) -> FlowResult<T> {
        let envelope = Envelope::new(message_type, data)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(envelope.message_id.clone(), tx);

        if let Err(e) = self.send_with_retry(&envelope).await {
            self.shared.pending().remove(&envelope.message_id);
            return Err(e);
        }

        let payload = rx
            .await
            .map_err(|_| FlowError::transport_request(message_type, "response channel closed"))?;
        let response: HostResponse = serde_json::from_value(payload).map_err(|e| {
            FlowError::transport_protocol(format!("invalid {message_type} response: {e}"))
        })?;
        response.into_result(message_type)
    }

    /// Sends a request whose reply arrives as a stream of chunks.
    ///
    /// Items are [`StreamItem::Chunks`] batches followed by exactly one
    /// [`StreamItem::Done`] on success. Cancelling `cancel` posts an `abort`
    /// for the request and ends the stream with [`FlowError::Aborted`].
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized. Delivery and host
    /// errors are yielded by the stream.
    pub fn stream_request(
        &self,
        message_type: &str,
        data: impl Serialize,
        cancel: CancellationToken,
    ) -> FlowResult<BoxStream<'static, FlowResult<StreamItem>>> {
        let envelope = Envelope::new(message_type, data)?;
        self.shared
            .streams()
            .insert(envelope.message_id.clone(), StreamBuffer::default());

        let state = StreamState {
            messenger: self.clone(),
            envelope,
            cancel,
            phase: Phase::Send,
        };
        Ok(stream::unfold(state, |mut state| async move {
            state.next_batch().await.map(|item| (item, state))
        })
        .boxed())
    }

    /// Routes an incoming envelope.
    ///
    /// Replies to pending requests and chunks of open streams are consumed.
    /// Anything else is returned to the caller.
    pub fn receive(&self, envelope: Envelope) -> Option<Envelope> {
        let waiting = self.shared.pending().remove(&envelope.message_id);
        if let Some(tx) = waiting {
            if tx.send(envelope.data).is_err() {
                debug!(message_id = %envelope.message_id, "Requester went away before reply");
            }
            return None;
        }

        let mut streams = self.shared.streams();
        let Some(buffer) = streams.get_mut(&envelope.message_id) else {
            drop(streams);
            return Some(envelope);
        };

        match serde_json::from_value::<StreamChunk>(envelope.data) {
            Ok(chunk) => {
                if let Some(error) = chunk.error {
                    buffer.error = Some(error);
                } else if chunk.done {
                    buffer.done = true;
                    buffer.final_value = chunk.content;
                } else if let Some(content) = chunk.content {
                    buffer.chunks.push(content);
                }
            }
            Err(e) => {
                warn!(message_id = %envelope.message_id, error = %e, "Malformed stream chunk");
                buffer.error = Some(format!("malformed stream chunk: {e}"));
            }
        }
        None
    }

    async fn abort(&self, message_id: &str) {
        let request = AbortRequest {
            message_id: message_id.to_string(),
        };
        if let Err(e) = self.post(message_types::ABORT, request).await {
            warn!(message_id = %message_id, error = %e, "Failed to send abort");
        }
    }
}

enum Phase {
    Send,
    Poll,
    Finished,
}

struct StreamState<C> {
    messenger: Messenger<C>,
    envelope: Envelope,
    cancel: CancellationToken,
    phase: Phase,
}

impl<C: Channel> StreamState<C> {
    fn finish(&mut self) {
        self.phase = Phase::Finished;
        self.messenger.shared.streams().remove(&self.envelope.message_id);
    }

    /// Drains buffered chunks. The return value is handed out only once the
    /// stream is done.
    fn drain(&self) -> (Vec<Value>, Option<Option<Value>>, Option<String>) {
        let mut streams = self.messenger.shared.streams();
        match streams.get_mut(&self.envelope.message_id) {
            Some(buffer) => {
                let chunks = std::mem::take(&mut buffer.chunks);
                let done = (buffer.done && chunks.is_empty()).then(|| buffer.final_value.take());
                (chunks, done, buffer.error.clone())
            }
            None => (Vec::new(), Some(None), None),
        }
    }

    async fn next_batch(&mut self) -> Option<FlowResult<StreamItem>> {
        loop {
            match self.phase {
                Phase::Finished => return None,
                Phase::Send => {
                    if let Err(e) = self.messenger.send_with_retry(&self.envelope).await {
                        self.finish();
                        return Some(Err(e));
                    }
                    self.phase = Phase::Poll;
                }
                Phase::Poll => {
                    if self.cancel.is_cancelled() {
                        self.finish();
                        self.messenger.abort(&self.envelope.message_id).await;
                        return Some(Err(FlowError::Aborted));
                    }

                    let (chunks, done, error) = self.drain();
                    if !chunks.is_empty() {
                        return Some(Ok(StreamItem::Chunks(chunks)));
                    }
                    if let Some(error) = error {
                        self.finish();
                        return Some(Err(FlowError::transport_request(
                            &self.envelope.message_type,
                            error,
                        )));
                    }
                    if let Some(final_value) = done {
                        self.finish();
                        return Some(Ok(StreamItem::Done(final_value)));
                    }

                    tokio::select! {
                        () = self.cancel.cancelled() => {}
                        () = tokio::time::sleep(self.messenger.shared.poll_interval) => {}
                    }
                }
            }
        }
    }
}

impl<C> Drop for StreamState<C> {
    fn drop(&mut self) {
        if !matches!(self.phase, Phase::Finished) {
            self.messenger.shared.streams().remove(&self.envelope.message_id);
        }
    }
}
