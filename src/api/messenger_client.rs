//! Chat client that streams through the host.

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ChatClient;
use crate::error::{FlowError, FlowResult};
use crate::ide::messenger::{Channel, Messenger, StreamItem};
use crate::ide::protocol::{message_types, StreamChatRequest};
use crate::types::stream::ChatStreamEvent;

/// Sends `llm/streamChat` to the host and forwards the streamed events.
///
/// Each chunk content is one serialized [`ChatStreamEvent`]. The stream's
/// return value, when present, holds one more event or an array of them and
/// is forwarded after the chunks.
#[derive(Debug, Clone)]
pub struct MessengerChatClient<C> {
    messenger: Messenger<C>,
}

impl<C: Channel> MessengerChatClient<C> {
    #[must_use]
    pub fn new(messenger: Messenger<C>) -> Self {
        Self { messenger }
    }
}

impl<C: Channel> ChatClient for MessengerChatClient<C> {
    async fn stream_chat(
        &self,
        request: StreamChatRequest,
        tx: mpsc::Sender<ChatStreamEvent>,
        cancel: CancellationToken,
    ) -> FlowResult<()> {
        let mut stream = self
            .messenger
            .stream_request(message_types::STREAM_CHAT, request, cancel)?;

        let mut forwarded = 0usize;
        while let Some(item) = stream.next().await {
            let item = item.map_err(|e| match e {
                FlowError::Aborted => FlowError::Aborted,
                other => FlowError::llm_stream(other.to_string()),
            })?;

            let values = match item {
                StreamItem::Chunks(chunks) => chunks,
                StreamItem::Done(None) => break,
                StreamItem::Done(Some(Value::Array(values))) => values,
                StreamItem::Done(Some(value)) => vec![value],
            };
            for value in values {
                let event = match serde_json::from_value::<ChatStreamEvent>(value) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed chat stream event");
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    debug!(forwarded, "Chat event receiver dropped");
                    return Ok(());
                }
                forwarded += 1;
            }
        }

        debug!(forwarded, "Chat stream finished");
        Ok(())
    }
}
