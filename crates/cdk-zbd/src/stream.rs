//! Paid invoice stream
//!
//! ZBD reports settled charges through its callback URL. The service receiving
//! those callbacks republishes the charge id on a pub/sub topic, and the mint
//! consumes the topic through [`PaidInvoiceStream`].
//!
//! The stream is single-subscriber and cannot be restarted: once it yields
//! `None` (cancelled, or the source went away) it is closed for good. Closing
//! always unsubscribes from the source, whether through [`PaidInvoiceStream::close`],
//! cancellation, exhaustion, or dropping the stream.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Topic settled charge ids are published on
pub const PAID_INVOICES_CHANNEL: &str = "cashu:paid_invoices";

/// Message received from a pub/sub source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub channel: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a new message
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Subscribed pub/sub connection
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message; `None` once the connection is gone
    async fn recv(&mut self) -> Option<InboundMessage>;

    /// Unsubscribe and disconnect
    async fn close(&mut self) -> Result<(), Error>;
}

/// Stream of checking ids of settled invoices
pub struct PaidInvoiceStream {
    source: Option<Box<dyn MessageSource>>,
    topic: String,
    cancel_token: CancellationToken,
    open_streams: Arc<AtomicUsize>,
}

impl std::fmt::Debug for PaidInvoiceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaidInvoiceStream")
            .field("topic", &self.topic)
            .field("open", &self.source.is_some())
            .finish()
    }
}

impl PaidInvoiceStream {
    /// Wrap an already subscribed source
    ///
    /// `open_streams` is incremented now and decremented once when the stream
    /// closes, so streams sharing a counter report activity while any is open.
    pub fn new(
        source: Box<dyn MessageSource>,
        topic: impl Into<String>,
        cancel_token: CancellationToken,
        open_streams: Arc<AtomicUsize>,
    ) -> Self {
        let topic = topic.into();
        info!("Starting ZBD paid invoice stream on {}", topic);
        open_streams.fetch_add(1, Ordering::SeqCst);

        Self {
            source: Some(source),
            topic,
            cancel_token,
            open_streams,
        }
    }

    /// Topic the stream listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the stream can still yield ids
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Wait for the next settled checking id
    ///
    /// Messages on other topics and payloads that are not a non-empty UTF-8 id
    /// are skipped. Returns `None` once the stream is cancelled or the source
    /// ends, after unsubscribing.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            let source = self.source.as_mut()?;

            let message = tokio::select! {
                _ = self.cancel_token.cancelled() => None,
                message = source.recv() => message,
            };

            let Some(message) = message else {
                if let Err(err) = self.shutdown().await {
                    warn!("Failed to unsubscribe from {}: {}", self.topic, err);
                }
                return None;
            };

            if let Some(checking_id) = decode_checking_id(&self.topic, message) {
                debug!("Paid invoice notification: {}", checking_id);
                return Some(checking_id);
            }
        }
    }

    /// Unsubscribe and disconnect
    pub async fn close(mut self) -> Result<(), Error> {
        self.shutdown().await
    }

    /// Adapt into a [`Stream`]; dropping it closes the subscription
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = String> + Send>> {
        Box::pin(futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|checking_id| (checking_id, stream))
        }))
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        match self.source.take() {
            Some(mut source) => {
                self.open_streams.fetch_sub(1, Ordering::SeqCst);
                info!("Closing ZBD paid invoice stream on {}", self.topic);
                source.close().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for PaidInvoiceStream {
    fn drop(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        self.open_streams.fetch_sub(1, Ordering::SeqCst);

        let topic = std::mem::take(&mut self.topic);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = source.close().await {
                        warn!("Failed to unsubscribe from {}: {}", topic, err);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "Paid invoice stream on {} dropped outside a runtime, disconnecting without unsubscribe",
                    topic
                );
            }
        }
    }
}

fn decode_checking_id(topic: &str, message: InboundMessage) -> Option<String> {
    if message.channel != topic {
        return None;
    }

    let checking_id = String::from_utf8(message.payload).ok()?;
    let checking_id = checking_id.trim();

    if checking_id.is_empty() {
        None
    } else {
        Some(checking_id.to_string())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_source::RedisMessageSource;

#[cfg(feature = "redis")]
mod redis_source {
    use async_trait::async_trait;
    use futures::StreamExt;
    use redis::aio::{PubSubSink, PubSubStream};
    use tracing::debug;

    use super::{InboundMessage, MessageSource};
    use crate::error::Error;

    /// Redis pub/sub subscription to a single channel
    pub struct RedisMessageSource {
        sink: PubSubSink,
        stream: PubSubStream,
        channel: String,
    }

    impl RedisMessageSource {
        /// Connect to `redis_url` and subscribe to `channel`
        pub async fn connect(redis_url: &str, channel: &str) -> Result<Self, Error> {
            let client = redis::Client::open(redis_url)?;
            let pubsub = client.get_async_pubsub().await?;
            let (mut sink, stream) = pubsub.split();

            sink.subscribe(channel).await?;
            debug!("Subscribed to redis channel {}", channel);

            Ok(Self {
                sink,
                stream,
                channel: channel.to_string(),
            })
        }
    }

    #[async_trait]
    impl MessageSource for RedisMessageSource {
        async fn recv(&mut self) -> Option<InboundMessage> {
            let msg = self.stream.next().await?;

            Some(InboundMessage::new(
                msg.get_channel_name(),
                msg.get_payload_bytes(),
            ))
        }

        async fn close(&mut self) -> Result<(), Error> {
            self.sink.unsubscribe(self.channel.as_str()).await?;
            debug!("Unsubscribed from redis channel {}", self.channel);
            Ok(())
        }
    }
}
