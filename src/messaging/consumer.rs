use async_trait::async_trait;
use futures_util::StreamExt;
use rdkafka::{
    client::ClientContext,
    consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    message::{Headers, Message},
    Offset, TopicPartitionList,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::partition::{PartitionClient, PartitionKey, PartitionRouter};
use super::MessagingError;
use crate::models::{MessageMetadata, Order};
use crate::pipeline::{Disposition, PipelineError};

// ============================================================================
// Partitioned Consumer
// ============================================================================
//
// One dispatcher owns the rdkafka stream and hands messages to a
// `PartitionRouter`, which keeps one worker task per (topic, partition).
// Each worker handles its messages strictly in order, so partitions run
// concurrently while a partition never does.
//
// Acknowledgment = committing offset + 1 for the partition, and happens only
// after the handler returned `Ok`. When the handler returns an error the
// worker withholds the commit and asks the dispatcher to seek the partition
// back to the failed offset, so the broker redelivers it. Messages fetched
// before that seek are dropped by the worker. If the seek fails the worker
// re-handles the message itself. Either way no later offset of that
// partition is committed first.
//
// A handler may ask for a pause after a disposition (the inter-retry
// throttle). Only that partition's worker sleeps; once its bounded inbox is
// full the partition is paused on the client instead of buffering.
//
// Revoked partitions have their workers stopped. On shutdown every worker is
// stopped and joined before `run` returns.
//
// ============================================================================

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// A consumed message detached from the client
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub metadata: MessageMetadata,
}

impl InboundMessage {
    fn from_kafka<M: Message>(message: &M) -> Self {
        let metadata = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|header| {
                        let value = header.value?;
                        Some((header.key.to_string(), String::from_utf8_lossy(value).into_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec),
            metadata,
        }
    }

    /// Decode the payload as an order
    pub fn order(&self) -> serde_json::Result<Order> {
        match &self.payload {
            Some(payload) => Order::from_payload(payload),
            None => Err(<serde_json::Error as serde::de::Error>::custom("message has no payload")),
        }
    }
}

/// Per-message logic driven by a `PartitionedConsumer`.
///
/// `Ok` means the outcome is durable and the message may be acknowledged;
/// `Err` withholds the acknowledgment.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> Result<Disposition, PipelineError>;

    /// How long the partition should rest after `disposition`
    fn pause_after(&self, _disposition: &Disposition) -> Option<Duration> {
        None
    }
}

/// Client context that forwards partition revocations to the dispatcher
pub struct PartitionContext {
    group_id: String,
    revoked: mpsc::UnboundedSender<Vec<PartitionKey>>,
}

impl PartitionContext {
    pub(crate) fn new(group_id: &str) -> (Self, mpsc::UnboundedReceiver<Vec<PartitionKey>>) {
        let (revoked, revocations) = mpsc::unbounded_channel();
        let context = Self {
            group_id: group_id.to_string(),
            revoked,
        };
        (context, revocations)
    }
}

fn partition_keys(tpl: &TopicPartitionList) -> Vec<PartitionKey> {
    tpl.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

impl ClientContext for PartitionContext {}

impl ConsumerContext for PartitionContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let keys = partition_keys(tpl);
            tracing::info!(group_id = %self.group_id, partitions = ?keys, "Partitions revoked");
            let _ = self.revoked.send(keys);
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                tracing::info!(group_id = %self.group_id, partitions = ?partition_keys(tpl), "Partitions assigned");
            }
            Rebalance::Error(e) => {
                tracing::warn!(group_id = %self.group_id, error = ?e, "Rebalance failed");
            }
            Rebalance::Revoke(_) => {}
        }
    }
}

/// A subscribed, manually-committed consumer plus its revocation feed
pub struct SubscribedConsumer {
    consumer: StreamConsumer<PartitionContext>,
    revocations: mpsc::UnboundedReceiver<Vec<PartitionKey>>,
}

impl SubscribedConsumer {
    pub(crate) fn new(
        consumer: StreamConsumer<PartitionContext>,
        revocations: mpsc::UnboundedReceiver<Vec<PartitionKey>>,
    ) -> Self {
        Self { consumer, revocations }
    }
}

impl PartitionClient for StreamConsumer<PartitionContext> {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), MessagingError> {
        let offset_error = |reason: String| MessagingError::Offset {
            operation: "commit",
            topic: topic.to_string(),
            partition,
            offset,
            reason,
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| offset_error(e.to_string()))?;
        Consumer::commit(self, &tpl, CommitMode::Async).map_err(|e| offset_error(e.to_string()))
    }

    fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<(), MessagingError> {
        Consumer::seek(self, topic, partition, Offset::Offset(offset), SEEK_TIMEOUT).map_err(|e| {
            MessagingError::Offset {
                operation: "seek",
                topic: topic.to_string(),
                partition,
                offset,
                reason: e.to_string(),
            }
        })
    }

    fn pause(&self, topic: &str, partition: i32) -> Result<(), MessagingError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        Consumer::pause(self, &tpl).map_err(|e| MessagingError::Flow {
            operation: "pause",
            topic: topic.to_string(),
            partition,
            reason: e.to_string(),
        })
    }

    fn resume(&self, topic: &str, partition: i32) -> Result<(), MessagingError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        Consumer::resume(self, &tpl).map_err(|e| MessagingError::Flow {
            operation: "resume",
            topic: topic.to_string(),
            partition,
            reason: e.to_string(),
        })
    }
}

pub struct PartitionedConsumer {
    name: &'static str,
    consumer: Arc<StreamConsumer<PartitionContext>>,
    revocations: mpsc::UnboundedReceiver<Vec<PartitionKey>>,
    handler: Arc<dyn DeliveryHandler>,
}

impl PartitionedConsumer {
    pub fn new(name: &'static str, subscribed: SubscribedConsumer, handler: Arc<dyn DeliveryHandler>) -> Self {
        Self {
            name,
            consumer: Arc::new(subscribed.consumer),
            revocations: subscribed.revocations,
            handler,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Consume until `shutdown` fires or the stream ends, then stop and join
    /// every partition worker
    pub async fn run(self, shutdown: CancellationToken) {
        let PartitionedConsumer {
            name,
            consumer,
            mut revocations,
            handler,
        } = self;

        let (rewind_tx, mut rewinds) = mpsc::unbounded_channel();
        let client: Arc<dyn PartitionClient> = consumer.clone();
        let mut router = PartitionRouter::new(name, client, handler, rewind_tx, shutdown.child_token());
        let mut stream = consumer.stream();

        tracing::info!(consumer = name, "🔄 Consumer loop started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(keys) = revocations.recv() => router.revoke(&keys),
                Some(request) = rewinds.recv() => router.rewind(request),
                Some(ready) = router.room_freed(), if router.is_waiting() => router.on_room(ready),
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        let inbound = InboundMessage::from_kafka(&message);
                        tracing::trace!(
                            consumer = name,
                            topic = %inbound.topic,
                            partition = inbound.partition,
                            offset = inbound.offset,
                            "Received message"
                        );
                        // A revocation raised while polling applies before routing
                        while let Ok(keys) = revocations.try_recv() {
                            router.revoke(&keys);
                        }
                        router.route(inbound);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(consumer = name, error = %e, "Failed to receive message");
                    }
                    None => break,
                }
            }
        }

        drop(stream);
        drop(rewinds);
        router.shutdown().await;
        tracing::info!(consumer = name, "🛑 Consumer loop stopped");
    }
}
