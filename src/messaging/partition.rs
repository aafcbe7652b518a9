use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::consumer::{DeliveryHandler, InboundMessage};
use super::MessagingError;

// ============================================================================
// Partition Routing
// ============================================================================
//
// The router sits between the rdkafka stream and one worker task per
// (topic, partition):
// - each worker inbox is bounded; when it fills up the router pauses the
//   partition on the client and parks what it already fetched until the
//   worker frees a slot, then resumes it
// - seeks go through the router so it can stamp every message with the
//   partition's seek generation; a worker that rewound drops messages from
//   older generations instead of waiting for a particular offset
// - revoked partitions lose their worker; a later assignment starts a fresh
//   one
//
// ============================================================================

pub(crate) const PARTITION_BUFFER: usize = 64;
pub(crate) const REWIND_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) type PartitionKey = (String, i32);

/// A message stamped with its partition's seek generation at routing time
#[derive(Debug)]
pub(crate) struct Delivery {
    pub(crate) generation: u64,
    pub(crate) message: InboundMessage,
}

/// A worker asking the router to seek its partition back to `offset`
#[derive(Debug)]
pub(crate) struct RewindRequest {
    key: PartitionKey,
    offset: i64,
    reply: oneshot::Sender<Result<u64, MessagingError>>,
}

/// Client operations the router and its workers rely on
pub(crate) trait PartitionClient: Send + Sync + 'static {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), MessagingError>;
    fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<(), MessagingError>;
    fn pause(&self, topic: &str, partition: i32) -> Result<(), MessagingError>;
    fn resume(&self, topic: &str, partition: i32) -> Result<(), MessagingError>;
}

/// Commit/rewind as seen from a partition worker
#[async_trait]
pub(crate) trait OffsetControl: Send + Sync + 'static {
    /// Commit `message.offset + 1`
    fn acknowledge(&self, message: &InboundMessage) -> Result<(), MessagingError>;

    /// Seek back to `message`; returns the generation redelivered messages carry
    async fn rewind(&self, message: &InboundMessage) -> Result<u64, MessagingError>;
}

struct RoutedOffsets {
    client: Arc<dyn PartitionClient>,
    rewinds: mpsc::UnboundedSender<RewindRequest>,
}

#[async_trait]
impl OffsetControl for RoutedOffsets {
    fn acknowledge(&self, message: &InboundMessage) -> Result<(), MessagingError> {
        self.client.commit(&message.topic, message.partition, message.offset)
    }

    async fn rewind(&self, message: &InboundMessage) -> Result<u64, MessagingError> {
        let stopped = || MessagingError::Offset {
            operation: "seek",
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason: "consumer stopped".to_string(),
        };

        let (reply, answer) = oneshot::channel();
        self.rewinds
            .send(RewindRequest {
                key: (message.topic.clone(), message.partition),
                offset: message.offset,
                reply,
            })
            .map_err(|_| stopped())?;

        answer.await.map_err(|_| stopped())?
    }
}

type PermitReady = (PartitionKey, u64, Result<mpsc::OwnedPermit<Delivery>, mpsc::error::SendError<()>>);

struct WorkerSlot {
    id: u64,
    inbox: mpsc::Sender<Delivery>,
    parked: VecDeque<Delivery>,
    stop: CancellationToken,
}

pub(crate) struct PartitionRouter {
    consumer: &'static str,
    client: Arc<dyn PartitionClient>,
    handler: Arc<dyn DeliveryHandler>,
    offsets: Arc<dyn OffsetControl>,
    buffer: usize,
    rewind_backoff: Duration,
    stop: CancellationToken,
    next_slot: u64,
    workers: HashMap<PartitionKey, WorkerSlot>,
    generations: HashMap<PartitionKey, u64>,
    waiting: FuturesUnordered<BoxFuture<'static, PermitReady>>,
    tasks: JoinSet<()>,
}

impl PartitionRouter {
    pub(crate) fn new(
        consumer: &'static str,
        client: Arc<dyn PartitionClient>,
        handler: Arc<dyn DeliveryHandler>,
        rewinds: mpsc::UnboundedSender<RewindRequest>,
        stop: CancellationToken,
    ) -> Self {
        let offsets: Arc<dyn OffsetControl> = Arc::new(RoutedOffsets {
            client: client.clone(),
            rewinds,
        });

        Self {
            consumer,
            client,
            handler,
            offsets,
            buffer: PARTITION_BUFFER,
            rewind_backoff: REWIND_BACKOFF,
            stop,
            next_slot: 0,
            workers: HashMap::new(),
            generations: HashMap::new(),
            waiting: FuturesUnordered::new(),
            tasks: JoinSet::new(),
        }
    }

    #[cfg(test)]
    fn with_limits(mut self, buffer: usize, rewind_backoff: Duration) -> Self {
        self.buffer = buffer;
        self.rewind_backoff = rewind_backoff;
        self
    }

    pub(crate) fn route(&mut self, message: InboundMessage) {
        let key = (message.topic.clone(), message.partition);
        let generation = self.generations.get(&key).copied().unwrap_or(0);
        let delivery = Delivery { generation, message };

        if !self.workers.contains_key(&key) {
            let slot = self.spawn_worker(&key);
            self.workers.insert(key.clone(), slot);
        }

        let Some(slot) = self.workers.get_mut(&key) else {
            return;
        };

        // Keep partition order: nothing overtakes parked messages
        if !slot.parked.is_empty() {
            slot.parked.push_back(delivery);
            return;
        }

        match slot.inbox.try_send(delivery) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(delivery)) => {
                slot.parked.push_back(delivery);
                let slot_id = slot.id;
                let inbox = slot.inbox.clone();

                tracing::debug!(
                    consumer = self.consumer,
                    topic = %key.0,
                    partition = key.1,
                    "Partition worker busy, pausing partition"
                );
                if let Err(e) = self.client.pause(&key.0, key.1) {
                    tracing::warn!(consumer = self.consumer, error = %e, "Failed to pause partition");
                }
                self.wait_for_room(key, slot_id, inbox);
            }
            Err(mpsc::error::TrySendError::Closed(delivery)) => {
                tracing::warn!(
                    consumer = self.consumer,
                    topic = %key.0,
                    partition = key.1,
                    "Partition worker gone, restarting it"
                );
                let slot = self.spawn_worker(&key);
                if slot.inbox.try_send(delivery).is_err() {
                    tracing::warn!(consumer = self.consumer, "Dropped message for restarted worker");
                }
                self.workers.insert(key, slot);
            }
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Next worker that has room for a parked message
    pub(crate) async fn room_freed(&mut self) -> Option<PermitReady> {
        self.waiting.next().await
    }

    pub(crate) fn on_room(&mut self, (key, slot_id, permit): PermitReady) {
        let Some(slot) = self.workers.get_mut(&key).filter(|slot| slot.id == slot_id) else {
            // Slot was revoked or replaced meanwhile
            return;
        };

        let permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                let parked = std::mem::take(&mut slot.parked);
                self.workers.remove(&key);
                tracing::warn!(
                    consumer = self.consumer,
                    topic = %key.0,
                    partition = key.1,
                    parked = parked.len(),
                    "Partition worker gone, restarting it"
                );
                for delivery in parked {
                    self.route(delivery.message);
                }
                if self.workers.get(&key).map_or(true, |slot| slot.parked.is_empty()) {
                    self.resume(&key);
                }
                return;
            }
        };

        match slot.parked.pop_front() {
            Some(delivery) => {
                let inbox = permit.send(delivery);
                if slot.parked.is_empty() {
                    self.resume(&key);
                } else {
                    self.wait_for_room(key, slot_id, inbox);
                }
            }
            None => self.resume(&key),
        }
    }

    pub(crate) fn rewind(&mut self, request: RewindRequest) {
        let RewindRequest { key, offset, reply } = request;

        let result = self.client.seek(&key.0, key.1, offset).map(|()| {
            let generation = self.generations.entry(key.clone()).or_insert(0);
            *generation += 1;
            *generation
        });

        if let Ok(generation) = result {
            if let Some(slot) = self.workers.get_mut(&key) {
                slot.parked.clear();
            }
            tracing::debug!(
                consumer = self.consumer,
                topic = %key.0,
                partition = key.1,
                offset = offset,
                generation = generation,
                "Partition rewound"
            );
        }

        let _ = reply.send(result);
    }

    pub(crate) fn revoke(&mut self, keys: &[PartitionKey]) {
        for key in keys {
            if let Some(slot) = self.workers.remove(key) {
                slot.stop.cancel();
                tracing::info!(
                    consumer = self.consumer,
                    topic = %key.0,
                    partition = key.1,
                    dropped = slot.parked.len(),
                    "Partition revoked, worker stopped"
                );
            }
        }
    }

    /// Stop every worker and wait for them to exit
    pub(crate) async fn shutdown(mut self) {
        self.stop.cancel();
        self.workers.clear();
        self.waiting.clear();

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(consumer = self.consumer, error = %e, "Partition worker panicked");
            }
        }
        tracing::debug!(consumer = self.consumer, "All partition workers stopped");
    }

    fn wait_for_room(&mut self, key: PartitionKey, slot_id: u64, inbox: mpsc::Sender<Delivery>) {
        self.waiting
            .push(Box::pin(async move { (key, slot_id, inbox.reserve_owned().await) }));
    }

    fn resume(&self, (topic, partition): &PartitionKey) {
        tracing::debug!(consumer = self.consumer, topic = %topic, partition = partition, "Resuming partition");
        if let Err(e) = self.client.resume(topic, *partition) {
            tracing::warn!(consumer = self.consumer, error = %e, "Failed to resume partition");
        }
    }

    fn spawn_worker(&mut self, (topic, partition): &PartitionKey) -> WorkerSlot {
        let (inbox, rx) = mpsc::channel(self.buffer);
        let stop = self.stop.child_token();
        let worker = PartitionWorker {
            consumer: self.consumer,
            handler: self.handler.clone(),
            offsets: self.offsets.clone(),
            rewind_backoff: self.rewind_backoff,
            stop: stop.clone(),
        };

        tracing::debug!(consumer = self.consumer, topic = %topic, partition = partition, "Starting partition worker");
        self.tasks.spawn(worker.run(rx));
        self.next_slot += 1;

        WorkerSlot {
            id: self.next_slot,
            inbox,
            parked: VecDeque::new(),
            stop,
        }
    }
}

pub(crate) struct PartitionWorker {
    consumer: &'static str,
    handler: Arc<dyn DeliveryHandler>,
    offsets: Arc<dyn OffsetControl>,
    rewind_backoff: Duration,
    stop: CancellationToken,
}

impl PartitionWorker {
    pub(crate) async fn run(self, mut inbox: mpsc::Receiver<Delivery>) {
        let mut fence = 0u64;
        let mut handle_again: Option<Delivery> = None;

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let delivery = match handle_again.take() {
                Some(delivery) => delivery,
                None => tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => break,
                    next = inbox.recv() => match next {
                        Some(delivery) => delivery,
                        None => break,
                    },
                },
            };

            if delivery.generation < fence {
                tracing::trace!(
                    offset = delivery.message.offset,
                    generation = delivery.generation,
                    fence = fence,
                    "Skipping message fetched before rewind"
                );
                continue;
            }

            let message = &delivery.message;
            match self.handler.handle(message).await {
                Ok(disposition) => {
                    if let Err(e) = self.offsets.acknowledge(message) {
                        tracing::warn!(
                            consumer = self.consumer,
                            error = %e,
                            "Failed to commit offset (message may be redelivered)"
                        );
                    }

                    if let Some(pause) = self.handler.pause_after(&disposition) {
                        tracing::debug!(
                            consumer = self.consumer,
                            topic = %message.topic,
                            partition = message.partition,
                            pause_ms = pause.as_millis() as u64,
                            "Throttling partition"
                        );
                        if !self.rest(pause).await {
                            break;
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(
                        consumer = self.consumer,
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %error,
                        "Acknowledgment withheld, message will be redelivered"
                    );

                    if !self.rest(self.rewind_backoff).await {
                        break;
                    }

                    match self.offsets.rewind(message).await {
                        Ok(generation) => fence = generation,
                        Err(e) => {
                            tracing::warn!(
                                consumer = self.consumer,
                                error = %e,
                                "Seek failed, handling message again in place"
                            );
                            handle_again = Some(delivery);
                        }
                    }
                }
            }
        }

        tracing::debug!(consumer = self.consumer, "Partition worker stopped");
    }

    /// Sleep unless stopped first; false when stopped
    async fn rest(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageMetadata;
    use crate::pipeline::{Channel, Disposition, PipelineError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MemoryOffsets {
        acked: Mutex<Vec<(i32, i64)>>,
        rewound: Mutex<Vec<i64>>,
        generation: AtomicU64,
        seek_broken: bool,
    }

    #[async_trait]
    impl OffsetControl for MemoryOffsets {
        fn acknowledge(&self, message: &InboundMessage) -> Result<(), MessagingError> {
            self.acked.lock().unwrap().push((message.partition, message.offset));
            Ok(())
        }

        async fn rewind(&self, message: &InboundMessage) -> Result<u64, MessagingError> {
            if self.seek_broken {
                return Err(MessagingError::Offset {
                    operation: "seek",
                    topic: message.topic.clone(),
                    partition: message.partition,
                    offset: message.offset,
                    reason: "not assigned".to_string(),
                });
            }
            self.rewound.lock().unwrap().push(message.offset);
            Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[derive(Default)]
    struct MemoryClient {
        committed: Mutex<Vec<(i32, i64)>>,
        seeks: Mutex<Vec<(i32, i64)>>,
        paused: Mutex<Vec<i32>>,
        resumed: Mutex<Vec<i32>>,
    }

    impl PartitionClient for MemoryClient {
        fn commit(&self, _topic: &str, partition: i32, offset: i64) -> Result<(), MessagingError> {
            self.committed.lock().unwrap().push((partition, offset));
            Ok(())
        }

        fn seek(&self, _topic: &str, partition: i32, offset: i64) -> Result<(), MessagingError> {
            self.seeks.lock().unwrap().push((partition, offset));
            Ok(())
        }

        fn pause(&self, _topic: &str, partition: i32) -> Result<(), MessagingError> {
            self.paused.lock().unwrap().push(partition);
            Ok(())
        }

        fn resume(&self, _topic: &str, partition: i32) -> Result<(), MessagingError> {
            self.resumed.lock().unwrap().push(partition);
            Ok(())
        }
    }

    /// Fails the first `failures` calls, then succeeds. Optionally waits for a
    /// gate permit per message and pauses after each success.
    struct ScriptedHandler {
        failures: Mutex<u32>,
        handled: Mutex<Vec<i64>>,
        pause: Option<Duration>,
        gate: Option<Semaphore>,
    }

    impl ScriptedHandler {
        fn new(failures: u32, pause: Option<Duration>) -> Self {
            Self {
                failures: Mutex::new(failures),
                handled: Mutex::new(Vec::new()),
                pause,
                gate: None,
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new(0, None)
            }
        }

        fn handled(&self) -> Vec<i64> {
            self.handled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryHandler for ScriptedHandler {
        async fn handle(&self, message: &InboundMessage) -> Result<Disposition, PipelineError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.handled.lock().unwrap().push(message.offset);

            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PipelineError::Publish {
                    channel: Channel::Retry,
                    source: MessagingError::Publish {
                        topic: "orders-retry".to_string(),
                        reason: "broker down".to_string(),
                    },
                });
            }
            Ok(Disposition::Retried { attempt: 1 })
        }

        fn pause_after(&self, _disposition: &Disposition) -> Option<Duration> {
            self.pause
        }
    }

    fn message(partition: i32, offset: i64) -> InboundMessage {
        InboundMessage {
            topic: "orders".to_string(),
            partition,
            offset,
            key: None,
            payload: None,
            metadata: MessageMetadata::new(),
        }
    }

    fn delivery(generation: u64, offset: i64) -> Delivery {
        Delivery {
            generation,
            message: message(0, offset),
        }
    }

    fn worker(handler: Arc<ScriptedHandler>, offsets: Arc<MemoryOffsets>) -> PartitionWorker {
        PartitionWorker {
            consumer: "test",
            handler,
            offsets,
            rewind_backoff: Duration::from_millis(1),
            stop: CancellationToken::new(),
        }
    }

    fn router(
        handler: Arc<ScriptedHandler>,
        buffer: usize,
    ) -> (PartitionRouter, Arc<MemoryClient>, mpsc::UnboundedReceiver<RewindRequest>) {
        let client = Arc::new(MemoryClient::default());
        let (rewinds, requests) = mpsc::unbounded_channel();
        let router = PartitionRouter::new("test", client.clone(), handler, rewinds, CancellationToken::new())
            .with_limits(buffer, Duration::from_millis(1));
        (router, client, requests)
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    // ------------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_successful_messages_are_committed_in_order() {
        let handler = Arc::new(ScriptedHandler::new(0, None));
        let offsets = Arc::new(MemoryOffsets::default());
        let (tx, rx) = mpsc::channel(8);

        for offset in 0..3 {
            tx.send(delivery(0, offset)).await.unwrap();
        }
        drop(tx);
        worker(handler, offsets.clone()).run(rx).await;

        assert_eq!(*offsets.acked.lock().unwrap(), vec![(0, 0), (0, 1), (0, 2)]);
        assert!(offsets.rewound.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_handle_rewinds_and_skips_prefetched_messages() {
        let handler = Arc::new(ScriptedHandler::new(1, None));
        let offsets = Arc::new(MemoryOffsets::default());
        let (tx, rx) = mpsc::channel(8);

        // 5 fails; 6 was fetched before the seek; then the broker redelivers 5 and 6
        for (generation, offset) in [(0, 5), (0, 6), (1, 5), (1, 6)] {
            tx.send(delivery(generation, offset)).await.unwrap();
        }
        drop(tx);
        worker(handler.clone(), offsets.clone()).run(rx).await;

        assert_eq!(*offsets.rewound.lock().unwrap(), vec![5]);
        assert_eq!(*offsets.acked.lock().unwrap(), vec![(0, 5), (0, 6)]);
        assert_eq!(handler.handled(), vec![5, 5, 6]);
    }

    #[tokio::test]
    async fn test_redelivery_from_a_later_offset_is_not_skipped() {
        let handler = Arc::new(ScriptedHandler::new(1, None));
        let offsets = Arc::new(MemoryOffsets::default());
        let (tx, rx) = mpsc::channel(8);

        // After the seek to 120 the broker resumes at 500 (retention or a
        // newer committed offset), so 120 never comes back
        for (generation, offset) in [(0, 120), (0, 121), (1, 500), (1, 501), (1, 502)] {
            tx.send(delivery(generation, offset)).await.unwrap();
        }
        drop(tx);
        worker(handler.clone(), offsets.clone()).run(rx).await;

        assert_eq!(handler.handled(), vec![120, 500, 501, 502]);
        assert_eq!(*offsets.acked.lock().unwrap(), vec![(0, 500), (0, 501), (0, 502)]);
    }

    #[tokio::test]
    async fn test_failed_seek_handles_message_again_in_place() {
        let handler = Arc::new(ScriptedHandler::new(2, None));
        let offsets = Arc::new(MemoryOffsets {
            seek_broken: true,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel(8);

        tx.send(delivery(0, 9)).await.unwrap();
        drop(tx);
        worker(handler.clone(), offsets.clone()).run(rx).await;

        assert_eq!(handler.handled().len(), 3);
        assert_eq!(*offsets.acked.lock().unwrap(), vec![(0, 9)]);
    }

    #[tokio::test]
    async fn test_throttle_only_pauses_its_own_partition() {
        let offsets = Arc::new(MemoryOffsets::default());
        let slow = Arc::new(ScriptedHandler::new(0, Some(Duration::from_millis(300))));
        let fast = Arc::new(ScriptedHandler::new(0, None));

        let (slow_tx, slow_rx) = mpsc::channel(8);
        let (fast_tx, fast_rx) = mpsc::channel(8);

        let started = Instant::now();
        let slow_task = tokio::spawn(worker(slow, offsets.clone()).run(slow_rx));
        let fast_task = tokio::spawn(worker(fast, offsets.clone()).run(fast_rx));

        for offset in 0..2 {
            slow_tx.send(Delivery { generation: 0, message: message(0, offset) }).await.unwrap();
            fast_tx.send(Delivery { generation: 0, message: message(1, offset) }).await.unwrap();
        }
        drop(fast_tx);

        fast_task.await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        {
            let acked = offsets.acked.lock().unwrap();
            assert!(acked.contains(&(1, 0)) && acked.contains(&(1, 1)));
            assert!(!acked.contains(&(0, 1)));
        }

        drop(slow_tx);
        slow_task.await.unwrap();
        assert!(offsets.acked.lock().unwrap().contains(&(0, 1)));
    }

    #[tokio::test]
    async fn test_stop_interrupts_throttle_and_leaves_queue_unacknowledged() {
        let handler = Arc::new(ScriptedHandler::new(0, Some(Duration::from_secs(60))));
        let offsets = Arc::new(MemoryOffsets::default());
        let (tx, rx) = mpsc::channel(8);

        let worker = worker(handler, offsets.clone());
        let stop = worker.stop.clone();
        let task = tokio::spawn(worker.run(rx));

        tx.send(delivery(0, 0)).await.unwrap();
        tx.send(delivery(0, 1)).await.unwrap();
        eventually(|| !offsets.acked.lock().unwrap().is_empty()).await;

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(*offsets.acked.lock().unwrap(), vec![(0, 0)]);
    }

    // ------------------------------------------------------------------------
    // Router
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_inbox_pauses_partition_until_worker_catches_up() {
        let handler = Arc::new(ScriptedHandler::gated());
        let (mut router, client, _requests) = router(handler.clone(), 1);

        // Workers have not run yet: the first message fills the inbox
        for offset in 0..3 {
            router.route(message(0, offset));
        }
        router.route(message(1, 0));

        assert_eq!(*client.paused.lock().unwrap(), vec![0]);
        assert!(router.is_waiting());

        handler.gate.as_ref().unwrap().add_permits(10);
        while router.is_waiting() {
            let ready = router.room_freed().await.unwrap();
            router.on_room(ready);
        }

        assert_eq!(*client.resumed.lock().unwrap(), vec![0]);
        eventually(|| client.committed.lock().unwrap().len() == 4).await;
        let committed = client.committed.lock().unwrap().clone();
        let partition_zero: Vec<_> = committed.iter().filter(|(p, _)| *p == 0).collect();
        assert_eq!(partition_zero, vec![&(0, 0), &(0, 1), &(0, 2)]);

        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_rewind_fences_messages_routed_before_the_seek() {
        let handler = Arc::new(ScriptedHandler::new(1, None));
        let (mut router, client, mut requests) = router(handler.clone(), 8);

        router.route(message(0, 120));
        router.route(message(0, 121));

        let request = requests.recv().await.unwrap();
        router.rewind(request);
        assert_eq!(*client.seeks.lock().unwrap(), vec![(0, 120)]);

        for offset in [500, 501] {
            router.route(message(0, offset));
        }
        eventually(|| client.committed.lock().unwrap().len() == 2).await;

        assert_eq!(*client.committed.lock().unwrap(), vec![(0, 500), (0, 501)]);
        assert_eq!(handler.handled(), vec![120, 500, 501]);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_revoked_partition_worker_is_replaced_on_reassignment() {
        let handler = Arc::new(ScriptedHandler::new(0, None));
        let (mut router, client, _requests) = router(handler.clone(), 8);

        router.route(message(0, 1));
        router.revoke(&[("orders".to_string(), 0)]);
        router.route(message(0, 7));

        eventually(|| client.committed.lock().unwrap().contains(&(0, 7))).await;
        assert!(!client.committed.lock().unwrap().contains(&(0, 1)));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_throttled_workers() {
        let handler = Arc::new(ScriptedHandler::new(0, Some(Duration::from_secs(60))));
        let (mut router, client, _requests) = router(handler, 8);

        router.route(message(0, 0));
        router.route(message(1, 0));
        eventually(|| client.committed.lock().unwrap().len() == 2).await;

        tokio::time::timeout(Duration::from_secs(1), router.shutdown())
            .await
            .unwrap();
    }
}
