use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::broker::Broker;
use crate::error::{BrokerError, OutboxError};
use crate::models::{BusinessType, OutboxMessage, TopicMap};
use crate::store::{OutboxStore, OutboxTransaction};

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Delay between ticks while the queue is healthy.
    pub poll_interval: Duration,
    /// Messages a tick may move off the queue before yielding.
    pub batch_size: u32,
    /// Deadline for a single broker publish.
    pub publish_timeout: Duration,
    /// Failed publishes after which a message is dead-lettered. `None` keeps
    /// retrying forever, blocking the business type behind it.
    pub max_publish_attempts: Option<u32>,
    /// Upper bound of the delay between failing ticks.
    pub max_backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            publish_timeout: Duration::from_secs(5),
            max_publish_attempts: None,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// What a single cycle did to the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    Delivered { message_id: i64 },
    DeadLettered { message_id: i64, attempts: i32 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub delivered: u32,
    pub dead_lettered: u32,
}

impl TickSummary {
    pub fn total(&self) -> u32 {
        self.delivered + self.dead_lettered
    }
}

/// Drains outbox queues into a broker, one message per transaction, with at
/// most one cycle per business type running across all processes sharing
/// the database.
pub struct Dispatcher<S, B> {
    id: Uuid,
    store: S,
    broker: B,
    topics: TopicMap,
    settings: DispatcherSettings,
    backoff: Backoff,
}

impl<S, B> Dispatcher<S, B>
where
    S: OutboxStore,
    B: Broker,
{
    pub fn new(store: S, broker: B, topics: TopicMap, settings: DispatcherSettings) -> Self {
        let backoff = Backoff::new(settings.poll_interval, settings.max_backoff);
        Self {
            id: Uuid::new_v4(),
            store,
            broker,
            topics,
            settings,
            backoff,
        }
    }

    /// One lock-peek-publish-delete pass over the head of `business_type`'s queue.
    ///
    /// Any error before the commit drops the transaction, which rolls it back
    /// and releases the lock. A failed publish is committed as a recorded
    /// attempt (never a delete) and reported as [`OutboxError::Publish`].
    #[instrument(skip(self), fields(dispatcher_id = %self.id, business_type = %business_type, message_id))]
    pub async fn run_cycle(&self, business_type: BusinessType) -> Result<CycleOutcome, OutboxError> {
        let topic = self
            .topics
            .topic_for(business_type)
            .ok_or(OutboxError::UnknownBusinessType(business_type))?;

        let mut tx = self.store.begin().await?;
        tx.acquire_for_update(business_type).await?;

        let Some(message) = tx.peek_oldest(business_type).await? else {
            tx.commit().await?;
            debug!("No pending messages.");
            return Ok(CycleOutcome::Idle);
        };
        Span::current().record("message_id", message.id);

        match self.publish(topic, &message.payload).await {
            Ok(()) => {
                tx.delete_by_id(message.id).await?;
                tx.commit().await?;
                info!(%topic, "Message published and removed from the outbox.");
                Ok(CycleOutcome::Delivered { message_id: message.id })
            }
            Err(source) => self.retain_failed(tx, &message, source).await,
        }
    }

    /// Runs cycles until the queue is idle or `batch_size` messages have left it.
    pub async fn run_tick(&self, business_type: BusinessType) -> Result<TickSummary, OutboxError> {
        let mut summary = TickSummary::default();
        let limit = self.settings.batch_size.max(1);

        while summary.total() < limit {
            match self.run_cycle(business_type).await? {
                CycleOutcome::Idle => break,
                CycleOutcome::Delivered { .. } => summary.delivered += 1,
                CycleOutcome::DeadLettered { .. } => summary.dead_lettered += 1,
            }
        }

        Ok(summary)
    }

    /// Runs one worker per configured business type until `shutdown` flips to
    /// `true` (or its sender is dropped).
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();

        for business_type in self.topics.business_types() {
            let dispatcher = Arc::clone(&self);
            let shutdown = shutdown.clone();
            workers.spawn(async move { dispatcher.run_worker(business_type, shutdown).await });
        }
        info!(
            dispatcher_id = %self.id,
            business_types = self.topics.len(),
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Dispatcher started."
        );

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(dispatcher_id = %self.id, "Dispatcher worker stopped abnormally: {}", e);
            }
        }
        info!(dispatcher_id = %self.id, "Dispatcher stopped.");
    }

    async fn run_worker(&self, business_type: BusinessType, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_failures = 0u32;

        while !*shutdown.borrow() {
            let delay = match self.run_tick(business_type).await {
                Ok(summary) => {
                    consecutive_failures = 0;
                    if summary.total() > 0 {
                        info!(
                            %business_type,
                            delivered = summary.delivered,
                            dead_lettered = summary.dead_lettered,
                            "Outbox tick complete."
                        );
                    }
                    self.settings.poll_interval
                }
                Err(e) if e.is_contention() => {
                    consecutive_failures = 0;
                    warn!(%business_type, "Skipping tick: {}", e);
                    self.settings.poll_interval
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self.backoff.delay_for(consecutive_failures);
                    error!(
                        %business_type,
                        consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Outbox tick failed: {}",
                        e
                    );
                    delay
                }
            };

            tokio::select! {
                _ = time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(%business_type, "Worker exiting.");
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let deadline = self.settings.publish_timeout;
        match time::timeout(deadline, self.broker.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(deadline)),
        }
    }

    async fn retain_failed(
        &self,
        mut tx: S::Tx,
        message: &OutboxMessage,
        source: BrokerError,
    ) -> Result<CycleOutcome, OutboxError> {
        let reason = source.to_string();
        let attempts = tx.record_failed_attempt(message.id, &reason).await?;

        let exhausted = self
            .settings
            .max_publish_attempts
            .is_some_and(|max| i64::from(attempts) >= i64::from(max));

        if exhausted {
            tx.move_to_dead_letter(message.id, &reason).await?;
            tx.commit().await?;
            error!(attempts, error = %reason, "Message exhausted its publish attempts and was dead-lettered.");
            return Ok(CycleOutcome::DeadLettered { message_id: message.id, attempts });
        }

        tx.commit().await?;
        Err(OutboxError::Publish {
            message_id: message.id,
            attempts,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::provision_lock_rows;
    use crate::memory::InMemoryOutboxStore;
    use crate::store::PgOutboxStore;
    use sqlx::Executor;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const ORDERS: BusinessType = BusinessType(7);
    const TOPIC: &str = "orders-topic";

    /// Records successful publishes; fails while `failing` is set.
    #[derive(Default)]
    struct StubBroker {
        failing: AtomicBool,
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl StubBroker {
        fn failing() -> Self {
            let broker = Self::default();
            broker.set_failing(true);
            broker
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn published_payloads(&self) -> Vec<Vec<u8>> {
            self.published.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl Broker for StubBroker {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(BrokerError::Transport("connection refused".to_string()));
            }
            self.published.lock().unwrap().push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    /// Accepts the message and then never acknowledges.
    #[derive(Default)]
    struct HangingBroker {
        accepted: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Broker for HangingBroker {
        async fn publish(&self, _topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            self.accepted.lock().unwrap().push(payload.to_vec());
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Tracks how many publishes overlap.
    #[derive(Default)]
    struct SlowBroker {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        published: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Broker for SlowBroker {
        async fn publish(&self, _topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(50)).await;
            self.published.lock().unwrap().push(payload.to_vec());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn store() -> InMemoryOutboxStore {
        let store = InMemoryOutboxStore::with_lock_timeout(Duration::from_secs(5));
        store.provision([ORDERS]);
        store
    }

    fn topics() -> TopicMap {
        TopicMap::new().with_topic(ORDERS, TOPIC)
    }

    fn dispatcher<B: Broker>(
        store: InMemoryOutboxStore,
        broker: B,
        settings: DispatcherSettings,
    ) -> Dispatcher<InMemoryOutboxStore, B> {
        Dispatcher::new(store, broker, topics(), settings)
    }

    async fn enqueue_committed(store: &InMemoryOutboxStore, values: &[&str]) {
        let payloads: Vec<Vec<u8>> = values.iter().map(|v| v.as_bytes().to_vec()).collect();
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(ORDERS, &payloads).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn bytes(values: &[&str]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn delivers_in_order_and_poison_message_stays_at_the_head() {
        let store = store();
        enqueue_committed(&store, &["A", "B", "C"]).await;
        let broker = Arc::new(StubBroker::default());
        let dispatcher = dispatcher(store.clone(), broker.clone(), DispatcherSettings::default());

        assert!(matches!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Delivered { .. }));
        assert_eq!(broker.published_payloads(), bytes(&["A"]));
        assert_eq!(store.pending_payloads(ORDERS), bytes(&["B", "C"]));

        assert!(matches!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Delivered { .. }));
        assert_eq!(broker.published_payloads(), bytes(&["A", "B"]));
        assert_eq!(store.pending_payloads(ORDERS), bytes(&["C"]));

        broker.set_failing(true);
        for expected_attempts in 1..=4 {
            let err = dispatcher.run_cycle(ORDERS).await.unwrap_err();
            assert!(
                matches!(err, OutboxError::Publish { attempts, .. } if attempts == expected_attempts),
                "unexpected error: {:?}",
                err
            );
            assert_eq!(store.pending_payloads(ORDERS), bytes(&["C"]));
        }
        assert_eq!(broker.published_payloads(), bytes(&["A", "B"]));
        assert_eq!(store.pending(ORDERS)[0].attempts, 4);
    }

    #[tokio::test]
    async fn empty_queue_is_an_idle_cycle() {
        let dispatcher = dispatcher(store(), StubBroker::default(), DispatcherSettings::default());
        assert_eq!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Idle);
        assert_eq!(dispatcher.run_tick(ORDERS).await.unwrap(), TickSummary::default());
    }

    #[tokio::test]
    async fn unmapped_business_type_is_rejected() {
        let dispatcher = dispatcher(store(), StubBroker::default(), DispatcherSettings::default());
        let err = dispatcher.run_cycle(BusinessType(99)).await.unwrap_err();
        assert!(matches!(err, OutboxError::UnknownBusinessType(BusinessType(99))));
    }

    #[tokio::test]
    async fn rolled_back_business_transaction_leaves_nothing_to_dispatch() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(ORDERS, &bytes(&["orphan"])).await.unwrap();
        tx.rollback().await.unwrap();

        let broker = Arc::new(StubBroker::default());
        let dispatcher = dispatcher(store, broker.clone(), DispatcherSettings::default());
        assert_eq!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Idle);
        assert!(broker.published_payloads().is_empty());
    }

    #[tokio::test]
    async fn dead_letters_after_max_attempts_and_unblocks_the_queue() {
        let store = store();
        enqueue_committed(&store, &["poison", "next"]).await;
        let broker = Arc::new(StubBroker::failing());
        let settings = DispatcherSettings {
            max_publish_attempts: Some(3),
            ..DispatcherSettings::default()
        };
        let dispatcher = dispatcher(store.clone(), broker.clone(), settings);

        assert!(dispatcher.run_cycle(ORDERS).await.is_err());
        assert!(dispatcher.run_cycle(ORDERS).await.is_err());
        let outcome = dispatcher.run_cycle(ORDERS).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::DeadLettered { attempts: 3, .. }));

        assert_eq!(store.pending_payloads(ORDERS), bytes(&["next"]));
        let dead = store.dead_letters(ORDERS);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, b"poison");
        assert_eq!(dead[0].attempts, 3);

        broker.set_failing(false);
        assert!(matches!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Delivered { .. }));
        assert_eq!(broker.published_payloads(), bytes(&["next"]));
        assert!(store.pending(ORDERS).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_timeout_keeps_the_message() {
        let store = store();
        enqueue_committed(&store, &["A"]).await;
        let broker = Arc::new(HangingBroker::default());
        let settings = DispatcherSettings {
            publish_timeout: Duration::from_millis(100),
            ..DispatcherSettings::default()
        };
        let dispatcher = dispatcher(store.clone(), broker.clone(), settings);

        let err = dispatcher.run_cycle(ORDERS).await.unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Publish { attempts: 1, source: BrokerError::Timeout(_), .. }
        ));
        assert_eq!(store.pending_payloads(ORDERS), bytes(&["A"]));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_cycle_after_publish_leaves_message_redeliverable() {
        let store = store();
        enqueue_committed(&store, &["A"]).await;
        let broker = Arc::new(HangingBroker::default());
        let settings = DispatcherSettings {
            publish_timeout: Duration::from_secs(3600),
            ..DispatcherSettings::default()
        };
        let dispatcher = dispatcher(store.clone(), broker.clone(), settings);

        let interrupted = time::timeout(Duration::from_millis(50), dispatcher.run_cycle(ORDERS)).await;
        assert!(interrupted.is_err());

        assert_eq!(*broker.accepted.lock().unwrap(), bytes(&["A"]));
        assert_eq!(store.pending_payloads(ORDERS), bytes(&["A"]));
        assert_eq!(store.pending(ORDERS)[0].attempts, 0);

        // The interrupted transaction released the lock.
        let mut tx = store.begin().await.unwrap();
        tx.acquire_for_update(ORDERS).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_dispatchers_never_publish_the_same_type_at_once() {
        let store = store();
        enqueue_committed(&store, &["A", "B", "C", "D"]).await;
        let broker = Arc::new(SlowBroker::default());

        let replica_a = Arc::new(dispatcher(store.clone(), broker.clone(), DispatcherSettings::default()));
        let replica_b = Arc::new(dispatcher(store.clone(), broker.clone(), DispatcherSettings::default()));

        let mut cycles = JoinSet::new();
        for replica in [&replica_a, &replica_b, &replica_a, &replica_b] {
            let replica = Arc::clone(replica);
            cycles.spawn(async move { replica.run_cycle(ORDERS).await });
        }
        while let Some(joined) = cycles.join_next().await {
            assert!(matches!(joined.unwrap().unwrap(), CycleOutcome::Delivered { .. }));
        }

        assert_eq!(broker.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*broker.published.lock().unwrap(), bytes(&["A", "B", "C", "D"]));
        assert!(store.pending(ORDERS).is_empty());
    }

    #[tokio::test]
    async fn lock_contention_abandons_the_cycle() {
        let store = InMemoryOutboxStore::with_lock_timeout(Duration::from_millis(50));
        store.provision([ORDERS]);
        enqueue_committed(&store, &["A"]).await;
        let broker = Arc::new(StubBroker::default());
        let dispatcher = dispatcher(store.clone(), broker.clone(), DispatcherSettings::default());

        let mut other_replica = store.begin().await.unwrap();
        other_replica.acquire_for_update(ORDERS).await.unwrap();

        let err = dispatcher.run_cycle(ORDERS).await.unwrap_err();
        assert!(err.is_contention());
        assert!(broker.published_payloads().is_empty());

        other_replica.commit().await.unwrap();
        assert!(matches!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn tick_stops_at_batch_size() {
        let store = store();
        enqueue_committed(&store, &["A", "B", "C", "D", "E"]).await;
        let settings = DispatcherSettings {
            batch_size: 3,
            ..DispatcherSettings::default()
        };
        let dispatcher = dispatcher(store.clone(), StubBroker::default(), settings);

        let summary = dispatcher.run_tick(ORDERS).await.unwrap();
        assert_eq!(summary, TickSummary { delivered: 3, dead_lettered: 0 });
        assert_eq!(store.pending_payloads(ORDERS), bytes(&["D", "E"]));

        let summary = dispatcher.run_tick(ORDERS).await.unwrap();
        assert_eq!(summary.delivered, 2);
        assert!(store.pending(ORDERS).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_failures_and_stops_on_shutdown() {
        let store = store();
        enqueue_committed(&store, &["A"]).await;
        let broker = Arc::new(StubBroker::failing());
        let settings = DispatcherSettings {
            poll_interval: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
            ..DispatcherSettings::default()
        };
        let dispatcher = Arc::new(dispatcher(store.clone(), broker.clone(), settings));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(Arc::clone(&dispatcher).run(shutdown_rx));

        time::sleep(Duration::from_secs(1)).await;
        assert!(broker.published_payloads().is_empty());
        assert!(store.pending(ORDERS)[0].attempts >= 2);

        broker.set_failing(false);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(broker.published_payloads(), bytes(&["A"]));
        assert!(store.pending(ORDERS).is_empty());

        shutdown_tx.send(true).unwrap();
        time::timeout(Duration::from_secs(1), running)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }

    async fn pg_store(pool: &sqlx::PgPool) -> PgOutboxStore {
        pool.execute(include_str!("../schema.sql")).await.expect("Failed to create schema");
        let mut conn = pool.acquire().await.unwrap();
        provision_lock_rows(&mut conn, &[ORDERS]).await.unwrap();
        PgOutboxStore::new(pool.clone(), Duration::from_secs(5))
    }

    async fn pg_pending(pool: &sqlx::PgPool) -> Vec<(Vec<u8>, i32)> {
        sqlx::query_as::<_, (Vec<u8>, i32)>(
            "SELECT payload, attempts FROM core.outbox_message WHERE business_type = $1 ORDER BY created_at, id",
        )
            .bind(ORDERS)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn postgres_store_delivers_in_order_and_keeps_the_failing_head(pool: sqlx::PgPool) {
        let store = pg_store(&pool).await;
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(ORDERS, &bytes(&["A", "B", "C"])).await.unwrap();
        tx.commit().await.unwrap();

        let broker = Arc::new(StubBroker::default());
        let dispatcher = Dispatcher::new(store, broker.clone(), topics(), DispatcherSettings::default());

        assert!(matches!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Delivered { .. }));
        assert_eq!(pg_pending(&pool).await, vec![(b"B".to_vec(), 0), (b"C".to_vec(), 0)]);

        assert!(matches!(dispatcher.run_cycle(ORDERS).await.unwrap(), CycleOutcome::Delivered { .. }));
        assert_eq!(pg_pending(&pool).await, vec![(b"C".to_vec(), 0)]);

        broker.set_failing(true);
        for expected_attempts in 1..=3 {
            let err = dispatcher.run_cycle(ORDERS).await.unwrap_err();
            assert!(matches!(err, OutboxError::Publish { attempts, .. } if attempts == expected_attempts));
            assert_eq!(pg_pending(&pool).await, vec![(b"C".to_vec(), expected_attempts)]);
        }
        assert_eq!(broker.published_payloads(), bytes(&["A", "B"]));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn postgres_replicas_never_publish_the_same_type_at_once(pool: sqlx::PgPool) {
        let store = pg_store(&pool).await;
        let mut tx = store.begin().await.unwrap();
        tx.enqueue(ORDERS, &bytes(&["A", "B", "C", "D"])).await.unwrap();
        tx.commit().await.unwrap();

        let broker = Arc::new(SlowBroker::default());
        let replica_a = Arc::new(Dispatcher::new(store.clone(), broker.clone(), topics(), DispatcherSettings::default()));
        let replica_b = Arc::new(Dispatcher::new(store, broker.clone(), topics(), DispatcherSettings::default()));

        let mut cycles = JoinSet::new();
        for replica in [&replica_a, &replica_b, &replica_a, &replica_b] {
            let replica = Arc::clone(replica);
            cycles.spawn(async move { replica.run_cycle(ORDERS).await });
        }
        while let Some(joined) = cycles.join_next().await {
            assert!(matches!(joined.unwrap().unwrap(), CycleOutcome::Delivered { .. }));
        }

        assert_eq!(broker.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*broker.published.lock().unwrap(), bytes(&["A", "B", "C", "D"]));
        assert!(pg_pending(&pool).await.is_empty());
    }
}
