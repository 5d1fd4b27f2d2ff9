//! Polling alert consumer
//!
//! A supervisory loop that, once per tick, checks the health probe, makes
//! sure a broker subscription exists, and drains the broker. Each message is
//! committed as soon as it is read; processing failures are logged and never
//! stop the stream. Health is checked again every [`HEALTH_RECHECK_BATCHES`]
//! batches while a backlog is being drained.

pub mod health;
pub mod nats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skyalert_common::config::{ConsumerCredentials, GcnConfig};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::GcnResult;

pub use health::{HealthCheck, HttpHealthProbe};
pub use nats::{JetStreamBroker, JetStreamConnector};

/// Batches drained between health checks within one poll cycle
pub const HEALTH_RECHECK_BATCHES: usize = 10;

/// Placeholder GCN Kafka emits when a partition has no data yet
pub const HEARTBEAT_PAYLOAD: &[u8] = b"Broker: No more messages";

/// True for the GCN Kafka placeholder payload
pub fn is_heartbeat(payload: &[u8]) -> bool {
    payload == HEARTBEAT_PAYLOAD
}

/// A message read from the broker
pub trait BrokerMessage: Send + Sync {
    fn topic(&self) -> &str;
    fn payload(&self) -> &[u8];

    /// Keep-alive traffic that carries no notice
    fn is_heartbeat(&self) -> bool {
        is_heartbeat(self.payload())
    }
}

/// A connected, subscribable alert broker
#[async_trait]
pub trait AlertBroker: Send + Sync {
    type Message: BrokerMessage;

    async fn subscribe(&mut self, topics: &[String]) -> GcnResult<()>;

    /// Read up to `max_messages`, waiting at most `timeout`; empty when drained
    async fn consume(&mut self, max_messages: usize, timeout: Duration) -> GcnResult<Vec<Self::Message>>;

    /// Mark a message as read so it is not redelivered
    async fn commit(&mut self, message: &Self::Message) -> GcnResult<()>;
}

/// Opens broker connections
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Broker: AlertBroker;

    async fn connect(&self, credentials: &ConsumerCredentials) -> GcnResult<Self::Broker>;
}

/// Application-level processing of one notice payload
#[async_trait]
pub trait NoticeHandler: Send + Sync {
    async fn handle(&self, payload: &[u8], topic: &str) -> GcnResult<()>;
}

/// Consumer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsumerState {
    Idle,
    HealthChecking,
    Polling,
    ProcessingMessage,
    /// Configuration was rejected; the consumer never runs again
    Disabled,
}

/// Consumer counters reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStatus {
    pub state: ConsumerState,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub heartbeats_skipped: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ConsumerStatus {
    fn default() -> Self {
        Self {
            state: ConsumerState::Idle,
            messages_processed: 0,
            messages_failed: 0,
            heartbeats_skipped: 0,
            last_poll: None,
            last_error: None,
        }
    }
}

pub type SharedConsumerStatus = Arc<RwLock<ConsumerStatus>>;

/// Message counts for one drained cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub received: usize,
    pub processed: usize,
    pub failed: usize,
    pub heartbeats: usize,
}

/// How a poll cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Health probe failed before anything was consumed
    Unhealthy,
    /// Health probe failed partway through a backlog; the rest waits
    Interrupted(CycleStats),
    /// Connecting or subscribing failed; retried next tick
    Abandoned,
    Drained(CycleStats),
}

/// Drives a broker through health-gated poll cycles
pub struct ConsumerService<C: BrokerConnector> {
    connector: C,
    health: Arc<dyn HealthCheck>,
    handler: Arc<dyn NoticeHandler>,
    status: SharedConsumerStatus,
    broker: Option<C::Broker>,
}

impl<C: BrokerConnector> ConsumerService<C> {
    pub fn new(
        connector: C,
        health: Arc<dyn HealthCheck>,
        handler: Arc<dyn NoticeHandler>,
        status: SharedConsumerStatus,
    ) -> Self {
        Self {
            connector,
            health,
            handler,
            status,
            broker: None,
        }
    }

    pub fn status(&self) -> SharedConsumerStatus {
        Arc::clone(&self.status)
    }

    /// Run until the process exits
    ///
    /// Returns immediately, with the consumer marked disabled, when the
    /// configuration lacks credentials or topics.
    pub async fn run(mut self, config: GcnConfig) {
        let credentials = match config.validate() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "Alert consumer disabled");
                let mut status = self.status.write().await;
                status.state = ConsumerState::Disabled;
                status.last_error = Some(e.to_string());
                return;
            }
        };

        info!(
            broker = %config.broker_url,
            topics = ?credentials.topics,
            "Alert consumer started"
        );

        let interval = Duration::from_secs(config.poll_interval_secs);
        loop {
            match self.poll_cycle(&credentials, &config).await {
                CycleOutcome::Drained(stats) if stats.received > 0 => {
                    info!(
                        received = stats.received,
                        processed = stats.processed,
                        failed = stats.failed,
                        "Poll cycle complete"
                    );
                }
                outcome => debug!(?outcome, "Poll cycle complete"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One supervisory tick: health gate, connect, drain
    pub async fn poll_cycle(&mut self, credentials: &ConsumerCredentials, config: &GcnConfig) -> CycleOutcome {
        self.set_state(ConsumerState::HealthChecking).await;
        if !self.health.is_healthy().await {
            debug!("Health probe failed; skipping poll cycle");
            self.set_state(ConsumerState::Idle).await;
            return CycleOutcome::Unhealthy;
        }

        let mut broker = match self.broker.take() {
            Some(broker) => broker,
            None => match self.open_broker(credentials).await {
                Some(broker) => broker,
                None => {
                    self.set_state(ConsumerState::Idle).await;
                    return CycleOutcome::Abandoned;
                }
            },
        };

        self.status.write().await.last_poll = Some(Utc::now());

        let timeout = Duration::from_secs(config.consume_timeout_secs);
        let mut stats = CycleStats::default();
        let mut healthy = true;
        let mut batches = 0usize;

        loop {
            if batches > 0 && batches % HEALTH_RECHECK_BATCHES == 0 {
                self.set_state(ConsumerState::HealthChecking).await;
                if !self.health.is_healthy().await {
                    warn!(batches, "Health probe failed mid-drain; pausing consumption");
                    self.broker = Some(broker);
                    self.set_state(ConsumerState::Idle).await;
                    return CycleOutcome::Interrupted(stats);
                }
            }

            self.set_state(ConsumerState::Polling).await;
            let batch = match broker.consume(config.max_messages, timeout).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Consume failed; reconnecting next cycle");
                    self.status.write().await.last_error = Some(e.to_string());
                    healthy = false;
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            batches += 1;

            for message in batch {
                stats.received += 1;
                if let Err(e) = broker.commit(&message).await {
                    warn!(topic = %message.topic(), error = %e, "Commit failed");
                }

                if message.is_heartbeat() {
                    debug!(topic = %message.topic(), "Skipping broker heartbeat");
                    stats.heartbeats += 1;
                    self.status.write().await.heartbeats_skipped += 1;
                    continue;
                }

                self.set_state(ConsumerState::ProcessingMessage).await;
                match self.handler.handle(message.payload(), message.topic()).await {
                    Ok(()) => {
                        stats.processed += 1;
                        self.status.write().await.messages_processed += 1;
                    }
                    Err(e) => {
                        error!(topic = %message.topic(), error = %e, "Failed to process notice");
                        stats.failed += 1;
                        let mut status = self.status.write().await;
                        status.messages_failed += 1;
                        status.last_error = Some(format!("{}: {}", message.topic(), e));
                    }
                }
            }
        }

        if healthy {
            self.broker = Some(broker);
        }
        self.set_state(ConsumerState::Idle).await;
        CycleOutcome::Drained(stats)
    }

    async fn open_broker(&self, credentials: &ConsumerCredentials) -> Option<C::Broker> {
        let mut broker = match self.connector.connect(credentials).await {
            Ok(broker) => broker,
            Err(e) => {
                error!(error = %e, "Broker connection failed");
                self.status.write().await.last_error = Some(e.to_string());
                return None;
            }
        };

        if let Err(e) = broker.subscribe(&credentials.topics).await {
            error!(topics = ?credentials.topics, error = %e, "Subscription failed");
            self.status.write().await.last_error = Some(e.to_string());
            return None;
        }

        info!(topics = ?credentials.topics, "Subscribed to alert topics");
        Some(broker)
    }

    async fn set_state(&self, state: ConsumerState) {
        self.status.write().await.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GcnError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct FakeMessage {
        topic: String,
        payload: Vec<u8>,
    }

    impl BrokerMessage for FakeMessage {
        fn topic(&self) -> &str {
            &self.topic
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }
    }

    fn message(payload: &[u8]) -> FakeMessage {
        FakeMessage {
            topic: "gcn.classic.voevent.LVC_PRELIMINARY".to_string(),
            payload: payload.to_vec(),
        }
    }

    #[derive(Default)]
    struct Journal {
        connects: AtomicUsize,
        committed: Mutex<Vec<Vec<u8>>>,
    }

    struct FakeBroker {
        batches: VecDeque<Vec<FakeMessage>>,
        journal: Arc<Journal>,
        fail_subscribe: bool,
    }

    #[async_trait]
    impl AlertBroker for FakeBroker {
        type Message = FakeMessage;

        async fn subscribe(&mut self, _topics: &[String]) -> GcnResult<()> {
            if self.fail_subscribe {
                return Err(GcnError::Subscription("no such topic".to_string()));
            }
            Ok(())
        }

        async fn consume(&mut self, _max: usize, _timeout: Duration) -> GcnResult<Vec<FakeMessage>> {
            Ok(self.batches.pop_front().unwrap_or_default())
        }

        async fn commit(&mut self, message: &FakeMessage) -> GcnResult<()> {
            self.journal.committed.lock().unwrap().push(message.payload.clone());
            Ok(())
        }
    }

    struct FakeConnector {
        batches: Mutex<Option<Vec<Vec<FakeMessage>>>>,
        journal: Arc<Journal>,
        fail_connect: bool,
        fail_subscribe: bool,
    }

    impl FakeConnector {
        fn new(batches: Vec<Vec<FakeMessage>>) -> Self {
            Self {
                batches: Mutex::new(Some(batches)),
                journal: Arc::new(Journal::default()),
                fail_connect: false,
                fail_subscribe: false,
            }
        }
    }

    #[async_trait]
    impl BrokerConnector for FakeConnector {
        type Broker = FakeBroker;

        async fn connect(&self, _credentials: &ConsumerCredentials) -> GcnResult<FakeBroker> {
            self.journal.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(GcnError::BrokerConnect("connection refused".to_string()));
            }
            let batches = self.batches.lock().unwrap().take().unwrap_or_default();
            Ok(FakeBroker {
                batches: batches.into(),
                journal: Arc::clone(&self.journal),
                fail_subscribe: self.fail_subscribe,
            })
        }
    }

    struct FixedHealth(AtomicBool);

    #[async_trait]
    impl HealthCheck for FixedHealth {
        async fn is_healthy(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Healthy for a fixed number of checks, then unhealthy
    struct CountdownHealth(AtomicUsize);

    #[async_trait]
    impl HealthCheck for CountdownHealth {
        async fn is_healthy(&self) -> bool {
            self.0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        }
    }

    /// Fails any payload containing "poison"
    #[derive(Default)]
    struct RecordingHandler {
        handled: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl NoticeHandler for RecordingHandler {
        async fn handle(&self, payload: &[u8], _topic: &str) -> GcnResult<()> {
            if payload.windows(6).any(|w| w == b"poison") {
                return Err(GcnError::SkymapFetch("HTTP 500".to_string()));
            }
            self.handled.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    fn credentials() -> ConsumerCredentials {
        ConsumerCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            topics: vec!["gcn.classic.voevent.LVC_PRELIMINARY".to_string()],
        }
    }

    fn service(
        connector: FakeConnector,
        healthy: bool,
    ) -> (ConsumerService<FakeConnector>, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let service = ConsumerService::new(
            connector,
            Arc::new(FixedHealth(AtomicBool::new(healthy))),
            handler.clone(),
            SharedConsumerStatus::default(),
        );
        (service, handler)
    }

    #[test]
    fn test_is_heartbeat() {
        assert!(is_heartbeat(b"Broker: No more messages"));
        assert!(!is_heartbeat(b"<voe:VOEvent/>"));
        assert!(!is_heartbeat(b""));
    }

    #[tokio::test]
    async fn test_failing_message_does_not_stop_batch() {
        let connector = FakeConnector::new(vec![vec![message(b"one"), message(b"poison"), message(b"three")]]);
        let journal = Arc::clone(&connector.journal);
        let (mut service, handler) = service(connector, true);

        let outcome = service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Drained(CycleStats {
                received: 3,
                processed: 2,
                failed: 1,
                heartbeats: 0
            })
        );
        assert_eq!(*handler.handled.lock().unwrap(), vec![b"one".to_vec(), b"three".to_vec()]);
        assert_eq!(journal.committed.lock().unwrap().len(), 3);

        let status = service.status();
        let status = status.read().await;
        assert_eq!(status.messages_processed, 2);
        assert_eq!(status.messages_failed, 1);
        assert_eq!(status.state, ConsumerState::Idle);
        assert!(status.last_error.as_deref().unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_heartbeat_committed_but_not_handled() {
        let connector = FakeConnector::new(vec![vec![message(HEARTBEAT_PAYLOAD)], vec![message(b"notice")]]);
        let journal = Arc::clone(&connector.journal);
        let (mut service, handler) = service(connector, true);

        let outcome = service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        match outcome {
            CycleOutcome::Drained(stats) => {
                assert_eq!(stats.received, 2);
                assert_eq!(stats.heartbeats, 1);
                assert_eq!(stats.processed, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(*handler.handled.lock().unwrap(), vec![b"notice".to_vec()]);
        assert_eq!(journal.committed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_skips_cycle() {
        let connector = FakeConnector::new(vec![vec![message(b"one")]]);
        let journal = Arc::clone(&connector.journal);
        let (mut service, handler) = service(connector, false);

        let outcome = service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        assert_eq!(outcome, CycleOutcome::Unhealthy);
        assert_eq!(journal.connects.load(Ordering::SeqCst), 0);
        assert!(handler.handled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_abandons_tick_and_retries() {
        let mut connector = FakeConnector::new(Vec::new());
        connector.fail_connect = true;
        let journal = Arc::clone(&connector.journal);
        let (mut service, _handler) = service(connector, true);

        assert_eq!(
            service.poll_cycle(&credentials(), &GcnConfig::default()).await,
            CycleOutcome::Abandoned
        );
        assert_eq!(
            service.poll_cycle(&credentials(), &GcnConfig::default()).await,
            CycleOutcome::Abandoned
        );
        assert_eq!(journal.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscribe_failure_abandons_tick() {
        let mut connector = FakeConnector::new(vec![vec![message(b"one")]]);
        connector.fail_subscribe = true;
        let (mut service, handler) = service(connector, true);

        let outcome = service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        assert_eq!(outcome, CycleOutcome::Abandoned);
        assert!(handler.handled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broker_reused_across_cycles() {
        let connector = FakeConnector::new(vec![vec![message(b"one")]]);
        let journal = Arc::clone(&connector.journal);
        let (mut service, _handler) = service(connector, true);

        service.poll_cycle(&credentials(), &GcnConfig::default()).await;
        service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        assert_eq!(journal.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backlog_drain_rechecks_health() {
        let backlog = (0..HEALTH_RECHECK_BATCHES + 2)
            .map(|i| vec![message(format!("notice {}", i).as_bytes())])
            .collect();
        let connector = FakeConnector::new(backlog);
        let journal = Arc::clone(&connector.journal);
        let handler = Arc::new(RecordingHandler::default());
        let health = Arc::new(CountdownHealth(AtomicUsize::new(1)));
        let mut service = ConsumerService::new(
            connector,
            health.clone(),
            handler.clone(),
            SharedConsumerStatus::default(),
        );

        let outcome = service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        match outcome {
            CycleOutcome::Interrupted(stats) => assert_eq!(stats.processed, HEALTH_RECHECK_BATCHES),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(handler.handled.lock().unwrap().len(), HEALTH_RECHECK_BATCHES);

        // The rest of the backlog resumes on the same subscription
        health.0.store(usize::MAX, Ordering::SeqCst);
        let outcome = service.poll_cycle(&credentials(), &GcnConfig::default()).await;

        match outcome {
            CycleOutcome::Drained(stats) => assert_eq!(stats.processed, 2),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(journal.connects.load(Ordering::SeqCst), 1);
        assert_eq!(service.status().read().await.state, ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_run_disables_without_credentials() {
        let (service, _handler) = service(FakeConnector::new(Vec::new()), true);
        let status = service.status();

        service.run(GcnConfig::default()).await;

        let status = status.read().await;
        assert_eq!(status.state, ConsumerState::Disabled);
        assert!(status.last_error.is_some());
    }
}
