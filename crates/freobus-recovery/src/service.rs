//! Error Recovery Service
//!
//! Exponential-backoff retry engine. Failures are reported with a category;
//! the category selects a [`RecoveryStrategy`] (how often and how patiently
//! to retry) and a [`RecoveryAction`] (what one retry does). Records stay
//! queryable until they recover or are cleared.

use crate::actions::{
    ConnectivityProbe, NetworkRecovery, OnlineFlag, RecoveryAction, SessionRecovery,
    WalletRecovery,
};
use crate::errors::RecoveryError;
use crate::record::{ErrorContext, ErrorRecord};
use freobus_core::{PhysicalClock, RecoveryConfig, RecoveryStrategy, SessionRevalidator, SystemClock};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Why recovery gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No strategy registered for the category
    NoStrategy,
    /// Every allowed attempt failed
    MaxRetriesExceeded,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoStrategy => f.write_str("No recovery strategy found"),
            FailureReason::MaxRetriesExceeded => f.write_str("Max retries exceeded"),
        }
    }
}

/// Progress notifications
#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    /// A failure was recorded
    ErrorOccurred(ErrorRecord),
    /// One attempt did not recover
    RecoveryAttemptFailed {
        /// Record after the attempt
        error: ErrorRecord,
        /// Attempts failed so far
        attempt: u32,
    },
    /// The record recovered and was removed
    RecoverySucceeded(ErrorRecord),
    /// Recovery gave up
    RecoveryFailed {
        /// Record at the time of giving up
        error: ErrorRecord,
        /// Why
        reason: FailureReason,
    },
}

/// Configures an [`ErrorRecoveryService`]
pub struct RecoveryServiceBuilder {
    config: RecoveryConfig,
    clock: Arc<dyn PhysicalClock>,
    revalidator: Option<Arc<dyn SessionRevalidator>>,
    probe: Arc<dyn ConnectivityProbe>,
    event_capacity: usize,
}

impl RecoveryServiceBuilder {
    /// Strategy overrides and network settle time
    pub fn config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used to stamp records
    pub fn clock(mut self, clock: Arc<dyn PhysicalClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables the built-in `session` action
    pub fn session_revalidator(mut self, revalidator: Arc<dyn SessionRevalidator>) -> Self {
        self.revalidator = Some(revalidator);
        self
    }

    /// Probe used by the built-in `network` action
    pub fn connectivity_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Size of the event buffer per subscriber
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Create the service
    pub fn build(self) -> ErrorRecoveryService {
        let mut actions: HashMap<String, Arc<dyn RecoveryAction>> = HashMap::new();
        if let Some(revalidator) = self.revalidator {
            actions.insert("session".into(), Arc::new(SessionRecovery::new(revalidator)));
        }
        actions.insert(
            "network".into(),
            Arc::new(NetworkRecovery::new(self.probe, self.config.network_settle())),
        );
        actions.insert("wallet".into(), Arc::new(WalletRecovery));

        let (events, _) = broadcast::channel(self.event_capacity.max(1));
        ErrorRecoveryService {
            errors: Mutex::new(BTreeMap::new()),
            strategies: Mutex::new(self.config.effective_strategies().into_iter().collect()),
            actions: Mutex::new(actions),
            clock: self.clock,
            events,
        }
    }
}

/// Records failures and retries them with backoff
pub struct ErrorRecoveryService {
    errors: Mutex<BTreeMap<String, ErrorRecord>>,
    strategies: Mutex<HashMap<String, RecoveryStrategy>>,
    actions: Mutex<HashMap<String, Arc<dyn RecoveryAction>>>,
    clock: Arc<dyn PhysicalClock>,
    events: broadcast::Sender<RecoveryEvent>,
}

impl ErrorRecoveryService {
    /// Builder with the built-in strategies and a system clock
    pub fn builder() -> RecoveryServiceBuilder {
        RecoveryServiceBuilder {
            config: RecoveryConfig::default(),
            clock: Arc::new(SystemClock),
            revalidator: None,
            probe: Arc::new(OnlineFlag::default()),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    fn emit(&self, event: RecoveryEvent) {
        let _ = self.events.send(event);
    }

    /// Record a failure and try to recover from it. Resolves once recovery
    /// succeeded or gave up.
    pub async fn handle_error(
        &self,
        error_type: &str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> bool {
        let timestamp = self.clock.now_ms();
        let record = {
            let mut errors = self.errors.lock();
            let base = format!("{error_type}_{timestamp}");
            let mut id = base.clone();
            let mut n = 0u32;
            while errors.contains_key(&id) {
                n += 1;
                id = format!("{base}_{n}");
            }
            let record = ErrorRecord {
                id: id.clone(),
                timestamp,
                error_type: error_type.to_string(),
                message: message.into(),
                context,
                retry_count: 0,
            };
            errors.insert(id, record.clone());
            record
        };
        warn!(error_id = %record.id, error_type, message = %record.message, "error recorded");
        let id = record.id.clone();
        self.emit(RecoveryEvent::ErrorOccurred(record));
        self.attempt_recovery(&id).await
    }

    /// Retry a recorded failure until it recovers or its strategy is
    /// exhausted. Unknown ids return false.
    pub async fn attempt_recovery(&self, error_id: &str) -> bool {
        let Some(mut record) = self.errors.lock().get(error_id).cloned() else {
            debug!(error_id, "no such error record");
            return false;
        };
        let strategy = self.strategies.lock().get(&record.error_type).copied();
        let Some(strategy) = strategy else {
            warn!(error_id, error_type = %record.error_type, "no recovery strategy");
            self.emit(RecoveryEvent::RecoveryFailed {
                error: record,
                reason: FailureReason::NoStrategy,
            });
            return false;
        };
        let action = self.actions.lock().get(&record.error_type).cloned();

        while record.retry_count < strategy.max_retries {
            let delay = strategy.delay_for_attempt(record.retry_count);
            debug!(error_id, attempt = record.retry_count + 1, ?delay, "waiting before recovery");
            tokio::time::sleep(delay).await;

            let outcome = match &action {
                Some(action) => action.recover(&record).await,
                None => Err(RecoveryError::NoAction {
                    error_type: record.error_type.clone(),
                }),
            };
            match outcome {
                Ok(true) => {
                    self.errors.lock().remove(error_id);
                    info!(error_id, attempts = record.retry_count + 1, "recovered");
                    self.emit(RecoveryEvent::RecoverySucceeded(record));
                    return true;
                }
                Ok(false) => debug!(error_id, "recovery attempt did not succeed"),
                Err(err) => debug!(error_id, error = %err, "recovery attempt failed"),
            }

            record.retry_count += 1;
            if let Some(stored) = self.errors.lock().get_mut(error_id) {
                stored.retry_count = record.retry_count;
            }
            self.emit(RecoveryEvent::RecoveryAttemptFailed {
                attempt: record.retry_count,
                error: record.clone(),
            });
        }

        error!(error_id, retries = record.retry_count, "recovery exhausted");
        self.emit(RecoveryEvent::RecoveryFailed {
            error: record,
            reason: FailureReason::MaxRetriesExceeded,
        });
        false
    }

    /// Register or override the strategy for `error_type`
    pub fn set_recovery_strategy(&self, error_type: impl Into<String>, strategy: RecoveryStrategy) {
        self.strategies.lock().insert(error_type.into(), strategy);
    }

    /// Register or override the action for `error_type`
    pub fn set_recovery_action(&self, error_type: impl Into<String>, action: Arc<dyn RecoveryAction>) {
        self.actions.lock().insert(error_type.into(), action);
    }

    /// Records that have not recovered, oldest first
    pub fn get_active_errors(&self) -> Vec<ErrorRecord> {
        let mut records: Vec<ErrorRecord> = self.errors.lock().values().cloned().collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Dismiss a record
    pub fn clear_error(&self, error_id: &str) {
        if self.errors.lock().remove(error_id).is_some() {
            debug!(error_id, "error cleared");
        }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for ErrorRecoveryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecoveryService")
            .field("active_errors", &self.errors.lock().len())
            .field("strategies", &self.strategies.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freobus_testkit::ManualClock;

    fn service() -> ErrorRecoveryService {
        ErrorRecoveryService::builder()
            .clock(Arc::new(ManualClock::new(1_000)))
            .build()
    }

    #[tokio::test]
    async fn unknown_category_fails_without_strategy() {
        let service = service();
        let mut events = service.subscribe();

        assert!(!service.handle_error("unknown", "boom", ErrorContext::default()).await);
        assert!(matches!(events.recv().await.unwrap(), RecoveryEvent::ErrorOccurred(_)));
        match events.recv().await.unwrap() {
            RecoveryEvent::RecoveryFailed { reason, error } => {
                assert_eq!(reason, FailureReason::NoStrategy);
                assert_eq!(reason.to_string(), "No recovery strategy found");
                assert_eq!(error.id, "unknown_1000");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(service.get_active_errors().len(), 1);
    }

    #[tokio::test]
    async fn ids_are_unique_within_one_millisecond() {
        let service = service();
        service.handle_error("custom", "a", ErrorContext::default()).await;
        service.handle_error("custom", "b", ErrorContext::default()).await;

        let ids: Vec<String> = service.get_active_errors().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["custom_1000".to_string(), "custom_1000_1".to_string()]);

        service.clear_error("custom_1000");
        assert_eq!(service.get_active_errors().len(), 1);
        assert!(!service.attempt_recovery("custom_1000").await);
    }

    #[tokio::test(start_paused = true)]
    async fn strategy_without_action_fails_each_attempt() {
        let service = service();
        service.set_recovery_strategy(
            "custom",
            RecoveryStrategy {
                max_retries: 2,
                backoff_multiplier: 1.0,
                initial_delay_ms: 10,
                max_delay_ms: 10,
            },
        );
        let mut events = service.subscribe();

        assert!(!service.handle_error("custom", "x", ErrorContext::default()).await);
        let mut attempts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RecoveryEvent::RecoveryAttemptFailed { attempt, .. } = event {
                attempts.push(attempt);
            }
        }
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(service.get_active_errors()[0].retry_count, 2);
    }
}
