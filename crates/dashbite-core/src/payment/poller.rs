use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PaymentGateway, PaymentStatus};

/// Default delay before the second status check
const DEFAULT_INITIAL_INTERVAL_SECS: u64 = 3;

/// Ceiling for the delay between checks
const DEFAULT_MAX_INTERVAL_SECS: u64 = 15;

const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// With the defaults above this gives up after roughly ten minutes
const DEFAULT_MAX_ATTEMPTS: u32 = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Multiplier applied to the delay after every check (1.0 = fixed interval)
    pub backoff_factor: f64,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(DEFAULT_INITIAL_INTERVAL_SECS),
            max_interval: Duration::from_secs(DEFAULT_MAX_INTERVAL_SECS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollConfig {
    /// Check every `interval` until `total_timeout` has elapsed
    pub fn fixed(interval: Duration, total_timeout: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = total_timeout.as_millis().div_ceil(interval_ms).max(1);
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_factor: 1.0,
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        }
    }

    /// Delay to wait after the `attempt`-th check (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let delay = self.initial_interval.mul_f64(factor.min(1e6));
        delay.min(self.max_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    Failed,
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Poll until the payment settles or `max_attempts` checks have been made.
///
/// Gateway errors are logged and count as a check.
pub async fn poll_payment_status(
    gateway: &dyn PaymentGateway,
    order_id: &str,
    config: &PollConfig,
) -> PollOutcome {
    let attempts = config.max_attempts.max(1);

    for attempt in 1..=attempts {
        match gateway.check_status(order_id).await {
            Ok(PaymentStatus::Succeeded) => {
                info!(order_id, attempt, "Payment succeeded");
                return PollOutcome::Succeeded;
            }
            Ok(PaymentStatus::Failed) => {
                info!(order_id, attempt, "Payment failed");
                return PollOutcome::Failed;
            }
            Ok(status) => {
                debug!(order_id, attempt, status = status.as_str(), "Payment not settled yet");
            }
            Err(e) => {
                warn!(order_id, attempt, error = %e, "Payment status check failed");
            }
        }

        if attempt < attempts {
            tokio::time::sleep(config.delay_after(attempt)).await;
        }
    }

    warn!(order_id, attempts, "Gave up waiting for payment");
    PollOutcome::TimedOut { attempts }
}

pub struct PaymentPoller;

impl PaymentPoller {
    /// Poll in a background task. The task stops when the handle is dropped.
    pub fn spawn(
        gateway: Arc<dyn PaymentGateway>,
        order_id: impl Into<String>,
        config: PollConfig,
    ) -> PollHandle {
        let order_id = order_id.into();
        let task = tokio::spawn(async move {
            poll_payment_status(gateway.as_ref(), &order_id, &config).await
        });
        PollHandle {
            task,
            outcome: None,
        }
    }
}

/// Handle to a running payment poll.
pub struct PollHandle {
    task: JoinHandle<PollOutcome>,
    outcome: Option<PollOutcome>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some() || self.task.is_finished()
    }

    /// Wait for the poll to end. Returns `Cancelled` if it was cancelled.
    pub async fn wait(&mut self) -> PollOutcome {
        if let Some(ref outcome) = self.outcome {
            return outcome.clone();
        }

        let outcome = match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => PollOutcome::Cancelled,
            Err(e) => {
                warn!(error = %e, "Payment poll task panicked");
                PollOutcome::Cancelled
            }
        };
        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::api::ApiError;
    use crate::payment::{CheckoutSession, PaymentRequest};

    #[derive(Default)]
    struct ScriptedGateway {
        script: Mutex<VecDeque<Result<PaymentStatus, ApiError>>>,
        checks: AtomicUsize,
    }

    impl ScriptedGateway {
        fn with(script: Vec<Result<PaymentStatus, ApiError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                checks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn create_payment(&self, request: &PaymentRequest) -> Result<CheckoutSession, ApiError> {
            Ok(CheckoutSession {
                order_id: request.order_id.clone(),
                payment_url: "https://pay.example.com/p/1".to_string(),
            })
        }

        async fn check_status(&self, _order_id: &str) -> Result<PaymentStatus, ApiError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PaymentStatus::Pending))
        }
    }

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            backoff_factor: 2.0,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_terminal_status() {
        let gateway = ScriptedGateway::with(vec![
            Ok(PaymentStatus::Pending),
            Ok(PaymentStatus::Unknown("processing".into())),
            Ok(PaymentStatus::Succeeded),
            Ok(PaymentStatus::Failed),
        ]);

        let outcome = poll_payment_status(&gateway, "ord-1", &fast(10)).await;
        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(gateway.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gateway_errors_count_as_attempts() {
        let gateway = ScriptedGateway::with(vec![
            Err(ApiError::ServerError("busy".into())),
            Ok(PaymentStatus::Failed),
        ]);

        let outcome = poll_payment_status(&gateway, "ord-1", &fast(10)).await;
        assert_eq!(outcome, PollOutcome::Failed);
        assert_eq!(gateway.checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_times_out_after_max_attempts() {
        let gateway = ScriptedGateway::default();
        let outcome = poll_payment_status(&gateway, "ord-1", &fast(4)).await;
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 4 });
        assert_eq!(gateway.checks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_spawned_poll_reports_outcome() {
        let gateway = Arc::new(ScriptedGateway::with(vec![Ok(PaymentStatus::Succeeded)]));
        let mut handle = PaymentPoller::spawn(gateway, "ord-1", fast(3));
        assert_eq!(handle.wait().await, PollOutcome::Succeeded);
        assert!(handle.is_finished());
        // Waiting again returns the cached outcome
        assert_eq!(handle.wait().await, PollOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_cancelled_poll_stops_checking() {
        let gateway = Arc::new(ScriptedGateway::default());
        let config = PollConfig::fixed(Duration::from_secs(60), Duration::from_secs(600));
        let mut handle = PaymentPoller::spawn(gateway.clone(), "ord-1", config);

        tokio::task::yield_now().await;
        handle.cancel();
        assert_eq!(handle.wait().await, PollOutcome::Cancelled);

        let checks = gateway.checks.load(Ordering::SeqCst);
        assert!(checks <= 1);
    }

    #[test]
    fn test_fixed_config_matches_interval_and_timeout() {
        let config = PollConfig::fixed(Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.delay_after(1), Duration::from_secs(5));
        assert_eq!(config.delay_after(30), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = PollConfig::default();
        assert_eq!(config.delay_after(1), Duration::from_secs(3));
        assert_eq!(config.delay_after(2), Duration::from_millis(4500));
        assert_eq!(config.delay_after(20), Duration::from_secs(15));
    }
}
