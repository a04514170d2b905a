use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::OsRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::monte_carlo::simulate_until;
use super::types::{MonteCarloResult, PlanConfiguration};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredResult {
    pub request_id: u64,
    pub result: MonteCarloResult,
}

/// Runs Monte Carlo requests in the background. Only the most recently
/// dispatched request may publish; older ones are skipped after the
/// debounce window or cancelled between trials.
#[derive(Clone)]
pub struct MonteCarloDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    generation: AtomicU64,
    debounce: Duration,
    results: watch::Sender<Option<DeliveredResult>>,
}

impl Inner {
    fn is_current(&self, request_id: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == request_id
    }
}

impl Default for MonteCarloDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl MonteCarloDispatcher {
    pub fn new(debounce: Duration) -> Self {
        let (results, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                generation: AtomicU64::new(0),
                debounce,
                results,
            }),
        }
    }

    /// Supersedes any earlier request and schedules this one. Must be called
    /// from within a tokio runtime.
    pub fn dispatch(&self, plan: PlanConfiguration, trials: u32, seed: Option<u64>) -> u64 {
        let request_id = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if !inner.is_current(request_id) {
                debug!(request_id, "monte carlo request superseded during debounce");
                return;
            }

            let worker = Arc::clone(&inner);
            let outcome = tokio::task::spawn_blocking(move || {
                let mut rng = match seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                    None => ChaCha8Rng::from_rng(OsRng)
                        .unwrap_or_else(|_| ChaCha8Rng::seed_from_u64(request_id)),
                };
                simulate_until(&plan, trials, &mut rng, || !worker.is_current(request_id))
            })
            .await;

            match outcome {
                Ok(Some(result)) => {
                    let published = inner.results.send_if_modified(|slot| {
                        if !inner.is_current(request_id) {
                            return false;
                        }
                        *slot = Some(DeliveredResult { request_id, result });
                        true
                    });
                    if published {
                        info!(
                            request_id,
                            success_rate = result.success_rate,
                            "monte carlo result delivered"
                        );
                    } else {
                        debug!(request_id, "discarded stale monte carlo result");
                    }
                }
                Ok(None) => debug!(request_id, "monte carlo request cancelled"),
                Err(err) => warn!(request_id, error = %err, "monte carlo worker failed"),
            }
        });

        request_id
    }

    pub fn current_request(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> Option<DeliveredResult> {
        *self.inner.results.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DeliveredResult>> {
        self.inner.results.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn small_plan() -> PlanConfiguration {
        PlanConfiguration {
            current_age: 40,
            target_retirement_age: 55,
            life_expectancy: 80,
            equity_balance: 5_000_000.0,
            stable_balance: 1_000_000.0,
            retirement_annual_expenses: 300_000.0,
            equity_return: 0.10,
            stable_return: 0.06,
            inflation_rate: 0.04,
            safe_withdrawal_rate: 0.04,
            ..PlanConfiguration::default()
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<Option<DeliveredResult>>,
        request_id: u64,
    ) -> DeliveredResult {
        timeout(Duration::from_secs(30), async {
            loop {
                if let Some(delivered) = *rx.borrow_and_update() {
                    if delivered.request_id == request_id {
                        return delivered;
                    }
                }
                rx.changed().await.expect("dispatcher dropped");
            }
        })
        .await
        .expect("result should be delivered")
    }

    #[tokio::test]
    async fn request_ids_increase_with_each_dispatch() {
        let dispatcher = MonteCarloDispatcher::new(Duration::from_millis(5));
        let first = dispatcher.dispatch(small_plan(), 1, Some(1));
        let second = dispatcher.dispatch(small_plan(), 1, Some(1));
        assert_eq!(second, first + 1);
        assert_eq!(dispatcher.current_request(), second);
    }

    #[tokio::test]
    async fn last_dispatched_request_wins() {
        let dispatcher = MonteCarloDispatcher::new(Duration::from_millis(20));
        let mut rx = dispatcher.subscribe();

        let stale = dispatcher.dispatch(small_plan(), 8, Some(1));
        let fresh = dispatcher.dispatch(small_plan(), 4, Some(2));
        assert!(fresh > stale);

        let delivered = wait_for(&mut rx, fresh).await;
        assert_eq!(delivered.result.trials, 4);
        assert_eq!(dispatcher.latest(), Some(delivered));

        // The superseded request never publishes, even after its debounce.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(dispatcher.latest().map(|d| d.request_id), Some(fresh));
    }

    #[tokio::test]
    async fn running_request_is_replaced_by_newer_one() {
        let dispatcher = MonteCarloDispatcher::new(Duration::from_millis(1));
        let mut rx = dispatcher.subscribe();

        dispatcher.dispatch(small_plan(), 2_000, Some(3));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fresh = dispatcher.dispatch(small_plan(), 3, Some(4));

        let delivered = wait_for(&mut rx, fresh).await;
        assert_eq!(delivered.result.trials, 3);
        assert_eq!(dispatcher.latest().map(|d| d.request_id), Some(fresh));
    }
}
