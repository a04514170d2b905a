use std::f64::consts::PI;

use rand::rngs::OsRng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::engine::project;
use super::types::{MonteCarloResult, PlanConfiguration};

pub const DEFAULT_TRIALS: u32 = 10_000;
pub const EQUITY_RETURN_VOL: f64 = 0.15;
pub const STABLE_RETURN_VOL: f64 = 0.04;
pub const CUSTOM_RETURN_VOL: f64 = 0.10;
pub const MEDIAN_PERCENTILE: f64 = 50.0;
pub const WORST_CASE_PERCENTILE: f64 = 10.0;

/// Runs `trials` randomized projections seeded from OS entropy.
pub fn simulate(plan: &PlanConfiguration, trials: u32) -> MonteCarloResult {
    let mut rng = ChaCha8Rng::from_rng(OsRng).unwrap_or_else(|_| ChaCha8Rng::seed_from_u64(0));
    simulate_with_rng(plan, trials, &mut rng)
}

pub fn simulate_with_rng<R: Rng>(
    plan: &PlanConfiguration,
    trials: u32,
    rng: &mut R,
) -> MonteCarloResult {
    match simulate_until(plan, trials, rng, || false) {
        Some(result) => result,
        None => MonteCarloResult::empty(),
    }
}

/// Like [`simulate_with_rng`], but checks `is_cancelled` before every trial
/// and gives up with `None` as soon as it returns true.
pub fn simulate_until<R, F>(
    plan: &PlanConfiguration,
    trials: u32,
    rng: &mut R,
    mut is_cancelled: F,
) -> Option<MonteCarloResult>
where
    R: Rng,
    F: FnMut() -> bool,
{
    if trials == 0 {
        return Some(MonteCarloResult::empty());
    }

    let mut successes = 0u32;
    let mut final_corpus = Vec::with_capacity(trials as usize);
    for _ in 0..trials {
        if is_cancelled() {
            debug!(completed = final_corpus.len(), trials, "monte carlo cancelled");
            return None;
        }

        let trial_plan = sample_trial_plan(plan, rng);
        let result = project(&trial_plan);
        if result.bankruptcy_age.is_none() {
            successes += 1;
        }
        final_corpus.push(result.projection.last().map_or(0.0, |s| s.balance));
    }

    let success_rate = successes as f64 / trials as f64 * 100.0;
    let median_final_corpus = percentile(&mut final_corpus, MEDIAN_PERCENTILE);
    let worst_case_final_corpus = percentile(&mut final_corpus, WORST_CASE_PERCENTILE);
    debug!(trials, success_rate, median_final_corpus, "monte carlo complete");

    Some(MonteCarloResult {
        success_rate,
        median_final_corpus,
        worst_case_final_corpus,
        trials,
    })
}

/// Seeded convenience wrapper used by the CLI and HTTP layers.
pub fn simulate_seeded(plan: &PlanConfiguration, trials: u32, seed: u64) -> MonteCarloResult {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    simulate_with_rng(plan, trials, &mut rng)
}

impl MonteCarloResult {
    pub fn empty() -> Self {
        Self {
            success_rate: 0.0,
            median_final_corpus: 0.0,
            worst_case_final_corpus: 0.0,
            trials: 0,
        }
    }
}

fn sample_trial_plan<R: Rng>(plan: &PlanConfiguration, rng: &mut R) -> PlanConfiguration {
    let mut trial = plan.clone();
    trial.equity_return = plan.equity_return + EQUITY_RETURN_VOL * standard_normal(rng);
    trial.stable_return = plan.stable_return + STABLE_RETURN_VOL * standard_normal(rng);
    for asset in &mut trial.custom_assets {
        asset.annual_return += CUSTOM_RETURN_VOL * standard_normal(rng);
    }
    trial
}

/// Box-Muller over two uniforms; `u1` is kept in (0, 1] so the log is finite.
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen_range(0.0..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let r = (-2.0 * f64::ln(u1)).sqrt();
    r * (2.0 * PI * u2).cos()
}

/// Nearest-rank percentile: the sorted value at `floor(p / 100 * n)`,
/// clamped to the last element.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let rank = ((p / 100.0).clamp(0.0, 1.0) * n as f64).floor() as usize;
    values[rank.min(n - 1)]
}
