mod dispatch;
mod engine;
mod monte_carlo;
mod rates;
mod solver;
mod types;

pub use dispatch::{DEFAULT_DEBOUNCE, DeliveredResult, MonteCarloDispatcher};
pub use engine::{MAX_PROJECTION_MONTHS, project, projection_months};
pub use monte_carlo::{
    DEFAULT_TRIALS, percentile, simulate, simulate_seeded, simulate_until, simulate_with_rng,
};
pub use rates::{RateModel, effective_annual_return, monthly_rate};
pub use solver::{solve_required_contribution, stepped_future_value};
pub use types::{
    CustomAsset, Liability, LifeEvent, LifeEventKind, MonteCarloResult, PlanConfiguration,
    ProjectionResult, Remediation, YearSnapshot,
};
