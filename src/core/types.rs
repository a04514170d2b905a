use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifeEventKind {
    #[default]
    #[serde(alias = "oneTime", alias = "one_time", alias = "once")]
    OneTime,
    Recurring,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifeEvent {
    pub name: String,
    pub age: f64,
    /// Cost in today's money; annual for recurring events.
    pub cost: f64,
    #[serde(alias = "type")]
    pub kind: LifeEventKind,
    /// Last age a recurring event is paid. Values at or below `age` mean
    /// "until life expectancy".
    pub end_age: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Liability {
    pub name: String,
    pub monthly_installment: f64,
    pub outstanding_balance: f64,
    pub payoff_age: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomAsset {
    pub name: String,
    pub value: f64,
    pub annual_return: f64,
    pub tax_rate: f64,
}

/// A single plan. Rates are fractions (0.12 is 12%); money is in nominal
/// units of today's currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanConfiguration {
    pub current_age: u32,
    pub target_retirement_age: u32,
    pub life_expectancy: u32,

    pub equity_balance: f64,
    pub stable_balance: f64,
    pub custom_assets: Vec<CustomAsset>,
    pub emergency_fund: f64,

    pub monthly_contribution_equity: f64,
    pub monthly_contribution_stable: f64,
    pub contribution_step_up: f64,

    pub annual_income: f64,
    pub salary_growth: f64,
    pub current_annual_expenses: f64,
    pub retirement_annual_expenses: f64,

    pub equity_return: f64,
    pub stable_return: f64,
    pub equity_tax_rate: f64,
    pub stable_tax_rate: f64,
    pub inflation_rate: f64,
    pub safe_withdrawal_rate: f64,

    pub liabilities: Vec<Liability>,
    pub life_events: Vec<LifeEvent>,

    pub stress_test: bool,
    pub tax_harvesting: bool,
}

pub const MAX_RETIREMENT_AGE: u32 = 100;
pub const MIN_SAFE_WITHDRAWAL_RATE: f64 = 0.001;

impl PlanConfiguration {
    pub fn effective_retirement_age(&self) -> u32 {
        self.target_retirement_age
            .max(self.current_age.saturating_add(1))
            .min(MAX_RETIREMENT_AGE)
    }

    pub fn safe_withdrawal_rate_floored(&self) -> f64 {
        self.safe_withdrawal_rate.max(MIN_SAFE_WITHDRAWAL_RATE)
    }

    pub fn months_to_retirement(&self) -> u32 {
        self.effective_retirement_age().saturating_sub(self.current_age) * 12
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSnapshot {
    pub age: u32,
    pub balance: f64,
    pub real_balance: f64,
    pub equity: f64,
    pub stable: f64,
    pub custom: f64,
    pub emergency: f64,
    pub real_emergency: f64,
    pub target: Option<f64>,
    pub real_target: Option<f64>,
    pub withdrawal: f64,
    pub real_withdrawal: f64,
    pub contribution: f64,
    pub event: f64,
    pub debt: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remediation {
    pub save_more: f64,
    /// Extra working years; `None` when no later snapshot reaches the target.
    pub work_longer: Option<u32>,
    pub spend_less: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub projection: Vec<YearSnapshot>,
    pub gap: f64,
    pub real_gap: f64,
    pub corpus_at_retirement: f64,
    pub target_at_retirement: f64,
    pub fire_age: Option<f64>,
    pub bankruptcy_age: Option<f64>,
    pub remediation: Remediation,
    pub emergency_coverage_at_retirement: f64,
    pub step_up_exceeds_salary_growth: bool,
    pub contributions_capped: bool,
    pub harvesting_bonus_wealth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    /// Percentage of trials, 0 to 100.
    pub success_rate: f64,
    pub median_final_corpus: f64,
    pub worst_case_final_corpus: f64,
    pub trials: u32,
}
