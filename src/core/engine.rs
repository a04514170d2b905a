use tracing::debug;

use super::rates::RateModel;
use super::solver::solve_required_contribution;
use super::types::{
    LifeEvent, LifeEventKind, PlanConfiguration, ProjectionResult, Remediation, YearSnapshot,
};

/// Hard cap on simulated months (100 years).
pub const MAX_PROJECTION_MONTHS: u32 = 1200;
/// One-time events fire when the simulated age is this close to their age.
pub const EVENT_TRIGGER_WINDOW_YEARS: f64 = 0.05;
pub const STRESS_WINDOW_MONTHS: u32 = 24;
/// Annual gains that can be booked tax-free by the harvesting overlay.
pub const HARVEST_ANNUAL_EXEMPTION: f64 = 125_000.0;
const DEFAULT_EQUITY_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, Copy)]
struct LiabilityState {
    installment: f64,
    remaining: Option<f64>,
    payoff_age: f64,
}

impl LiabilityState {
    fn pay(&mut self, age_at_month_start: f64) -> f64 {
        if self.installment <= 0.0 || age_at_month_start >= self.payoff_age {
            return 0.0;
        }
        match self.remaining.as_mut() {
            None => self.installment,
            Some(remaining) => {
                let paid = self.installment.min(*remaining).max(0.0);
                *remaining -= paid;
                paid
            }
        }
    }
}

/// Everything that changes month to month. Owned by a single run.
#[derive(Debug, Clone)]
struct SimulationState {
    equity: f64,
    stable: f64,
    custom: Vec<f64>,
    emergency: f64,
    contribution_equity: f64,
    contribution_stable: f64,
    monthly_income: f64,
    liabilities: Vec<LiabilityState>,
    fired_events: Vec<bool>,
    withdrawn_since_snapshot: f64,
    contributed_since_snapshot: f64,
    harvest_gains_this_year: f64,
    harvest_bonus: f64,
}

impl SimulationState {
    fn new(plan: &PlanConfiguration) -> Self {
        Self {
            equity: plan.equity_balance,
            stable: plan.stable_balance,
            custom: plan.custom_assets.iter().map(|a| a.value).collect(),
            emergency: plan.emergency_fund,
            contribution_equity: plan.monthly_contribution_equity,
            contribution_stable: plan.monthly_contribution_stable,
            monthly_income: plan.annual_income / 12.0,
            liabilities: plan
                .liabilities
                .iter()
                .map(|l| LiabilityState {
                    installment: l.monthly_installment,
                    remaining: (l.outstanding_balance > 0.0).then_some(l.outstanding_balance),
                    // No payoff age means the loan runs for the whole horizon.
                    payoff_age: if l.payoff_age > 0.0 {
                        l.payoff_age
                    } else {
                        plan.life_expectancy as f64
                    },
                })
                .collect(),
            fired_events: vec![false; plan.life_events.len()],
            withdrawn_since_snapshot: 0.0,
            contributed_since_snapshot: 0.0,
            harvest_gains_this_year: 0.0,
            harvest_bonus: 0.0,
        }
    }

    fn liquid(&self) -> f64 {
        self.equity + self.stable
    }

    fn custom_total(&self) -> f64 {
        self.custom.iter().sum()
    }

    fn outstanding_debt(&self) -> f64 {
        self.liabilities.iter().filter_map(|l| l.remaining).sum()
    }

    /// Takes `amount` from equity and stable in proportion to their
    /// positive balances. Any part the liquid balance cannot cover is
    /// booked against equity. Returns true when that happened.
    fn withdraw_pro_rata(&mut self, amount: f64) -> bool {
        if amount <= 0.0 {
            return false;
        }

        let equity_part = self.equity.max(0.0);
        let stable_part = self.stable.max(0.0);
        let capacity = equity_part + stable_part;
        if capacity <= 0.0 || self.liquid() <= 0.0 {
            self.equity -= amount;
            return true;
        }

        let covered = amount.min(self.liquid());
        let equity_share = equity_part / capacity;
        self.equity -= covered * equity_share;
        self.stable -= covered * (1.0 - equity_share);

        let excess = amount - covered;
        if excess > 0.0 {
            self.equity -= excess;
            return true;
        }
        false
    }
}

/// Run-wide constants derived once from the plan.
struct EngineContext<'a> {
    plan: &'a PlanConfiguration,
    rates: RateModel,
    months_to_retire: u32,
    swr: f64,
    emergency_multiple: f64,
}

impl<'a> EngineContext<'a> {
    fn new(plan: &'a PlanConfiguration) -> Self {
        let base_monthly_expense = (plan.current_annual_expenses / 12.0).max(1.0);
        Self {
            plan,
            rates: RateModel::from_plan(plan),
            months_to_retire: plan.months_to_retirement(),
            swr: plan.safe_withdrawal_rate_floored(),
            emergency_multiple: (plan.emergency_fund / base_monthly_expense).max(0.0),
        }
    }

    fn equity_rate_for_month(&self, month: u32) -> f64 {
        let in_crash_window = month > self.months_to_retire
            && month <= self.months_to_retire + STRESS_WINDOW_MONTHS;
        if self.plan.stress_test && in_crash_window {
            self.rates.stress_equity_monthly
        } else {
            self.rates.equity_monthly
        }
    }

    fn recurring_monthly_outflow(&self, age: f64, price_index: f64) -> f64 {
        self.plan
            .life_events
            .iter()
            .filter(|e| e.kind == LifeEventKind::Recurring)
            .filter(|e| age >= e.age && age <= recurring_end_age(e, self.plan.life_expectancy))
            .map(|e| e.cost * price_index / 12.0)
            .sum()
    }
}

fn recurring_end_age(event: &LifeEvent, life_expectancy: u32) -> f64 {
    match event.end_age {
        Some(end) if end > event.age => end,
        _ => life_expectancy as f64,
    }
}

/// What one simulated month produced, beyond the state mutation.
#[derive(Debug, Clone, Copy)]
struct MonthOutcome {
    retired: bool,
    age: f64,
    price_index: f64,
    total_wealth: f64,
    target_corpus: f64,
    retirement_monthly_spend: f64,
    one_time_event_cost: f64,
    recurring_outflow: f64,
    contributions_capped: bool,
    liquid_exhausted: bool,
}

fn advance_month(ctx: &EngineContext<'_>, state: &mut SimulationState, month: u32) -> MonthOutcome {
    let plan = ctx.plan;
    let rates = &ctx.rates;
    let retired = month > ctx.months_to_retire;
    let age = plan.current_age as f64 + month as f64 / 12.0;
    let age_at_month_start = plan.current_age as f64 + (month - 1) as f64 / 12.0;
    let price_index = rates.price_index(month);

    if !retired && month > 1 && (month - 1) % 12 == 0 {
        let step = 1.0 + plan.contribution_step_up;
        state.contribution_equity *= step;
        state.contribution_stable *= step;
    }

    let retirement_monthly_spend = plan.retirement_annual_expenses * price_index / 12.0;
    let base_monthly_expense = plan.current_annual_expenses * price_index / 12.0;
    let recurring_outflow = ctx.recurring_monthly_outflow(age, price_index);
    let installments: f64 = state
        .liabilities
        .iter_mut()
        .map(|l| l.pay(age_at_month_start))
        .sum();

    let mut contribution_equity = 0.0;
    let mut contribution_stable = 0.0;
    let mut contributions_capped = false;
    if !retired {
        contribution_equity = state.contribution_equity.max(0.0);
        contribution_stable = state.contribution_stable.max(0.0);
        let scheduled = contribution_equity + contribution_stable;
        let surplus =
            state.monthly_income - base_monthly_expense - recurring_outflow - installments;
        if scheduled > 0.0 && scheduled > surplus {
            contributions_capped = true;
            let ratio = (surplus / scheduled).max(0.0);
            contribution_equity *= ratio;
            contribution_stable *= ratio;
        }
    }

    let living_expense = if retired {
        retirement_monthly_spend
    } else {
        base_monthly_expense
    };
    let emergency_floor = ctx.emergency_multiple * living_expense;
    if state.emergency > 0.0 {
        state.emergency *= 1.0 + rates.stable_monthly;
    }
    if !retired && state.emergency < emergency_floor {
        let available = contribution_equity + contribution_stable;
        let top_up = (emergency_floor - state.emergency).min(available);
        if top_up > 0.0 {
            let equity_share = contribution_equity / available;
            contribution_equity = (contribution_equity - top_up * equity_share).max(0.0);
            contribution_stable = (contribution_stable - top_up * (1.0 - equity_share)).max(0.0);
            state.emergency += top_up;
        }
    }

    let mut liquid_exhausted = false;
    if !retired {
        state.equity += contribution_equity;
        state.stable += contribution_stable;
        state.contributed_since_snapshot += contribution_equity + contribution_stable;

        // Recurring costs the income cannot cover come out of savings.
        let income_left = (state.monthly_income - base_monthly_expense - installments).max(0.0);
        let uncovered = (recurring_outflow - income_left).max(0.0);
        if uncovered > 0.0 {
            state.withdraw_pro_rata(uncovered);
            state.withdrawn_since_snapshot += uncovered;
        }
    } else {
        let outflow = retirement_monthly_spend + recurring_outflow + installments;
        liquid_exhausted = state.withdraw_pro_rata(outflow);
        state.withdrawn_since_snapshot += outflow;
    }

    let equity_rate = ctx.equity_rate_for_month(month);
    if state.equity > 0.0 {
        if equity_rate > 0.0 {
            state.harvest_gains_this_year += state.equity * equity_rate;
        }
        state.equity *= 1.0 + equity_rate;
    }
    if state.stable > 0.0 {
        state.stable *= 1.0 + rates.stable_monthly;
    }
    for (value, rate) in state.custom.iter_mut().zip(&rates.custom_monthly) {
        if *value > 0.0 {
            *value *= 1.0 + rate;
        }
    }
    if plan.tax_harvesting {
        if state.harvest_bonus > 0.0 {
            state.harvest_bonus *= 1.0 + rates.equity_monthly;
        }
        if month % 12 == 0 {
            let booked = state.harvest_gains_this_year.min(HARVEST_ANNUAL_EXEMPTION);
            state.harvest_bonus += booked * plan.equity_tax_rate;
        }
    }
    if month % 12 == 0 {
        state.harvest_gains_this_year = 0.0;
    }

    let mut one_time_event_cost = 0.0;
    for (idx, event) in plan.life_events.iter().enumerate() {
        if event.kind != LifeEventKind::OneTime || state.fired_events[idx] {
            continue;
        }
        if (event.age - age).abs() < EVENT_TRIGGER_WINDOW_YEARS {
            state.fired_events[idx] = true;
            let cost = event.cost * price_index;
            state.withdraw_pro_rata(cost);
            one_time_event_cost += cost;
        }
    }

    if !retired {
        state.monthly_income *= 1.0 + rates.salary_growth_monthly;
    }

    MonthOutcome {
        retired,
        age,
        price_index,
        total_wealth: state.liquid() + state.custom_total(),
        target_corpus: plan.retirement_annual_expenses * price_index / ctx.swr,
        retirement_monthly_spend,
        one_time_event_cost,
        recurring_outflow,
        contributions_capped,
        liquid_exhausted,
    }
}

fn snapshot(state: &SimulationState, outcome: &MonthOutcome) -> YearSnapshot {
    let deflator = outcome.price_index.max(1e-9);
    let target = (!outcome.retired).then_some(outcome.target_corpus);
    YearSnapshot {
        age: outcome.age.floor() as u32,
        balance: outcome.total_wealth,
        real_balance: outcome.total_wealth / deflator,
        equity: state.equity,
        stable: state.stable,
        custom: state.custom_total(),
        emergency: state.emergency,
        real_emergency: state.emergency / deflator,
        target,
        real_target: target.map(|t| t / deflator),
        withdrawal: state.withdrawn_since_snapshot,
        real_withdrawal: state.withdrawn_since_snapshot / deflator,
        contribution: state.contributed_since_snapshot,
        event: outcome.one_time_event_cost + outcome.recurring_outflow * 12.0,
        debt: state.outstanding_debt(),
    }
}

pub fn projection_months(plan: &PlanConfiguration) -> u32 {
    plan.life_expectancy
        .saturating_sub(plan.current_age)
        .saturating_mul(12)
        .min(MAX_PROJECTION_MONTHS)
}

pub fn project(plan: &PlanConfiguration) -> ProjectionResult {
    let ctx = EngineContext::new(plan);
    let horizon = projection_months(plan);
    let mut state = SimulationState::new(plan);

    let mut projection = Vec::with_capacity(horizon as usize / 12 + 2);
    // Target corpus at every snapshot, including the retired ones that
    // report `None`; used to size the "work longer" remedy.
    let mut snapshot_targets = Vec::with_capacity(horizon as usize / 12 + 2);
    let mut fire_month = None;
    let mut bankruptcy_age = None;
    let mut contributions_capped = false;
    let mut emergency_coverage_at_retirement = 0.0;

    for month in 1..=horizon {
        let outcome = advance_month(&ctx, &mut state, month);
        contributions_capped |= outcome.contributions_capped;

        if outcome.liquid_exhausted && bankruptcy_age.is_none() {
            bankruptcy_age = Some(outcome.age);
        }
        if fire_month.is_none() && !outcome.retired && outcome.total_wealth >= outcome.target_corpus
        {
            fire_month = Some(month);
        }
        if month == ctx.months_to_retire {
            emergency_coverage_at_retirement =
                state.emergency / outcome.retirement_monthly_spend.max(1.0);
        }

        if month == 1 || month % 12 == 0 {
            projection.push(snapshot(&state, &outcome));
            snapshot_targets.push(outcome.target_corpus);
            state.withdrawn_since_snapshot = 0.0;
            state.contributed_since_snapshot = 0.0;
        }
    }

    let result = summarize(
        &ctx,
        &state,
        projection,
        &snapshot_targets,
        fire_month,
        bankruptcy_age,
        contributions_capped,
        emergency_coverage_at_retirement,
    );
    debug!(
        months = horizon,
        gap = result.gap,
        fire_age = ?result.fire_age,
        bankruptcy_age = ?result.bankruptcy_age,
        "projection complete"
    );
    result
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    ctx: &EngineContext<'_>,
    state: &SimulationState,
    projection: Vec<YearSnapshot>,
    snapshot_targets: &[f64],
    fire_month: Option<u32>,
    bankruptcy_age: Option<f64>,
    contributions_capped: bool,
    emergency_coverage_at_retirement: f64,
) -> ProjectionResult {
    let plan = ctx.plan;
    let retire_age = plan.effective_retirement_age();
    let retirement_price_index = ctx.rates.price_index(ctx.months_to_retire);

    let (corpus, target, real_corpus, real_target) =
        match projection.iter().position(|s| s.age == retire_age) {
            Some(idx) => {
                let snap = &projection[idx];
                let target = snap.target.unwrap_or(snapshot_targets[idx]);
                let real_target = snap
                    .real_target
                    .unwrap_or(target / retirement_price_index.max(1e-9));
                (snap.balance, target, snap.real_balance, real_target)
            }
            None => {
                let corpus = projection
                    .last()
                    .map(|s| s.balance)
                    .unwrap_or_else(|| state.liquid() + state.custom_total());
                let target = plan.retirement_annual_expenses * retirement_price_index / ctx.swr;
                let deflator = retirement_price_index.max(1e-9);
                (corpus, target, corpus / deflator, target / deflator)
            }
        };

    let gap = target - corpus;
    let real_gap = real_target - real_corpus;

    let remediation = if gap > 0.0 {
        Remediation {
            save_more: save_more_remedy(ctx, gap),
            work_longer: projection
                .iter()
                .zip(snapshot_targets)
                .find(|(s, t)| s.age > retire_age && s.balance >= **t)
                .map(|(s, _)| s.age - retire_age),
            spend_less: (plan.retirement_annual_expenses
                - corpus * ctx.swr / retirement_price_index.max(1e-9))
            .max(0.0),
        }
    } else {
        Remediation::default()
    };

    ProjectionResult {
        projection,
        gap,
        real_gap,
        corpus_at_retirement: corpus,
        target_at_retirement: target,
        fire_age: fire_month.map(|m| plan.current_age as f64 + m as f64 / 12.0),
        bankruptcy_age,
        remediation,
        emergency_coverage_at_retirement,
        step_up_exceeds_salary_growth: plan.contribution_step_up > plan.salary_growth,
        contributions_capped,
        harvesting_bonus_wealth: plan.tax_harvesting.then_some(state.harvest_bonus),
    }
}

fn save_more_remedy(ctx: &EngineContext<'_>, gap: f64) -> f64 {
    let plan = ctx.plan;
    let scheduled = plan.monthly_contribution_equity + plan.monthly_contribution_stable;
    let equity_weight = if scheduled > 0.0 {
        plan.monthly_contribution_equity / scheduled
    } else {
        DEFAULT_EQUITY_WEIGHT
    };
    let blended_annual = ctx.rates.equity_annual * equity_weight
        + ctx.rates.stable_annual * (1.0 - equity_weight);
    solve_required_contribution(
        gap,
        ctx.months_to_retire,
        blended_annual / 12.0,
        plan.contribution_step_up,
    )
}
