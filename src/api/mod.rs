pub mod export;

use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    CustomAsset, DEFAULT_TRIALS, DeliveredResult, Liability, LifeEvent, MonteCarloDispatcher,
    MonteCarloResult, PlanConfiguration, ProjectionResult, project, simulate, simulate_seeded,
};

use self::export::projection_csv;

/// Upper bound on trials accepted from callers.
pub const MAX_TRIALS: u32 = DEFAULT_TRIALS;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("invalid plan JSON: {0}")]
    InvalidJson(String),
    #[error("lifeExpectancy must be > currentAge")]
    HorizonBeforeCurrentAge,
    #[error("{field} must be >= 0")]
    Negative { field: &'static str },
    #[error("{field} must be between 0 and 100")]
    PercentOutOfRange { field: &'static str },
    #[error("trials must be between 1 and {max}")]
    TrialsOutOfRange { max: u32 },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CustomAssetPayload {
    name: String,
    value: Option<f64>,
    annual_return: Option<f64>,
    tax_rate: Option<f64>,
}

/// Plan as sent by clients: every field optional, rates in percent.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanPayload {
    current_age: Option<u32>,
    #[serde(alias = "retirementAge")]
    target_retirement_age: Option<u32>,
    life_expectancy: Option<u32>,

    equity_balance: Option<f64>,
    stable_balance: Option<f64>,
    custom_assets: Vec<CustomAssetPayload>,
    emergency_fund: Option<f64>,

    monthly_contribution_equity: Option<f64>,
    monthly_contribution_stable: Option<f64>,
    contribution_step_up: Option<f64>,

    annual_income: Option<f64>,
    salary_growth: Option<f64>,
    current_annual_expenses: Option<f64>,
    retirement_annual_expenses: Option<f64>,

    equity_return: Option<f64>,
    stable_return: Option<f64>,
    equity_tax_rate: Option<f64>,
    stable_tax_rate: Option<f64>,
    inflation_rate: Option<f64>,
    safe_withdrawal_rate: Option<f64>,

    liabilities: Vec<Liability>,
    life_events: Vec<LifeEvent>,

    stress_test: Option<bool>,
    tax_harvesting: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloPayload {
    plan: PlanPayload,
    trials: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchResponse {
    request_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestResponse {
    current_request_id: u64,
    delivered: Option<DeliveredResult>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone, Default)]
pub struct AppState {
    dispatcher: MonteCarloDispatcher,
}

impl AppState {
    pub fn new(dispatcher: MonteCarloDispatcher) -> Self {
        Self { dispatcher }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn default_plan() -> PlanConfiguration {
    PlanConfiguration {
        current_age: 30,
        target_retirement_age: 50,
        life_expectancy: 85,
        contribution_step_up: 0.10,
        salary_growth: 0.08,
        equity_return: 0.12,
        stable_return: 0.07,
        equity_tax_rate: 0.125,
        stable_tax_rate: 0.30,
        inflation_rate: 0.06,
        safe_withdrawal_rate: 0.035,
        ..PlanConfiguration::default()
    }
}

fn money(value: Option<f64>, default: f64, field: &'static str) -> Result<f64, PlanError> {
    let value = value.map(finite_or_zero).unwrap_or(default);
    if value < 0.0 {
        return Err(PlanError::Negative { field });
    }
    Ok(value)
}

fn percent(value: Option<f64>, default: f64) -> f64 {
    value.map(|v| finite_or_zero(v) / 100.0).unwrap_or(default)
}

fn tax_percent(value: Option<f64>, default: f64, field: &'static str) -> Result<f64, PlanError> {
    let rate = percent(value, default);
    if !(0.0..=1.0).contains(&rate) {
        return Err(PlanError::PercentOutOfRange { field });
    }
    Ok(rate)
}

pub fn build_plan(payload: PlanPayload) -> Result<PlanConfiguration, PlanError> {
    let base = default_plan();
    let current_age = payload.current_age.unwrap_or(base.current_age);
    let life_expectancy = payload.life_expectancy.unwrap_or(base.life_expectancy);
    if life_expectancy <= current_age {
        return Err(PlanError::HorizonBeforeCurrentAge);
    }

    let custom_assets = payload
        .custom_assets
        .into_iter()
        .map(|asset| {
            Ok(CustomAsset {
                name: asset.name,
                value: money(asset.value, 0.0, "customAssets.value")?,
                annual_return: percent(asset.annual_return, 0.0),
                tax_rate: tax_percent(asset.tax_rate, 0.0, "customAssets.taxRate")?,
            })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    let liabilities = payload
        .liabilities
        .into_iter()
        .map(|l| {
            Ok(Liability {
                monthly_installment: money(
                    Some(l.monthly_installment),
                    0.0,
                    "liabilities.monthlyInstallment",
                )?,
                outstanding_balance: money(
                    Some(l.outstanding_balance),
                    0.0,
                    "liabilities.outstandingBalance",
                )?,
                payoff_age: finite_or_zero(l.payoff_age),
                name: l.name,
            })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    let life_events = payload
        .life_events
        .into_iter()
        .map(|e| {
            Ok(LifeEvent {
                age: finite_or_zero(e.age),
                cost: money(Some(e.cost), 0.0, "lifeEvents.cost")?,
                end_age: e.end_age.map(finite_or_zero),
                ..e
            })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    Ok(PlanConfiguration {
        current_age,
        target_retirement_age: payload
            .target_retirement_age
            .unwrap_or(base.target_retirement_age),
        life_expectancy,
        equity_balance: money(payload.equity_balance, base.equity_balance, "equityBalance")?,
        stable_balance: money(payload.stable_balance, base.stable_balance, "stableBalance")?,
        custom_assets,
        emergency_fund: money(payload.emergency_fund, base.emergency_fund, "emergencyFund")?,
        monthly_contribution_equity: money(
            payload.monthly_contribution_equity,
            base.monthly_contribution_equity,
            "monthlyContributionEquity",
        )?,
        monthly_contribution_stable: money(
            payload.monthly_contribution_stable,
            base.monthly_contribution_stable,
            "monthlyContributionStable",
        )?,
        contribution_step_up: percent(payload.contribution_step_up, base.contribution_step_up),
        annual_income: money(payload.annual_income, base.annual_income, "annualIncome")?,
        salary_growth: percent(payload.salary_growth, base.salary_growth),
        current_annual_expenses: money(
            payload.current_annual_expenses,
            base.current_annual_expenses,
            "currentAnnualExpenses",
        )?,
        retirement_annual_expenses: money(
            payload.retirement_annual_expenses,
            base.retirement_annual_expenses,
            "retirementAnnualExpenses",
        )?,
        equity_return: percent(payload.equity_return, base.equity_return),
        stable_return: percent(payload.stable_return, base.stable_return),
        equity_tax_rate: tax_percent(
            payload.equity_tax_rate,
            base.equity_tax_rate,
            "equityTaxRate",
        )?,
        stable_tax_rate: tax_percent(
            payload.stable_tax_rate,
            base.stable_tax_rate,
            "stableTaxRate",
        )?,
        inflation_rate: percent(payload.inflation_rate, base.inflation_rate),
        safe_withdrawal_rate: percent(payload.safe_withdrawal_rate, base.safe_withdrawal_rate),
        liabilities,
        life_events,
        stress_test: payload.stress_test.unwrap_or(base.stress_test),
        tax_harvesting: payload.tax_harvesting.unwrap_or(base.tax_harvesting),
    })
}

pub fn plan_from_json(json: &str) -> Result<PlanConfiguration, PlanError> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| PlanError::InvalidJson(e.to_string()))?;
    build_plan(payload)
}

pub fn resolve_trials(trials: Option<u32>) -> Result<u32, PlanError> {
    let trials = trials.unwrap_or(DEFAULT_TRIALS);
    if trials == 0 || trials > MAX_TRIALS {
        return Err(PlanError::TrialsOutOfRange { max: MAX_TRIALS });
    }
    Ok(trials)
}

/// Runs the deterministic projection and logs plans whose contributions
/// were cut to fit the budget.
pub fn run_projection(plan: &PlanConfiguration) -> ProjectionResult {
    let result = project(plan);
    if result.contributions_capped {
        warn!(
            current_age = plan.current_age,
            "scheduled contributions exceed monthly surplus; capped to fit"
        );
    }
    result
}

pub fn run_monte_carlo(
    plan: &PlanConfiguration,
    trials: u32,
    seed: Option<u64>,
) -> MonteCarloResult {
    match seed {
        Some(seed) => simulate_seeded(plan, trials, seed),
        None => simulate(plan, trials),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/project", post(project_handler))
        .route("/api/project.csv", post(project_csv_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/monte-carlo/dispatch", post(dispatch_handler))
        .route("/api/monte-carlo/latest", get(latest_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState::default());

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "fireplan HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn plan_from_request(
    payload: Result<Json<PlanPayload>, JsonRejection>,
) -> Result<PlanConfiguration, PlanError> {
    let Json(payload) = payload.map_err(|e| PlanError::InvalidJson(e.body_text()))?;
    build_plan(payload)
}

async fn project_handler(payload: Result<Json<PlanPayload>, JsonRejection>) -> Response {
    let plan = match plan_from_request(payload) {
        Ok(plan) => plan,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    info!(current_age = plan.current_age, "projection requested");
    json_response(StatusCode::OK, run_projection(&plan))
}

async fn project_csv_handler(payload: Result<Json<PlanPayload>, JsonRejection>) -> Response {
    let plan = match plan_from_request(payload) {
        Ok(plan) => plan,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    info!(current_age = plan.current_age, "projection CSV requested");
    let csv = projection_csv(&run_projection(&plan));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"projection.csv\"",
            ),
            (header::CACHE_CONTROL, "no-store"),
        ],
        csv,
    )
        .into_response()
}

fn monte_carlo_request(
    payload: Result<Json<MonteCarloPayload>, JsonRejection>,
) -> Result<(PlanConfiguration, u32, Option<u64>), PlanError> {
    let Json(payload) = payload.map_err(|e| PlanError::InvalidJson(e.body_text()))?;
    let trials = resolve_trials(payload.trials)?;
    let plan = build_plan(payload.plan)?;
    Ok((plan, trials, payload.seed))
}

async fn monte_carlo_handler(
    payload: Result<Json<MonteCarloPayload>, JsonRejection>,
) -> Response {
    let (plan, trials, seed) = match monte_carlo_request(payload) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    info!(trials, seeded = seed.is_some(), "monte carlo requested");

    match tokio::task::spawn_blocking(move || run_monte_carlo(&plan, trials, seed)).await {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(err) => {
            warn!(error = %err, "monte carlo worker failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Monte Carlo run failed")
        }
    }
}

async fn dispatch_handler(
    State(state): State<AppState>,
    payload: Result<Json<MonteCarloPayload>, JsonRejection>,
) -> Response {
    let (plan, trials, seed) = match monte_carlo_request(payload) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    let request_id = state.dispatcher.dispatch(plan, trials, seed);
    info!(request_id, trials, "monte carlo dispatched");
    json_response(StatusCode::ACCEPTED, DispatchResponse { request_id })
}

async fn latest_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        LatestResponse {
            current_request_id: state.dispatcher.current_request(),
            delivered: state.dispatcher.latest(),
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
