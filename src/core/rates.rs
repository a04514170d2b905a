use super::types::PlanConfiguration;

/// Share of a balance's growth treated as taxable gain in a period.
pub const TAX_DRAG_COEFFICIENT: f64 = 0.75;
pub const MAX_ANNUAL_RETURN: f64 = 1.0;
/// Keeps `1 + r` positive for randomized trial returns.
pub const MIN_ANNUAL_RETURN: f64 = -0.95;
pub const MAX_ANNUAL_INFLATION: f64 = 0.5;
/// Annual equity return forced during the stress-test window.
pub const STRESS_EQUITY_RETURN: f64 = -0.20;

pub fn effective_annual_return(nominal_return: f64, tax_rate: f64) -> f64 {
    let nominal = nominal_return.clamp(MIN_ANNUAL_RETURN, MAX_ANNUAL_RETURN);
    nominal * (1.0 - tax_rate * TAX_DRAG_COEFFICIENT)
}

pub fn monthly_rate(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / 12.0) - 1.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateModel {
    pub equity_annual: f64,
    pub stable_annual: f64,
    pub equity_monthly: f64,
    pub stable_monthly: f64,
    pub stress_equity_monthly: f64,
    pub custom_monthly: Vec<f64>,
    pub inflation_annual: f64,
    pub inflation_monthly: f64,
    pub salary_growth_monthly: f64,
}

impl RateModel {
    pub fn from_plan(plan: &PlanConfiguration) -> Self {
        let equity_annual = effective_annual_return(plan.equity_return, plan.equity_tax_rate);
        let stable_annual = effective_annual_return(plan.stable_return, plan.stable_tax_rate);
        let inflation_annual = plan.inflation_rate.min(MAX_ANNUAL_INFLATION);

        Self {
            equity_annual,
            stable_annual,
            equity_monthly: monthly_rate(equity_annual),
            stable_monthly: monthly_rate(stable_annual),
            stress_equity_monthly: monthly_rate(STRESS_EQUITY_RETURN),
            custom_monthly: plan
                .custom_assets
                .iter()
                .map(|asset| {
                    monthly_rate(effective_annual_return(asset.annual_return, asset.tax_rate))
                })
                .collect(),
            inflation_annual,
            inflation_monthly: monthly_rate(inflation_annual),
            salary_growth_monthly: monthly_rate(plan.salary_growth),
        }
    }

    /// Cumulative price level for a (1-based) month; month 1 is today's money.
    pub fn price_index(&self, month: u32) -> f64 {
        (1.0 + self.inflation_annual).powf(month.saturating_sub(1) as f64 / 12.0)
    }
}
