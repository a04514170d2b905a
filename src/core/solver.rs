pub const GAP_SOLVER_ITERATIONS: u32 = 20;

/// Future value of a monthly contribution stream that is stepped up after
/// every 12th payment, compounding at `monthly_rate`.
pub fn stepped_future_value(
    monthly_contribution: f64,
    months: u32,
    monthly_rate: f64,
    annual_step_up: f64,
) -> f64 {
    let mut fv = 0.0;
    let mut contribution = monthly_contribution;
    for month in 1..=months {
        fv = (fv + contribution) * (1.0 + monthly_rate);
        if month % 12 == 0 {
            contribution *= 1.0 + annual_step_up;
        }
    }
    fv
}

/// Extra monthly contribution that closes `gap` by retirement.
///
/// Fixed-budget bisection over `[0, gap]`: the result is within
/// `gap / 2^20` of the smallest candidate whose future value exceeds the
/// gap. Returns 0 when there is nothing to close or no time to close it.
pub fn solve_required_contribution(
    gap: f64,
    months_to_retirement: u32,
    monthly_rate: f64,
    annual_step_up: f64,
) -> f64 {
    if gap <= 0.0 || months_to_retirement == 0 {
        return 0.0;
    }

    let mut lo = 0.0;
    let mut hi = gap;
    let mut solution = 0.0;
    for _ in 0..GAP_SOLVER_ITERATIONS {
        let mid = (lo + hi) * 0.5;
        let fv = stepped_future_value(mid, months_to_retirement, monthly_rate, annual_step_up);
        if fv > gap {
            solution = mid;
            hi = mid;
        } else {
            lo = mid;
        }
    }
    solution
}
