use crate::core::ProjectionResult;

pub const CSV_HEADER: &str = "Age,Balance,RealValue,Equity,Stable,Alternative,Target,Event";

/// Neutralizes spreadsheet formula injection by quoting fields that a
/// spreadsheet would evaluate.
pub fn sanitize_csv_field(field: &str) -> String {
    match field.chars().next() {
        Some('=' | '+' | '-' | '@') => format!("'{field}"),
        _ => field.to_string(),
    }
}

fn whole(value: f64) -> String {
    let rounded = value.round();
    // Avoid printing "-0" for tiny negative values.
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.0}")
}

pub fn projection_csv(result: &ProjectionResult) -> String {
    let mut out = String::with_capacity(64 * (result.projection.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');

    for snap in &result.projection {
        let fields = [
            snap.age.to_string(),
            whole(snap.balance),
            whole(snap.real_balance),
            whole(snap.equity),
            whole(snap.stable),
            whole(snap.custom),
            snap.target.map(whole).unwrap_or_default(),
            whole(snap.event),
        ];
        let row: Vec<String> = fields.iter().map(|f| sanitize_csv_field(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}
