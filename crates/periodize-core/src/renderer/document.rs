//! Plain-text plan document.

use std::fmt::Write;

use periodize_db::models::Plan;

use crate::discipline::AthleteData;

/// Render a plan as a UTF-8 text document: a short header followed by
/// the generated content.
pub fn render_text(plan: &Plan, athlete: &AthleteData, content: &str) -> Vec<u8> {
    let profile = athlete.profile();
    let mut out = String::new();
    let title = format!("{} training plan", capitalize(plan.discipline.as_str()));
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(title.len()));
    let _ = writeln!(out);
    let _ = writeln!(out, "Athlete:  {}", profile.name);
    let _ = writeln!(out, "Goal:     {}", profile.goal);
    let _ = writeln!(out, "Duration: {} weeks", plan.plan_duration);
    let _ = writeln!(
        out,
        "Period:   {} to {}",
        plan.start_date.format("%d/%m/%Y"),
        plan.end_date.format("%d/%m/%Y")
    );
    let _ = writeln!(out, "Plan ID:  {}", plan.plan_id);
    let _ = writeln!(out);
    out.push_str(content.trim_end());
    out.push('\n');
    out.into_bytes()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
