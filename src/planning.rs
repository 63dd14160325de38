// =============================================================================
// Goal Planning — compound-growth horizon calculator
// =============================================================================
//
// Solves FV = PV * (1 + r)^n for n calendar days, then derives trading days
// (5 of every 7), years (252 trading days each) and the calendar target date.
// =============================================================================

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    Missing(&'static str),
    NotANumber(&'static str),
    NonPositive,
    GoalNotAboveStart,
    /// Horizon too far out to express as a date.
    Unreachable,
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "missing required parameter: {field}"),
            Self::NotANumber(field) => write!(f, "{field} must be a valid number"),
            Self::NonPositive => write!(f, "all values must be positive numbers"),
            Self::GoalNotAboveStart => {
                write!(f, "goal amount must be greater than starting amount")
            }
            Self::Unreachable => write!(f, "goal is not reachable within a representable date"),
        }
    }
}

impl std::error::Error for PlanError {}

/// Result of a goal plan. `years` and `months` are pre-rounded display strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalPlan {
    pub days: u64,
    pub trading_days: u64,
    pub years: String,
    pub months: String,
    pub target_date: String,
}

/// Compute how long `starting_amount` needs to reach `goal_amount` growing
/// `return_percentage` percent per calendar day.
pub fn plan_goal(
    starting_amount: f64,
    return_percentage: f64,
    goal_amount: f64,
    today: NaiveDate,
) -> Result<GoalPlan, PlanError> {
    let inputs = [starting_amount, return_percentage, goal_amount];
    if inputs.iter().any(|v| !v.is_finite()) {
        return Err(PlanError::NotANumber("all inputs"));
    }
    if inputs.iter().any(|v| *v <= 0.0) {
        return Err(PlanError::NonPositive);
    }
    if starting_amount >= goal_amount {
        return Err(PlanError::GoalNotAboveStart);
    }

    let rate = return_percentage / 100.0;
    let days = ((goal_amount / starting_amount).ln() / (1.0 + rate).ln()).ceil();
    if !days.is_finite() || days > u32::MAX as f64 {
        return Err(PlanError::Unreachable);
    }
    let days = days as u64;

    let trading_days = (days as f64 * 5.0 / 7.0).ceil() as u64;
    let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
    let months = years * 12.0;

    let target = today
        .checked_add_days(Days::new(days))
        .ok_or(PlanError::Unreachable)?;

    Ok(GoalPlan {
        days,
        trading_days,
        years: format!("{years:.2}"),
        months: format!("{months:.1}"),
        target_date: target.format("%Y-%m-%d").to_string(),
    })
}

/// Inbound form for the planner. Fields may be JSON numbers or numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[serde(default)]
    pub starting_amount: Value,
    #[serde(default)]
    pub return_percentage: Value,
    #[serde(default)]
    pub goal_amount: Value,
}

impl PlanRequest {
    pub fn plan(&self, today: NaiveDate) -> Result<GoalPlan, PlanError> {
        let start = number_field(&self.starting_amount, "startingAmount")?;
        let rate = number_field(&self.return_percentage, "returnPercentage")?;
        let goal = number_field(&self.goal_amount, "goalAmount")?;
        plan_goal(start, rate, goal, today)
    }
}

fn number_field(val: &Value, name: &'static str) -> Result<f64, PlanError> {
    match val {
        Value::Null => Err(PlanError::Missing(name)),
        Value::String(s) if s.trim().is_empty() => Err(PlanError::Missing(name)),
        Value::Number(n) => n.as_f64().ok_or(PlanError::NotANumber(name)),
        Value::String(s) => s.trim().parse().map_err(|_| PlanError::NotANumber(name)),
        _ => Err(PlanError::NotANumber(name)),
    }
}
