//! Gross pay aggregation.
//!
//! Combines an employee's salary components that were in force during
//! the period with that period's variable inputs.

use crate::error::{CalculationError, CalculationResult};
use crate::models::{ComponentType, GrossPayBreakdown, PeriodKey, SalaryComponent, VariableInput};
use rust_decimal::Decimal;

/// Whether `component` applied at any point during `period`.  A set
/// `deactivated_on` takes precedence over the `active` flag.
pub fn in_force(component: &SalaryComponent, period: &PeriodKey) -> bool {
    if matches!(component.effective_from, Some(from) if from > period.last_day()) {
        return false;
    }
    match component.deactivated_on {
        Some(deactivated) => deactivated > period.first_day(),
        None => component.active,
    }
}

pub fn aggregate(
    components: &[SalaryComponent],
    variable_inputs: &[VariableInput],
    period: &PeriodKey,
) -> CalculationResult<GrossPayBreakdown> {
    let mut breakdown = GrossPayBreakdown::default();
    let mut basic_seen: Option<&str> = None;

    for component in components.iter().filter(|c| in_force(c, period)) {
        if component.amount < Decimal::ZERO {
            return Err(invalid(&component.name, format!("amount {} is negative", component.amount)));
        }
        match component.component_type {
            ComponentType::BasicSalary => {
                if let Some(previous) = basic_seen {
                    return Err(invalid(
                        &component.name,
                        format!("second basic salary alongside `{}`", previous),
                    ));
                }
                basic_seen = Some(component.name.as_str());
                breakdown.basic = component.amount;
            }
            ComponentType::FixedAllowance => {
                breakdown.allowances = checked_sum(breakdown.allowances, component.amount, &component.name)?;
            }
            ComponentType::Deduction => {
                breakdown.deductions = checked_sum(breakdown.deductions, component.amount, &component.name)?;
            }
        }
    }

    for input in variable_inputs {
        let name = || {
            if input.description.is_empty() {
                format!("{:?}", input.kind).to_lowercase()
            } else {
                input.description.clone()
            }
        };
        if input.amount < Decimal::ZERO {
            return Err(invalid(&name(), format!("amount {} is negative", input.amount)));
        }
        breakdown.variable = checked_sum(breakdown.variable, input.amount, &name())?;
    }

    let earnings = breakdown
        .basic
        .checked_add(breakdown.allowances)
        .and_then(|sum| sum.checked_add(breakdown.variable))
        .ok_or_else(|| invalid("earnings", "total earnings overflow".to_string()))?;
    if breakdown.deductions > earnings {
        return Err(invalid(
            "deductions",
            format!("total {} exceeds earnings of {}", breakdown.deductions, earnings),
        ));
    }
    breakdown.gross_total = earnings - breakdown.deductions;
    Ok(breakdown)
}

fn checked_sum(total: Decimal, amount: Decimal, component: &str) -> CalculationResult<Decimal> {
    total
        .checked_add(amount)
        .ok_or_else(|| invalid(component, format!("adding {} overflows the running total", amount)))
}

fn invalid(component: &str, reason: String) -> CalculationError {
    CalculationError::InvalidComponent {
        component: component.to_string(),
        reason,
    }
}
