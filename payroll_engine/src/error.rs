//! Error types for the payroll engine.
//!
//! Errors come in two tiers.  [`PayrollError`] covers failures that
//! affect a whole run or period (missing tax tables, lifecycle
//! violations).  [`CalculationError`] covers failures confined to a
//! single employee; the orchestrator wraps those in a
//! [`LineItemError`] and keeps going with the rest of the batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayrollError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no tax table is active on {date}")]
    NoActiveTaxTable { date: NaiveDate },

    #[error("payroll period {period} is already finalized")]
    AlreadyFinalized { period: String },

    #[error("payroll period {period} is being calculated")]
    CalculationInProgress { period: String },

    #[error("payroll period {period} has not been calculated")]
    NotCalculated { period: String },

    #[error("payroll period {period} has {count} outstanding line item errors")]
    OutstandingErrors { period: String, count: usize },

    #[error("a payroll period for {scope} {year}-{month:02} already exists")]
    DuplicatePeriod { scope: String, year: i32, month: u32 },

    #[error("payroll period {0} not found")]
    PeriodNotFound(String),

    #[error("payroll period {period} has been superseded")]
    Superseded { period: String },
}

impl PayrollError {
    /// True for errors that mean no result of a run can be trusted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PayrollError::Configuration(_) | PayrollError::NoActiveTaxTable { .. }
        )
    }
}

/// A failure calculating one employee's pay.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculationError {
    #[error("invalid salary component `{component}`: {reason}")]
    InvalidComponent { component: String, reason: String },

    #[error("PTKP status `{status}` is not in tax table {table_version}")]
    UnknownPtkpStatus { status: String, table_version: String },

    #[error("invalid employee record: {reason}")]
    InvalidEmployee { reason: String },
}

/// A [`CalculationError`] recorded against the employee it happened to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemError {
    pub employee_id: String,
    pub error: CalculationError,
}

impl std::fmt::Display for LineItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "employee {}: {}", self.employee_id, self.error)
    }
}

pub type PayrollResult<T> = Result<T, PayrollError>;
pub type CalculationResult<T> = Result<T, CalculationError>;
