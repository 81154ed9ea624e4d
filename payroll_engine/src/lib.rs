//! Payroll Engine library crate.
//!
//! This crate computes Indonesian statutory payroll: gross pay from
//! salary components, BPJS Health and Manpower contributions, PPh 21
//! withholding and net pay, one line item per employee per period.
//! Applications load a [`tax::TaxTableProvider`], open periods through
//! a [`period::PeriodRegistry`] and drive them with
//! [`engine::PayrollEngine::run`].  Persistence and report rendering
//! stay with the caller.

pub mod aggregate;
pub mod bpjs;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod period;
pub mod pph21;
pub mod summary;
pub mod tax;
pub mod validation;

pub use engine::{EmployeeOutcome, PayrollEngine, RunReport};
pub use error::{CalculationError, LineItemError, PayrollError};
pub use period::{PayrollPeriod, PeriodRegistry, PeriodState};
