//! Data models for the Payroll Engine.
//!
//! The `models` module defines the serialisable records the engine
//! consumes (employees, salary components, variable inputs) and the
//! records it produces (gross pay breakdowns, BPJS contributions,
//! withholding results and payroll line items).  Every type derives
//! `Serialize`/`Deserialize` so the surrounding application can load
//! them from its data store and hand results to its reporting layer.
//!
//! Money is always a [`Decimal`].  Amounts the engine emits are whole
//! rupiah, rounded toward zero.

use crate::error::{PayrollError, PayrollResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// An employee as materialised by the external employee store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    /// Identifier assigned by the employee store.
    pub id: String,
    pub full_name: String,
    /// 16 digit national identity number (Nomor Induk Kependudukan).
    pub nik: String,
    /// 15 digit taxpayer number, when the employee has registered one.
    #[serde(default)]
    pub npwp: Option<String>,
    pub employment_status: EmploymentStatus,
    #[serde(default)]
    pub lifecycle_status: LifecycleStatus,
    pub ptkp_status: PtkpStatus,
    #[serde(default)]
    pub bpjs: BpjsEnrollment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmploymentStatus {
    Permanent,
    Contract,
}

/// Employees are never deleted; leaving the company only changes this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Active,
    Resigned,
    Terminated,
}

/// Non-taxable income category: marital status and number of
/// dependents (capped at three).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PtkpStatus {
    #[serde(rename = "TK/0")]
    Tk0,
    #[serde(rename = "TK/1")]
    Tk1,
    #[serde(rename = "TK/2")]
    Tk2,
    #[serde(rename = "TK/3")]
    Tk3,
    #[serde(rename = "K/0")]
    K0,
    #[serde(rename = "K/1")]
    K1,
    #[serde(rename = "K/2")]
    K2,
    #[serde(rename = "K/3")]
    K3,
}

impl PtkpStatus {
    pub const ALL: [PtkpStatus; 8] = [
        PtkpStatus::Tk0,
        PtkpStatus::Tk1,
        PtkpStatus::Tk2,
        PtkpStatus::Tk3,
        PtkpStatus::K0,
        PtkpStatus::K1,
        PtkpStatus::K2,
        PtkpStatus::K3,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            PtkpStatus::Tk0 => "TK/0",
            PtkpStatus::Tk1 => "TK/1",
            PtkpStatus::Tk2 => "TK/2",
            PtkpStatus::Tk3 => "TK/3",
            PtkpStatus::K0 => "K/0",
            PtkpStatus::K1 => "K/1",
            PtkpStatus::K2 => "K/2",
            PtkpStatus::K3 => "K/3",
        }
    }
}

impl fmt::Display for PtkpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PtkpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        PtkpStatus::ALL
            .into_iter()
            .find(|status| status.code() == wanted)
            .ok_or_else(|| format!("unknown PTKP status `{}`", s))
    }
}

/// Which BPJS schemes the employee is registered with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpjsEnrollment {
    #[serde(default)]
    pub health: bool,
    #[serde(default)]
    pub manpower: bool,
}

/// A recurring pay element owned by one employee.
///
/// `amount` is always non-negative; whether it adds to or subtracts
/// from pay is decided by `component_type`.  The optional dates let a
/// historical period be recalculated with the components that were in
/// force back then.
///
/// When `deactivated_on` is set the date alone decides activity and
/// `active` is ignored; `active` only governs undated components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryComponent {
    pub name: String,
    pub component_type: ComponentType,
    pub amount: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub deactivated_on: Option<NaiveDate>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    BasicSalary,
    FixedAllowance,
    Deduction,
}

/// A period-specific earning such as a bonus or overtime pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInput {
    pub kind: VariableKind,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Bonus,
    Overtime,
    Other,
}

/// Identifies one payroll month for an organisation scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeriodKey {
    scope: String,
    year: i32,
    month: u32,
    first_day: NaiveDate,
    last_day: NaiveDate,
}

impl PeriodKey {
    pub fn new(scope: impl Into<String>, year: i32, month: u32) -> PayrollResult<Self> {
        let invalid = || PayrollError::Configuration(format!("invalid payroll month {year}-{month:02}"));
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(invalid)?;
        Ok(PeriodKey {
            scope: scope.into(),
            year,
            month,
            first_day,
            last_day,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last_day
    }

    /// The date tax tables are looked up for.
    pub fn as_of_date(&self) -> NaiveDate {
        self.first_day
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{:02}", self.scope, self.year, self.month)
    }
}

/// Input to a payroll run.
///
/// Salary components and variable inputs are keyed by employee id.  An
/// employee without entries may be omitted from either map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayrollInput {
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub components: HashMap<String, Vec<SalaryComponent>>,
    #[serde(default)]
    pub variable_inputs: HashMap<String, Vec<VariableInput>>,
}

/// Gross pay split into its sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrossPayBreakdown {
    pub basic: Decimal,
    pub allowances: Decimal,
    pub deductions: Decimal,
    pub variable: Decimal,
    /// `basic + allowances + variable - deductions`
    pub gross_total: Decimal,
}

impl GrossPayBreakdown {
    /// Basic salary plus fixed allowances.
    pub fn fixed_pay(&self) -> Decimal {
        self.basic + self.allowances
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BpjsScheme {
    Health,
    Manpower,
}

/// Contribution to one BPJS program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramContribution {
    pub program: String,
    pub scheme: BpjsScheme,
    /// Salary the rates were applied to, after the program cap.
    pub base: Decimal,
    pub employee: Decimal,
    pub employer: Decimal,
    pub tax_deductible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpjsContributions {
    pub health_employee: Decimal,
    pub health_employer: Decimal,
    pub manpower_employee: Decimal,
    pub manpower_employer: Decimal,
    pub programs: Vec<ProgramContribution>,
}

impl BpjsContributions {
    pub fn employee_total(&self) -> Decimal {
        self.health_employee + self.manpower_employee
    }

    pub fn employer_total(&self) -> Decimal {
        self.health_employer + self.manpower_employer
    }

    /// Employee contributions that reduce taxable income.
    pub fn tax_deductible_employee(&self) -> Decimal {
        self.programs
            .iter()
            .filter(|p| p.tax_deductible)
            .map(|p| p.employee)
            .sum()
    }
}

/// Result of the PPh 21 calculation for one month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withholding {
    pub occupational_cost: Decimal,
    pub annual_taxable_income: Decimal,
    pub annual_tax: Decimal,
    pub monthly_withholding: Decimal,
}

/// One employee's payroll result for one period.
///
/// `net_pay` is always `gross.gross_total - bpjs.employee_total() -
/// withholding.monthly_withholding`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollLineItem {
    pub employee_id: String,
    pub period_id: String,
    pub tax_table_version: String,
    pub gross: GrossPayBreakdown,
    pub bpjs: BpjsContributions,
    pub withholding: Withholding,
    pub net_pay: Decimal,
}

impl PayrollLineItem {
    pub fn gross_pay(&self) -> Decimal {
        self.gross.gross_total
    }

    pub fn pph21(&self) -> Decimal {
        self.withholding.monthly_withholding
    }
}

/// Rounds a non-negative amount down to whole rupiah.
pub(crate) fn whole_rupiah(amount: Decimal) -> Decimal {
    amount.floor()
}
