//! Payroll computation engine.
//!
//! The `engine` module turns a [`PayrollInput`] into one
//! [`PayrollLineItem`] per employee for a [`PayrollPeriod`].  It uses
//! the [`rayon`] crate to parallelise per‑employee calculations across
//! CPU cores; every employee of a run shares one read-only
//! [`TaxTableVersion`] snapshot.  A failure for one employee is
//! recorded as a [`LineItemError`] and never aborts the batch, while a
//! configuration failure aborts the run before anything is produced.

use crate::aggregate::aggregate;
use crate::bpjs::compute_bpjs;
use crate::config::EngineConfig;
use crate::error::{CalculationError, CalculationResult, LineItemError, PayrollResult};
use crate::models::{Employee, LifecycleStatus, PayrollInput, PayrollLineItem, PeriodKey};
use crate::period::PayrollPeriod;
use crate::pph21::{AnnualizedCalculator, WithholdingCalculator};
use crate::tax::{load_tax_tables_from_dir, ContributionBase, TaxTableProvider, TaxTableVersion};
use crate::validation::validate_employee;
use anyhow::Context;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of calculating one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum EmployeeOutcome {
    Calculated(PayrollLineItem),
    Failed(LineItemError),
}

impl EmployeeOutcome {
    pub fn employee_id(&self) -> &str {
        match self {
            EmployeeOutcome::Calculated(item) => &item.employee_id,
            EmployeeOutcome::Failed(error) => &error.employee_id,
        }
    }
}

/// Everything one run produced, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub period_id: String,
    pub tax_table_version: String,
    pub outcomes: Vec<EmployeeOutcome>,
    /// Employees left out because they are no longer active.
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn line_items(&self) -> impl Iterator<Item = &PayrollLineItem> {
        self.outcomes.iter().filter_map(|o| match o {
            EmployeeOutcome::Calculated(item) => Some(item),
            EmployeeOutcome::Failed(_) => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &LineItemError> {
        self.outcomes.iter().filter_map(|o| match o {
            EmployeeOutcome::Failed(error) => Some(error),
            EmployeeOutcome::Calculated(_) => None,
        })
    }
}

pub struct PayrollEngine {
    tax_tables: Arc<TaxTableProvider>,
    calculator: Arc<dyn WithholdingCalculator>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl PayrollEngine {
    /// An engine using the annualised PPh 21 method on rayon's global
    /// pool.
    pub fn new(tax_tables: TaxTableProvider) -> Self {
        PayrollEngine {
            tax_tables: Arc::new(tax_tables),
            calculator: Arc::new(AnnualizedCalculator),
            pool: None,
        }
    }

    /// Loads tax tables from the configured directory and builds a
    /// dedicated thread pool when a worker count is configured.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let tables = load_tax_tables_from_dir(&config.tax_table_dir)?;
        let mut engine = PayrollEngine::new(tables);
        if let Some(threads) = config.worker_threads {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("payroll-{}", i))
                .build()
                .context("building payroll worker pool")?;
            engine = engine.with_thread_pool(pool);
        }
        Ok(engine)
    }

    pub fn with_calculator(mut self, calculator: Arc<dyn WithholdingCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_thread_pool(mut self, pool: rayon::ThreadPool) -> Self {
        self.pool = Some(Arc::new(pool));
        self
    }

    pub fn tax_tables(&self) -> &TaxTableProvider {
        &self.tax_tables
    }

    /// Recalculates every active employee of `input` and replaces the
    /// period's line items and errors with the results.
    pub fn run(&self, period: &PayrollPeriod, input: &PayrollInput) -> PayrollResult<RunReport> {
        let guard = period.begin_calculation()?;
        let report = self.calculate(period.id(), period.key(), input, None)?;
        guard.commit(&report, None)?;
        Ok(report)
    }

    /// Recalculates only the listed employees and merges the results
    /// into the period, leaving everyone else's results untouched.
    pub fn run_employees(
        &self,
        period: &PayrollPeriod,
        input: &PayrollInput,
        employee_ids: &[String],
    ) -> PayrollResult<RunReport> {
        let guard = period.begin_calculation()?;
        let wanted: HashSet<&str> = employee_ids.iter().map(String::as_str).collect();
        let report = self.calculate(period.id(), period.key(), input, Some(&wanted))?;
        guard.commit(&report, Some(employee_ids))?;
        Ok(report)
    }

    /// Calculates a run without touching any period state.
    ///
    /// Fails only when no tax table covers the period; per-employee
    /// problems are reported inside the returned [`RunReport`].
    pub fn calculate(
        &self,
        period_id: &str,
        period: &PeriodKey,
        input: &PayrollInput,
        only: Option<&HashSet<&str>>,
    ) -> PayrollResult<RunReport> {
        let table = self.tax_tables.active_table(period.as_of_date())?;

        let mut skipped = Vec::new();
        let mut in_scope = Vec::new();
        for employee in &input.employees {
            if only.is_some_and(|ids| !ids.contains(employee.id.as_str())) {
                continue;
            }
            if employee.lifecycle_status != LifecycleStatus::Active {
                debug!(employee = %employee.id, status = ?employee.lifecycle_status, "skipping inactive employee");
                skipped.push(employee.id.clone());
                continue;
            }
            in_scope.push(employee);
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for employee in &in_scope {
            *seen.entry(employee.id.as_str()).or_default() += 1;
        }

        info!(
            period = %period_id,
            tax_table = %table.version,
            method = self.calculator.method(),
            employees = in_scope.len(),
            "calculating payroll"
        );

        let compute = || -> Vec<EmployeeOutcome> {
            in_scope
                .par_iter()
                .map(|employee| {
                    let result = if seen.get(employee.id.as_str()).copied().unwrap_or(0) > 1 {
                        Err(CalculationError::InvalidEmployee {
                            reason: "employee id appears more than once in the run".into(),
                        })
                    } else {
                        self.calculate_employee(employee, input, period_id, period, &table)
                    };
                    match result {
                        Ok(item) => EmployeeOutcome::Calculated(item),
                        Err(error) => {
                            warn!(period = %period_id, employee = %employee.id, %error, "line item failed");
                            EmployeeOutcome::Failed(LineItemError {
                                employee_id: employee.id.clone(),
                                error,
                            })
                        }
                    }
                })
                .collect()
        };
        let outcomes = match &self.pool {
            Some(pool) => pool.install(compute),
            None => compute(),
        };

        let report = RunReport {
            period_id: period_id.to_string(),
            tax_table_version: table.version.clone(),
            outcomes,
            skipped,
        };
        info!(
            period = %period_id,
            calculated = report.line_items().count(),
            failed = report.errors().count(),
            skipped = report.skipped.len(),
            "payroll calculation finished"
        );
        Ok(report)
    }

    /// Runs aggregation, BPJS and PPh 21 for one employee.
    pub fn calculate_employee(
        &self,
        employee: &Employee,
        input: &PayrollInput,
        period_id: &str,
        period: &PeriodKey,
        table: &TaxTableVersion,
    ) -> CalculationResult<PayrollLineItem> {
        validate_employee(employee)?;

        let components = input
            .components
            .get(&employee.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let variable = input
            .variable_inputs
            .get(&employee.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let gross = aggregate(components, variable, period)?;

        let base = match table.bpjs.contribution_base {
            ContributionBase::GrossPay => gross.gross_total,
            ContributionBase::FixedPay => gross.fixed_pay(),
        };
        let bpjs = compute_bpjs(base, employee.bpjs, table)?;

        let withholding = self.calculator.calculate(
            gross.gross_total,
            bpjs.tax_deductible_employee(),
            employee.ptkp_status,
            table,
        )?;

        let net_pay = gross
            .gross_total
            .checked_sub(bpjs.employee_total())
            .and_then(|net| net.checked_sub(withholding.monthly_withholding))
            .ok_or_else(|| CalculationError::InvalidComponent {
                component: "net pay".to_string(),
                reason: "deductions overflow gross pay".to_string(),
            })?;
        Ok(PayrollLineItem {
            employee_id: employee.id.clone(),
            period_id: period_id.to_string(),
            tax_table_version: table.version.clone(),
            gross,
            bpjs,
            withholding,
            net_pay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalculationError, PayrollError};
    use crate::models::{
        BpjsEnrollment, ComponentType, EmploymentStatus, PtkpStatus, SalaryComponent, VariableInput, VariableKind,
    };
    use crate::period::PeriodState;
    use crate::tax::tests::sample_table;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn engine() -> PayrollEngine {
        let table = sample_table("ID-2024", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        PayrollEngine::new(TaxTableProvider::new(vec![table]).unwrap())
    }

    fn employee(id: &str, ptkp_status: PtkpStatus, bpjs: BpjsEnrollment) -> Employee {
        Employee {
            id: id.into(),
            full_name: format!("Karyawan {}", id),
            nik: "3174012345678901".into(),
            npwp: None,
            employment_status: EmploymentStatus::Permanent,
            lifecycle_status: LifecycleStatus::Active,
            ptkp_status,
            bpjs,
        }
    }

    fn basic(amount: Decimal) -> Vec<SalaryComponent> {
        vec![SalaryComponent {
            name: "Gaji Pokok".into(),
            component_type: ComponentType::BasicSalary,
            amount,
            active: true,
            effective_from: None,
            deactivated_on: None,
        }]
    }

    fn input() -> PayrollInput {
        let enrolled = BpjsEnrollment { health: true, manpower: true };
        let mut input = PayrollInput {
            employees: vec![
                employee("E1", PtkpStatus::Tk0, BpjsEnrollment::default()),
                employee("E2", PtkpStatus::K2, enrolled),
                employee("E3", PtkpStatus::K0, enrolled),
            ],
            ..PayrollInput::default()
        };
        input.components.insert("E1".into(), basic(dec!(10_000_000)));
        input.components.insert("E2".into(), basic(dec!(18_000_000)));
        input.components.insert("E3".into(), basic(dec!(6_500_000)));
        input.variable_inputs.insert(
            "E3".into(),
            vec![VariableInput { kind: VariableKind::Overtime, description: "Lembur".into(), amount: dec!(420_000) }],
        );
        input
    }

    #[test]
    fn net_pay_identity_holds_for_every_line_item() {
        let engine = engine();
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2024, 3).unwrap());
        let report = engine.run(&period, &input()).unwrap();
        assert_eq!(report.line_items().count(), 3);
        for item in report.line_items() {
            assert_eq!(item.net_pay, item.gross_pay() - item.bpjs.employee_total() - item.pph21());
            assert_eq!(item.tax_table_version, "ID-2024");
        }
        assert_eq!(period.state(), PeriodState::Draft);
        assert_eq!(period.line_items().len(), 3);
    }

    #[test]
    fn unenrolled_single_employee_matches_hand_calculation() {
        let engine = engine();
        let period = PeriodKey::new("acme", 2024, 3).unwrap();
        let input = input();
        let table = engine.tax_tables().active_table(period.as_of_date()).unwrap();
        let item = engine
            .calculate_employee(&input.employees[0], &input, "p", &period, &table)
            .unwrap();
        assert_eq!(item.bpjs.employee_total(), Decimal::ZERO);
        assert_eq!(item.withholding.monthly_withholding, dec!(250_000));
        assert_eq!(item.net_pay, dec!(9_750_000));
    }

    #[test]
    fn recalculation_is_deterministic() {
        let engine = engine();
        let period = PeriodKey::new("acme", 2024, 3).unwrap();
        let first = engine.calculate("p", &period, &input(), None).unwrap();
        let second = engine.calculate("p", &period, &input(), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn dedicated_pool_gives_same_results() {
        let pooled = engine().with_thread_pool(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let period = PeriodKey::new("acme", 2024, 3).unwrap();
        assert_eq!(
            pooled.calculate("p", &period, &input(), None).unwrap(),
            engine().calculate("p", &period, &input(), None).unwrap()
        );
    }

    #[test]
    fn one_bad_employee_does_not_abort_the_run() {
        let engine = engine();
        let mut input = input();
        input.employees[1].nik = "1234".into();
        input.components.insert("E3".into(), {
            let mut c = basic(dec!(6_500_000));
            c[0].amount = dec!(-1);
            c
        });
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2024, 3).unwrap());
        let report = engine.run(&period, &input).unwrap();
        assert_eq!(report.line_items().count(), 1);
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0].error, CalculationError::InvalidEmployee { .. }));
        assert!(matches!(errors[1].error, CalculationError::InvalidComponent { .. }));
        assert_eq!(period.error_count(), 2);
        assert!(matches!(period.finalize(), Err(PayrollError::OutstandingErrors { count: 2, .. })));
    }

    #[test]
    fn oversized_salary_fails_only_that_employee() {
        let engine = engine();
        let mut input = input();
        input.components.insert("E2".into(), basic(Decimal::MAX));
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2024, 3).unwrap());
        let report = engine.run(&period, &input).unwrap();
        let calculated: Vec<_> = report.line_items().map(|item| item.employee_id.as_str()).collect();
        assert_eq!(calculated, vec!["E1", "E3"]);
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].employee_id, "E2");
        assert!(matches!(errors[0].error, CalculationError::InvalidComponent { .. }));
        assert_eq!(period.error_count(), 1);
    }

    #[test]
    fn unknown_ptkp_status_is_isolated_to_the_employee() {
        let mut table = sample_table("ID-2024", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        table.ptkp.retain(|entry| entry.status != PtkpStatus::K2);
        let engine = PayrollEngine::new(TaxTableProvider::new(vec![table]).unwrap());
        let report = engine
            .calculate("p", &PeriodKey::new("acme", 2024, 3).unwrap(), &input(), None)
            .unwrap();
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].employee_id, "E2");
        assert!(matches!(errors[0].error, CalculationError::UnknownPtkpStatus { .. }));
    }

    #[test]
    fn missing_tax_table_aborts_before_any_result() {
        let engine = engine();
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2023, 12).unwrap());
        let err = engine.run(&period, &input()).unwrap_err();
        assert!(err.is_configuration());
        assert!(period.line_items().is_empty());
        assert_eq!(period.state(), PeriodState::Draft);
        assert!(matches!(period.finalize(), Err(PayrollError::NotCalculated { .. })));
    }

    #[test]
    fn inactive_employees_are_skipped() {
        let engine = engine();
        let mut input = input();
        input.employees[2].lifecycle_status = LifecycleStatus::Resigned;
        let report = engine
            .calculate("p", &PeriodKey::new("acme", 2024, 3).unwrap(), &input, None)
            .unwrap();
        assert_eq!(report.skipped, vec!["E3".to_string()]);
        assert_eq!(report.outcomes.len(), 2);
    }

    #[test]
    fn duplicate_employee_ids_fail_both_rows() {
        let engine = engine();
        let mut input = input();
        let copy = input.employees[0].clone();
        input.employees.push(copy);
        let report = engine
            .calculate("p", &PeriodKey::new("acme", 2024, 3).unwrap(), &input, None)
            .unwrap();
        assert_eq!(report.errors().filter(|e| e.employee_id == "E1").count(), 2);
    }

    #[test]
    fn fixing_one_employee_clears_its_error() {
        let engine = engine();
        let mut input = input();
        input.employees[1].nik = "1234".into();
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2024, 3).unwrap());
        engine.run(&period, &input).unwrap();
        assert_eq!(period.error_count(), 1);
        let before_e1 = period.line_item("E1").unwrap();

        input.employees[1].nik = "3174019876543210".into();
        let report = engine.run_employees(&period, &input, &["E2".to_string()]).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(period.error_count(), 0);
        assert_eq!(period.line_items().len(), 3);
        assert_eq!(period.line_item("E1").unwrap(), before_e1);
        assert!(period.finalize().is_ok());
    }

    #[test]
    fn partial_run_on_uncalculated_period_is_rejected() {
        let engine = engine();
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2024, 3).unwrap());
        let err = engine.run_employees(&period, &input(), &["E1".to_string()]).unwrap_err();
        assert!(matches!(err, PayrollError::NotCalculated { .. }));
        assert!(period.line_items().is_empty());
        assert!(matches!(period.finalize(), Err(PayrollError::NotCalculated { .. })));

        engine.run(&period, &input()).unwrap();
        assert!(engine.run_employees(&period, &input(), &["E1".to_string()]).is_ok());
        assert_eq!(period.line_items().len(), 3);
    }

    #[test]
    fn finalized_period_cannot_be_recalculated() {
        let engine = engine();
        let period = PayrollPeriod::new("p", PeriodKey::new("acme", 2024, 3).unwrap());
        engine.run(&period, &input()).unwrap();
        period.finalize().unwrap();
        let before = period.line_items();
        assert!(matches!(engine.run(&period, &input()), Err(PayrollError::AlreadyFinalized { .. })));
        assert!(matches!(period.finalize(), Err(PayrollError::AlreadyFinalized { .. })));
        assert_eq!(period.line_items(), before);
        assert_eq!(period.state(), PeriodState::Finalized);
    }

    #[test]
    fn fixed_pay_base_ignores_variable_earnings() {
        let mut table = sample_table("ID-2024", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        table.bpjs.contribution_base = ContributionBase::FixedPay;
        let engine = PayrollEngine::new(TaxTableProvider::new(vec![table]).unwrap());
        let period = PeriodKey::new("acme", 2024, 3).unwrap();
        let input = input();
        let table = engine.tax_tables().active_table(period.as_of_date()).unwrap();
        let item = engine
            .calculate_employee(&input.employees[2], &input, "p", &period, &table)
            .unwrap();
        assert_eq!(item.gross_pay(), dec!(6_920_000));
        assert_eq!(item.bpjs.health_employee, dec!(65_000));
    }
}
