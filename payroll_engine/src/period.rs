//! Payroll period lifecycle.
//!
//! A [`PayrollPeriod`] moves `Draft -> Calculating -> Draft` each time
//! it is recalculated and `Draft -> Finalized` exactly once.  Its state
//! and line items live behind a mutex so concurrent finalize attempts
//! serialise: one wins, the rest see [`PayrollError::AlreadyFinalized`].
//! The [`PeriodRegistry`] keeps at most one live period per month per
//! organisation scope.

use crate::engine::{EmployeeOutcome, RunReport};
use crate::error::{LineItemError, PayrollError, PayrollResult};
use crate::models::{PayrollLineItem, PeriodKey};
use crate::summary::PeriodSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodState {
    Draft,
    Calculating,
    Finalized,
    /// Retired draft, replaced by a newer period for the same month.
    Superseded,
}

#[derive(Debug)]
pub struct PayrollPeriod {
    id: String,
    key: PeriodKey,
    inner: Mutex<PeriodInner>,
}

#[derive(Debug)]
pub(crate) struct PeriodInner {
    pub(crate) state: PeriodState,
    pub(crate) calculated: bool,
    pub(crate) tax_table_version: Option<String>,
    pub(crate) line_items: BTreeMap<String, PayrollLineItem>,
    pub(crate) errors: BTreeMap<String, LineItemError>,
    pub(crate) finalized_at: Option<DateTime<Utc>>,
}

impl PayrollPeriod {
    pub fn new(id: impl Into<String>, key: PeriodKey) -> Self {
        PayrollPeriod {
            id: id.into(),
            key,
            inner: Mutex::new(PeriodInner {
                state: PeriodState::Draft,
                calculated: false,
                tax_table_version: None,
                line_items: BTreeMap::new(),
                errors: BTreeMap::new(),
                finalized_at: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &PeriodKey {
        &self.key
    }

    pub fn state(&self) -> PeriodState {
        self.lock().state
    }

    pub fn tax_table_version(&self) -> Option<String> {
        self.lock().tax_table_version.clone()
    }

    /// Line items ordered by employee id.
    pub fn line_items(&self) -> Vec<PayrollLineItem> {
        self.lock().line_items.values().cloned().collect()
    }

    pub fn line_item(&self, employee_id: &str) -> Option<PayrollLineItem> {
        self.lock().line_items.get(employee_id).cloned()
    }

    /// Outstanding errors ordered by employee id.
    pub fn errors(&self) -> Vec<LineItemError> {
        self.lock().errors.values().cloned().collect()
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finalized_at
    }

    pub fn summary(&self) -> PeriodSummary {
        PeriodSummary::build(&self.id, &self.key, &self.lock())
    }

    /// Locks the period for good.  Requires a completed calculation
    /// with no outstanding errors.
    pub fn finalize(&self) -> PayrollResult<DateTime<Utc>> {
        let mut inner = self.lock();
        let period = self.id.clone();
        match inner.state {
            PeriodState::Finalized => return Err(PayrollError::AlreadyFinalized { period }),
            PeriodState::Calculating => return Err(PayrollError::CalculationInProgress { period }),
            PeriodState::Superseded => return Err(PayrollError::Superseded { period }),
            PeriodState::Draft => {}
        }
        if !inner.calculated {
            return Err(PayrollError::NotCalculated { period });
        }
        if !inner.errors.is_empty() {
            let count = inner.errors.len();
            warn!(period = %self.id, count, "finalize rejected: outstanding line item errors");
            return Err(PayrollError::OutstandingErrors { period, count });
        }
        let now = Utc::now();
        inner.state = PeriodState::Finalized;
        inner.finalized_at = Some(now);
        info!(period = %self.id, line_items = inner.line_items.len(), "payroll period finalized");
        Ok(now)
    }

    fn supersede(&self) -> PayrollResult<()> {
        let mut inner = self.lock();
        let period = self.id.clone();
        match inner.state {
            PeriodState::Draft => {
                inner.state = PeriodState::Superseded;
                Ok(())
            }
            PeriodState::Calculating => Err(PayrollError::CalculationInProgress { period }),
            PeriodState::Finalized => Err(PayrollError::AlreadyFinalized { period }),
            PeriodState::Superseded => Err(PayrollError::Superseded { period }),
        }
    }

    /// Moves the period into `Calculating`.  The returned guard puts it
    /// back into `Draft` when dropped, keeping the previous results
    /// unless [`CalculationGuard::commit`] was called.
    pub(crate) fn begin_calculation(&self) -> PayrollResult<CalculationGuard<'_>> {
        let mut inner = self.lock();
        let period = self.id.clone();
        match inner.state {
            PeriodState::Draft => {
                inner.state = PeriodState::Calculating;
                Ok(CalculationGuard { period: self })
            }
            PeriodState::Calculating => Err(PayrollError::CalculationInProgress { period }),
            PeriodState::Finalized => Err(PayrollError::AlreadyFinalized { period }),
            PeriodState::Superseded => Err(PayrollError::Superseded { period }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PeriodInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct CalculationGuard<'a> {
    period: &'a PayrollPeriod,
}

impl CalculationGuard<'_> {
    /// Stores a run's results.  `scope` limits the replacement to the
    /// listed employees; `None` replaces everything.
    pub(crate) fn commit(self, report: &RunReport, scope: Option<&[String]>) -> PayrollResult<()> {
        let mut inner = self.period.lock();
        match scope {
            None => {
                inner.line_items.clear();
                inner.errors.clear();
            }
            Some(ids) => {
                if !inner.calculated {
                    return Err(PayrollError::NotCalculated {
                        period: self.period.id.clone(),
                    });
                }
                if inner.tax_table_version.as_deref() != Some(report.tax_table_version.as_str())
                {
                    return Err(PayrollError::Configuration(format!(
                        "period {} was calculated with tax table {}, but {} is now active; recalculate the whole period",
                        self.period.id,
                        inner.tax_table_version.as_deref().unwrap_or("-"),
                        report.tax_table_version
                    )));
                }
                for id in ids {
                    inner.line_items.remove(id);
                    inner.errors.remove(id);
                }
            }
        }
        for outcome in &report.outcomes {
            match outcome {
                EmployeeOutcome::Calculated(item) => {
                    inner.errors.remove(&item.employee_id);
                    inner.line_items.insert(item.employee_id.clone(), item.clone());
                }
                EmployeeOutcome::Failed(error) => {
                    inner.line_items.remove(&error.employee_id);
                    inner.errors.insert(error.employee_id.clone(), error.clone());
                }
            }
        }
        inner.tax_table_version = Some(report.tax_table_version.clone());
        inner.calculated = true;
        Ok(())
    }
}

impl Drop for CalculationGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.period.lock();
        if inner.state == PeriodState::Calculating {
            inner.state = PeriodState::Draft;
        }
    }
}

/// The payroll periods of every organisation scope.
#[derive(Debug, Default)]
pub struct PeriodRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    periods: HashMap<String, Arc<PayrollPeriod>>,
    by_month: HashMap<(String, i32, u32), Vec<String>>,
}

impl PeriodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a draft period for the month.  Fails while another
    /// non-superseded period exists for the same month and scope.
    pub fn open(&self, scope: &str, year: i32, month: u32) -> PayrollResult<Arc<PayrollPeriod>> {
        let key = PeriodKey::new(scope, year, month)?;
        let mut registry = self.lock();
        let RegistryInner { periods, by_month } = &mut *registry;
        let ids = by_month.entry((scope.to_string(), year, month)).or_default();
        let live = ids
            .iter()
            .filter_map(|id| periods.get(id))
            .any(|p| p.state() != PeriodState::Superseded);
        if live {
            return Err(PayrollError::DuplicatePeriod {
                scope: scope.to_string(),
                year,
                month,
            });
        }
        let id = format!("{}#{}", key, ids.len() + 1);
        let period = Arc::new(PayrollPeriod::new(id.clone(), key));
        ids.push(id.clone());
        periods.insert(id.clone(), Arc::clone(&period));
        info!(period = %id, "opened payroll period");
        Ok(period)
    }

    pub fn get(&self, id: &str) -> PayrollResult<Arc<PayrollPeriod>> {
        self.lock()
            .periods
            .get(id)
            .cloned()
            .ok_or_else(|| PayrollError::PeriodNotFound(id.to_string()))
    }

    /// The live (non-superseded) period for the month, if any.
    pub fn current(&self, scope: &str, year: i32, month: u32) -> Option<Arc<PayrollPeriod>> {
        let registry = self.lock();
        registry
            .by_month
            .get(&(scope.to_string(), year, month))?
            .iter()
            .filter_map(|id| registry.periods.get(id))
            .find(|p| p.state() != PeriodState::Superseded)
            .cloned()
    }

    /// Retires a draft period so the month can be opened again.
    pub fn supersede(&self, id: &str) -> PayrollResult<()> {
        let period = self.get(id)?;
        period.supersede()?;
        info!(period = %id, "superseded payroll period");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(version: &str, outcomes: Vec<EmployeeOutcome>) -> RunReport {
        RunReport {
            period_id: "acme/2024-03#1".into(),
            tax_table_version: version.into(),
            outcomes,
            skipped: Vec::new(),
        }
    }

    fn failure(employee_id: &str) -> EmployeeOutcome {
        EmployeeOutcome::Failed(LineItemError {
            employee_id: employee_id.into(),
            error: crate::error::CalculationError::InvalidEmployee { reason: "bad NIK".into() },
        })
    }

    fn period() -> PayrollPeriod {
        PayrollPeriod::new("acme/2024-03#1", PeriodKey::new("acme", 2024, 3).unwrap())
    }

    #[test]
    fn cannot_finalize_before_calculation() {
        let p = period();
        assert!(matches!(p.finalize(), Err(PayrollError::NotCalculated { .. })));
        assert_eq!(p.state(), PeriodState::Draft);
    }

    #[test]
    fn finalize_twice_fails() {
        let p = period();
        p.begin_calculation().unwrap().commit(&report("ID-2024", vec![]), None).unwrap();
        assert!(p.finalize().is_ok());
        assert!(matches!(p.finalize(), Err(PayrollError::AlreadyFinalized { .. })));
        assert_eq!(p.state(), PeriodState::Finalized);
    }

    #[test]
    fn outstanding_errors_block_finalize() {
        let p = period();
        p.begin_calculation()
            .unwrap()
            .commit(&report("ID-2024", vec![failure("E1")]), None)
            .unwrap();
        assert_eq!(
            p.finalize(),
            Err(PayrollError::OutstandingErrors { period: p.id().to_string(), count: 1 })
        );
        assert_eq!(p.state(), PeriodState::Draft);
    }

    #[test]
    fn calculation_state_is_exclusive() {
        let p = period();
        let guard = p.begin_calculation().unwrap();
        assert_eq!(p.state(), PeriodState::Calculating);
        assert!(matches!(p.begin_calculation(), Err(PayrollError::CalculationInProgress { .. })));
        assert!(matches!(p.finalize(), Err(PayrollError::CalculationInProgress { .. })));
        drop(guard);
        assert_eq!(p.state(), PeriodState::Draft);
    }

    #[test]
    fn dropped_guard_keeps_previous_results() {
        let p = period();
        p.begin_calculation()
            .unwrap()
            .commit(&report("ID-2024", vec![failure("E1")]), None)
            .unwrap();
        drop(p.begin_calculation().unwrap());
        assert_eq!(p.error_count(), 1);
        assert_eq!(p.state(), PeriodState::Draft);
    }

    #[test]
    fn scoped_commit_rejects_tax_table_change() {
        let p = period();
        p.begin_calculation().unwrap().commit(&report("ID-2024", vec![]), None).unwrap();
        let scope = vec!["E1".to_string()];
        let err = p
            .begin_calculation()
            .unwrap()
            .commit(&report("ID-2025", vec![]), Some(scope.as_slice()))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(p.tax_table_version().as_deref(), Some("ID-2024"));
        assert_eq!(p.state(), PeriodState::Draft);
    }

    #[test]
    fn scoped_commit_requires_a_full_calculation_first() {
        let p = period();
        let scope = vec!["E1".to_string()];
        let err = p
            .begin_calculation()
            .unwrap()
            .commit(&report("ID-2024", vec![]), Some(scope.as_slice()))
            .unwrap_err();
        assert!(matches!(err, PayrollError::NotCalculated { .. }));
        assert!(p.line_items().is_empty());
        assert!(matches!(p.finalize(), Err(PayrollError::NotCalculated { .. })));
        assert_eq!(p.state(), PeriodState::Draft);
    }

    #[test]
    fn registry_allows_one_live_period_per_month() {
        let registry = PeriodRegistry::new();
        let first = registry.open("acme", 2024, 3).unwrap();
        assert!(matches!(
            registry.open("acme", 2024, 3),
            Err(PayrollError::DuplicatePeriod { .. })
        ));
        assert!(registry.open("other", 2024, 3).is_ok());
        assert!(registry.open("acme", 2024, 4).is_ok());

        registry.supersede(first.id()).unwrap();
        assert_eq!(first.state(), PeriodState::Superseded);
        assert!(registry.current("acme", 2024, 3).is_none());

        let second = registry.open("acme", 2024, 3).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.current("acme", 2024, 3).unwrap().id(), second.id());
        assert!(matches!(first.begin_calculation(), Err(PayrollError::Superseded { .. })));
    }

    #[test]
    fn finalized_period_cannot_be_superseded() {
        let registry = PeriodRegistry::new();
        let p = registry.open("acme", 2024, 3).unwrap();
        p.begin_calculation().unwrap().commit(&report("ID-2024", vec![]), None).unwrap();
        p.finalize().unwrap();
        assert!(matches!(
            registry.supersede(p.id()),
            Err(PayrollError::AlreadyFinalized { .. })
        ));
        assert!(matches!(
            registry.open("acme", 2024, 3),
            Err(PayrollError::DuplicatePeriod { .. })
        ));
    }

    #[test]
    fn registry_rejects_invalid_month_and_unknown_id() {
        let registry = PeriodRegistry::new();
        assert!(registry.open("acme", 2024, 13).unwrap_err().is_configuration());
        assert_eq!(
            registry.get("missing").unwrap_err(),
            PayrollError::PeriodNotFound("missing".into())
        );
    }
}
