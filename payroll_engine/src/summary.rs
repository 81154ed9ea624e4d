//! Period-level totals for reporting layers.
//!
//! The surrounding application renders bank transfer files, tax
//! summaries and BPJS contribution reports from these figures; the
//! engine only supplies the structured numbers.

use crate::models::{BpjsScheme, PeriodKey};
use crate::period::{PeriodInner, PeriodState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period_id: String,
    pub scope: String,
    pub year: i32,
    pub month: u32,
    pub state: PeriodState,
    pub tax_table_version: Option<String>,
    pub employees_calculated: usize,
    pub error_count: usize,
    /// Whether [`crate::period::PayrollPeriod::finalize`] would be
    /// accepted right now.
    pub can_finalize: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub totals: PayrollTotals,
    /// Ordered by program code.
    pub bpjs_programs: Vec<ProgramTotal>,
}

/// Sums over every calculated line item, saturating at `Decimal::MAX`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollTotals {
    pub gross_pay: Decimal,
    pub bpjs_employee: Decimal,
    pub bpjs_employer: Decimal,
    pub pph21: Decimal,
    pub net_pay: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramTotal {
    pub program: String,
    pub scheme: BpjsScheme,
    pub participants: usize,
    pub employee: Decimal,
    pub employer: Decimal,
}

impl PeriodSummary {
    pub(crate) fn build(period_id: &str, key: &PeriodKey, inner: &PeriodInner) -> Self {
        let mut totals = PayrollTotals::default();
        let mut programs: BTreeMap<&str, ProgramTotal> = BTreeMap::new();

        for item in inner.line_items.values() {
            totals.gross_pay = totals.gross_pay.saturating_add(item.gross_pay());
            totals.bpjs_employee = totals.bpjs_employee.saturating_add(item.bpjs.employee_total());
            totals.bpjs_employer = totals.bpjs_employer.saturating_add(item.bpjs.employer_total());
            totals.pph21 = totals.pph21.saturating_add(item.pph21());
            totals.net_pay = totals.net_pay.saturating_add(item.net_pay);
            for contribution in &item.bpjs.programs {
                let total = programs
                    .entry(contribution.program.as_str())
                    .or_insert_with(|| ProgramTotal {
                        program: contribution.program.clone(),
                        scheme: contribution.scheme,
                        participants: 0,
                        employee: Decimal::ZERO,
                        employer: Decimal::ZERO,
                    });
                total.participants += 1;
                total.employee = total.employee.saturating_add(contribution.employee);
                total.employer = total.employer.saturating_add(contribution.employer);
            }
        }

        PeriodSummary {
            period_id: period_id.to_string(),
            scope: key.scope().to_string(),
            year: key.year(),
            month: key.month(),
            state: inner.state,
            tax_table_version: inner.tax_table_version.clone(),
            employees_calculated: inner.line_items.len(),
            error_count: inner.errors.len(),
            can_finalize: inner.state == PeriodState::Draft && inner.calculated && inner.errors.is_empty(),
            finalized_at: inner.finalized_at,
            totals,
            bpjs_programs: programs.into_values().collect(),
        }
    }
}
