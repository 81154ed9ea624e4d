//! Versioned tax tables.
//!
//! A [`TaxTableVersion`] is an immutable snapshot of every statutory
//! constant the engine needs: PTKP allowances, PPh 21 brackets, the
//! occupational-cost rule and the BPJS programs.  Versions are stored
//! externally as JSON files and collected into a [`TaxTableProvider`],
//! which answers "which table applies on this date".  Nothing in the
//! engine hard-codes a rate; updating the law means adding a file.

use crate::error::{PayrollError, PayrollResult};
use crate::models::{BpjsScheme, PtkpStatus};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxTableVersion {
    /// Version label, e.g. `"ID-2024"`.  Recorded on every line item.
    pub version: String,
    /// First date this version applies to.  It stays active until the
    /// next version's `effective_from`.
    pub effective_from: NaiveDate,
    pub ptkp: Vec<PtkpAllowance>,
    /// Annual PPh 21 brackets in ascending order.
    pub brackets: Vec<TaxBracket>,
    pub occupational_cost: OccupationalCostRule,
    /// Annual taxable income is rounded down to a multiple of this.
    pub taxable_rounding_unit: Decimal,
    pub bpjs: BpjsTable,
}

/// Annual non-taxable allowance for one PTKP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtkpAllowance {
    pub status: PtkpStatus,
    pub amount: Decimal,
}

/// Taxable income in `[lower, upper)` is taxed at `rate`.  The last
/// bracket has no upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBracket {
    pub lower: Decimal,
    #[serde(default)]
    pub upper: Option<Decimal>,
    pub rate: Decimal,
}

/// `min(rate * gross, monthly_cap)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupationalCostRule {
    pub rate: Decimal,
    pub monthly_cap: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpjsTable {
    #[serde(default)]
    pub contribution_base: ContributionBase,
    pub programs: Vec<BpjsProgram>,
}

/// Which salary figure BPJS rates are applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionBase {
    #[default]
    GrossPay,
    /// Basic salary plus fixed allowances.
    FixedPay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpjsProgram {
    /// Short program code such as `"JHT"` or `"KESEHATAN"`.
    pub code: String,
    pub scheme: BpjsScheme,
    pub employee_rate: Decimal,
    pub employer_rate: Decimal,
    /// Monthly salary ceiling for the contribution base.
    #[serde(default)]
    pub cap: Option<Decimal>,
    /// Whether the employee share reduces PPh 21 taxable income.
    #[serde(default = "default_tax_deductible")]
    pub tax_deductible: bool,
}

fn default_tax_deductible() -> bool {
    true
}

impl TaxTableVersion {
    pub fn ptkp_allowance(&self, status: PtkpStatus) -> Option<Decimal> {
        self.ptkp
            .iter()
            .find(|entry| entry.status == status)
            .map(|entry| entry.amount)
    }

    /// Checks the internal consistency of the table.
    pub fn validate(&self) -> PayrollResult<()> {
        let fail = |msg: String| {
            Err(PayrollError::Configuration(format!(
                "tax table {}: {}",
                self.version, msg
            )))
        };
        let is_rate = |r: Decimal| r >= Decimal::ZERO && r <= Decimal::ONE;

        if self.version.trim().is_empty() {
            return fail("version label is empty".into());
        }

        let mut seen = HashSet::new();
        for entry in &self.ptkp {
            if !seen.insert(entry.status) {
                return fail(format!("PTKP status {} listed twice", entry.status));
            }
            if entry.amount < Decimal::ZERO {
                return fail(format!("PTKP allowance for {} is negative", entry.status));
            }
        }

        if self.brackets.is_empty() {
            return fail("no tax brackets".into());
        }
        let mut expected_lower = Decimal::ZERO;
        for (i, bracket) in self.brackets.iter().enumerate() {
            if bracket.lower != expected_lower {
                return fail(format!(
                    "bracket {} starts at {} but must start at {}",
                    i, bracket.lower, expected_lower
                ));
            }
            if !is_rate(bracket.rate) {
                return fail(format!("bracket {} rate {} is outside [0, 1]", i, bracket.rate));
            }
            let last = i + 1 == self.brackets.len();
            match (bracket.upper, last) {
                (Some(upper), false) if upper > bracket.lower => expected_lower = upper,
                (Some(_), false) => {
                    return fail(format!("bracket {} upper bound is not above its lower bound", i))
                }
                (None, false) => return fail(format!("bracket {} is open-ended but not last", i)),
                (Some(_), true) => return fail("last bracket must be open-ended".into()),
                (None, true) => {}
            }
        }

        if !is_rate(self.occupational_cost.rate) {
            return fail("occupational cost rate is outside [0, 1]".into());
        }
        if self.occupational_cost.monthly_cap < Decimal::ZERO {
            return fail("occupational cost cap is negative".into());
        }
        if self.taxable_rounding_unit <= Decimal::ZERO {
            return fail("taxable income rounding unit must be positive".into());
        }

        let mut codes = HashSet::new();
        for program in &self.bpjs.programs {
            if !codes.insert(program.code.as_str()) {
                return fail(format!("BPJS program {} listed twice", program.code));
            }
            if !is_rate(program.employee_rate) || !is_rate(program.employer_rate) {
                return fail(format!("BPJS program {} has a rate outside [0, 1]", program.code));
            }
            if matches!(program.cap, Some(cap) if cap <= Decimal::ZERO) {
                return fail(format!("BPJS program {} cap must be positive", program.code));
            }
        }
        Ok(())
    }
}

/// Date-indexed collection of tax table versions.
///
/// The provider is read-only once built; a payroll run takes one
/// `Arc<TaxTableVersion>` from it and uses that snapshot for every
/// employee.
#[derive(Debug, Clone, Default)]
pub struct TaxTableProvider {
    versions: BTreeMap<NaiveDate, Arc<TaxTableVersion>>,
}

impl TaxTableProvider {
    pub fn new(tables: impl IntoIterator<Item = TaxTableVersion>) -> PayrollResult<Self> {
        let mut versions: BTreeMap<NaiveDate, Arc<TaxTableVersion>> = BTreeMap::new();
        for table in tables {
            table.validate()?;
            let date = table.effective_from;
            if let Some(existing) = versions.get(&date) {
                return Err(PayrollError::Configuration(format!(
                    "tax tables {} and {} are both effective from {}",
                    existing.version, table.version, date
                )));
            }
            debug!(version = %table.version, effective_from = %date, "registered tax table");
            versions.insert(date, Arc::new(table));
        }
        Ok(TaxTableProvider { versions })
    }

    /// Returns the version in force on `as_of`: the one with the latest
    /// `effective_from` not after that date.
    pub fn active_table(&self, as_of: NaiveDate) -> PayrollResult<Arc<TaxTableVersion>> {
        self.versions
            .range(..=as_of)
            .next_back()
            .map(|(_, table)| Arc::clone(table))
            .ok_or(PayrollError::NoActiveTaxTable { date: as_of })
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Load all tax table versions from a directory.
///
/// Every `.json` file in `path` must parse as a [`TaxTableVersion`];
/// a malformed file is an error rather than being skipped, since a
/// missing version would silently change which table applies.
pub fn load_tax_tables_from_dir(path: &Path) -> Result<TaxTableProvider> {
    let mut tables = Vec::new();
    let entries = std::fs::read_dir(path)
        .with_context(|| format!("reading tax table directory {}", path.display()))?;
    for entry in entries {
        let entry = entry?;
        let file = entry.path();
        if !entry.file_type()?.is_file() || file.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let data = std::fs::read_to_string(&file)
            .with_context(|| format!("reading tax table {}", file.display()))?;
        let table: TaxTableVersion = serde_json::from_str(&data)
            .with_context(|| format!("parsing tax table {}", file.display()))?;
        tables.push(table);
    }
    let provider = TaxTableProvider::new(tables)?;
    info!(
        dir = %path.display(),
        versions = provider.len(),
        "loaded tax tables"
    );
    Ok(provider)
}
