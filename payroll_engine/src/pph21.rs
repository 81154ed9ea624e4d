//! PPh 21 withholding.
//!
//! The `pph21` module defines the [`WithholdingCalculator`] trait and
//! its standard implementation, which annualises a month's net income,
//! subtracts the PTKP allowance and applies the progressive bracket
//! table.  All constants are read from the supplied
//! [`TaxTableVersion`].

use crate::error::{CalculationError, CalculationResult};
use crate::models::{whole_rupiah, PtkpStatus, Withholding};
use crate::tax::{TaxBracket, TaxTableVersion};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const MONTHS_PER_YEAR: Decimal = dec!(12);

/// A withholding calculator determines the monthly PPh 21 for one
/// employee.
///
/// Calculators must be thread‑safe (`Send + Sync`) because the engine
/// invokes them concurrently across the employees of a run.
pub trait WithholdingCalculator: Send + Sync {
    /// Short name of the method, for logs.
    fn method(&self) -> &str;

    /// `bpjs_deduction` is the employee's tax-deductible BPJS share for
    /// the month.
    fn calculate(
        &self,
        gross_pay: Decimal,
        bpjs_deduction: Decimal,
        ptkp_status: PtkpStatus,
        table: &TaxTableVersion,
    ) -> CalculationResult<Withholding>;
}

/// Simple annualisation: the month is assumed to repeat twelve times.
/// Mid-year joiners are not prorated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnualizedCalculator;

impl WithholdingCalculator for AnnualizedCalculator {
    fn method(&self) -> &str {
        "annualized"
    }

    fn calculate(
        &self,
        gross_pay: Decimal,
        bpjs_deduction: Decimal,
        ptkp_status: PtkpStatus,
        table: &TaxTableVersion,
    ) -> CalculationResult<Withholding> {
        compute_withholding(gross_pay, bpjs_deduction, ptkp_status, table)
    }
}

pub fn compute_withholding(
    gross_pay: Decimal,
    bpjs_deduction: Decimal,
    ptkp_status: PtkpStatus,
    table: &TaxTableVersion,
) -> CalculationResult<Withholding> {
    let ptkp = table
        .ptkp_allowance(ptkp_status)
        .ok_or_else(|| CalculationError::UnknownPtkpStatus {
            status: ptkp_status.to_string(),
            table_version: table.version.clone(),
        })?;

    let rule = &table.occupational_cost;
    let occupational_cost = gross_pay
        .checked_mul(rule.rate)
        .map(|cost| whole_rupiah(cost.min(rule.monthly_cap)))
        .ok_or_else(|| overflow(gross_pay))?;

    let annualized = gross_pay
        .checked_sub(occupational_cost)
        .and_then(|net| net.checked_sub(bpjs_deduction))
        .and_then(|net_monthly| net_monthly.checked_mul(MONTHS_PER_YEAR))
        .ok_or_else(|| overflow(gross_pay))?;

    let annual_taxable_income = annualized
        .checked_sub(ptkp)
        .and_then(|taxable| round_down_to(taxable.max(Decimal::ZERO), table.taxable_rounding_unit))
        .ok_or_else(|| overflow(gross_pay))?;
    let annual_tax = progressive_tax(annual_taxable_income, &table.brackets);
    let monthly_withholding = whole_rupiah(annual_tax / MONTHS_PER_YEAR);

    Ok(Withholding {
        occupational_cost,
        annual_taxable_income,
        annual_tax,
        monthly_withholding,
    })
}

/// Tax on `taxable` under ascending, contiguous brackets, in whole
/// rupiah.
pub fn progressive_tax(taxable: Decimal, brackets: &[TaxBracket]) -> Decimal {
    if taxable <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut tax = Decimal::ZERO;
    for bracket in brackets {
        if taxable <= bracket.lower {
            break;
        }
        let top = match bracket.upper {
            Some(upper) => taxable.min(upper),
            None => taxable,
        };
        tax += (top - bracket.lower) * bracket.rate;
    }
    whole_rupiah(tax)
}

fn round_down_to(amount: Decimal, unit: Decimal) -> Option<Decimal> {
    amount.checked_div(unit)?.floor().checked_mul(unit)
}

fn overflow(gross_pay: Decimal) -> CalculationError {
    CalculationError::InvalidComponent {
        component: "gross pay".to_string(),
        reason: format!("{} is too large to annualize", gross_pay),
    }
}
