//! BPJS contribution calculation.
//!
//! Every program in the tax table is applied to the contribution base
//! capped at that program's ceiling.  Programs belonging to a scheme
//! the employee is not enrolled in contribute nothing.

use crate::error::{CalculationError, CalculationResult};
use crate::models::{whole_rupiah, BpjsContributions, BpjsEnrollment, BpjsScheme, ProgramContribution};
use crate::tax::TaxTableVersion;
use rust_decimal::Decimal;

pub fn compute_bpjs(
    gross_base: Decimal,
    enrollment: BpjsEnrollment,
    table: &TaxTableVersion,
) -> CalculationResult<BpjsContributions> {
    let mut result = BpjsContributions::default();
    let gross_base = gross_base.max(Decimal::ZERO);

    for program in &table.bpjs.programs {
        let enrolled = match program.scheme {
            BpjsScheme::Health => enrollment.health,
            BpjsScheme::Manpower => enrollment.manpower,
        };
        if !enrolled {
            continue;
        }
        let base = match program.cap {
            Some(cap) => gross_base.min(cap),
            None => gross_base,
        };
        let employee = share(base, program.employee_rate, &program.code)?;
        let employer = share(base, program.employer_rate, &program.code)?;
        let (employee_total, employer_total) = match program.scheme {
            BpjsScheme::Health => (&mut result.health_employee, &mut result.health_employer),
            BpjsScheme::Manpower => (&mut result.manpower_employee, &mut result.manpower_employer),
        };
        *employee_total = add(*employee_total, employee, &program.code)?;
        *employer_total = add(*employer_total, employer, &program.code)?;
        result.programs.push(ProgramContribution {
            program: program.code.clone(),
            scheme: program.scheme,
            base,
            employee,
            employer,
            tax_deductible: program.tax_deductible,
        });
    }
    add(result.health_employee, result.manpower_employee, "employee contributions")?;
    add(result.health_employer, result.manpower_employer, "employer contributions")?;
    Ok(result)
}

fn share(base: Decimal, rate: Decimal, program: &str) -> CalculationResult<Decimal> {
    base.checked_mul(rate)
        .map(whole_rupiah)
        .ok_or_else(|| overflow(program))
}

fn add(total: Decimal, amount: Decimal, program: &str) -> CalculationResult<Decimal> {
    total.checked_add(amount).ok_or_else(|| overflow(program))
}

fn overflow(program: &str) -> CalculationError {
    CalculationError::InvalidComponent {
        component: program.to_string(),
        reason: "BPJS contribution overflows".to_string(),
    }
}
