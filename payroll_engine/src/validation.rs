//! Format checks for Indonesian identity numbers on employee records.

use crate::error::CalculationError;
use crate::models::Employee;

const NIK_LENGTH: usize = 16;
const NPWP_LENGTH: usize = 15;

/// A NIK is 16 digits and never a single repeated digit.
pub fn validate_nik(nik: &str) -> Result<(), String> {
    let nik = nik.trim();
    if nik.len() != NIK_LENGTH || !nik.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("NIK must be exactly {NIK_LENGTH} digits"));
    }
    let first = nik.as_bytes()[0];
    if nik.bytes().all(|b| b == first) {
        return Err("NIK cannot consist of one repeated digit".to_string());
    }
    Ok(())
}

/// An NPWP is 15 digits.  The dotted `XX.XXX.XXX.X-XXX.XXX` rendering
/// is accepted.
pub fn validate_npwp(npwp: &str) -> Result<(), String> {
    let mut digits = 0;
    for c in npwp.trim().chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' | '-' => {}
            _ => return Err(format!("NPWP contains invalid character `{c}`")),
        }
    }
    if digits != NPWP_LENGTH {
        return Err(format!("NPWP must have exactly {NPWP_LENGTH} digits"));
    }
    Ok(())
}

pub fn validate_employee(employee: &Employee) -> Result<(), CalculationError> {
    let invalid = |reason: String| CalculationError::InvalidEmployee { reason };
    validate_nik(&employee.nik).map_err(invalid)?;
    if let Some(npwp) = employee.npwp.as_deref() {
        validate_npwp(npwp).map_err(invalid)?;
    }
    Ok(())
}
