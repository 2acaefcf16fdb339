//! Field validators shared by request types.

use rust_decimal::Decimal;
use validator::ValidationError;

use crate::services::totals::MAX_MONEY;

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(error("blank", "must not be blank"));
    }
    Ok(())
}

pub fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(error("negative", "must not be negative"));
    }
    Ok(())
}

/// Non-negative and within the money column range.
pub fn money_amount(value: &Decimal) -> Result<(), ValidationError> {
    non_negative(value)?;
    if *value > MAX_MONEY {
        return Err(error("too_large", "exceeds the maximum amount"));
    }
    Ok(())
}

pub fn percentage(value: &Decimal) -> Result<(), ValidationError> {
    non_negative(value)?;
    if *value > Decimal::ONE_HUNDRED {
        return Err(error("percentage", "must be between 0 and 100"));
    }
    Ok(())
}
