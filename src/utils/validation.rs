//! Validation utilities

use crate::types::*;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        Err(LedgerError::Validation(format!(
            "Amount must be positive, got {}",
            amount
        )))
    } else {
        Ok(())
    }
}

/// Validate that a transfer moves money between two different accounts
pub fn validate_distinct_accounts(from: AccountId, to: AccountId) -> LedgerResult<()> {
    if from == to {
        return Err(LedgerError::Validation(format!(
            "Cannot transfer from account {} to itself",
            from
        )));
    }

    Ok(())
}

/// Validate transfer parameters before any transaction is opened
pub fn validate_transfer_params(params: &TransferTxParams) -> LedgerResult<()> {
    validate_positive_amount(params.amount)?;
    validate_distinct_accounts(params.from_account_id, params.to_account_id)
}

/// Validate the parameters of a new account
pub fn validate_account_params(params: &CreateAccountParams) -> LedgerResult<()> {
    if params.owner.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account owner cannot be empty".to_string(),
        ));
    }

    if params.owner.len() > 100 {
        return Err(LedgerError::Validation(
            "Account owner cannot exceed 100 characters".to_string(),
        ));
    }

    // ISO 4217 style: three ASCII uppercase letters
    if params.currency.len() != 3 || !params.currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(LedgerError::Validation(format!(
            "Invalid currency code '{}'",
            params.currency
        )));
    }

    Ok(())
}
