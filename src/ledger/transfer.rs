//! Money transfer between two accounts

use futures::FutureExt;

use crate::config::OverdraftPolicy;
use crate::context::Context;
use crate::ledger::account::{add_money, lock_order, BalanceDelta};
use crate::ledger::core::Store;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_transfer_params;

/// Collects the output of each transfer step.
///
/// Lives inside the unit of work and is only turned into a
/// [`TransferTxResult`] after the transaction has committed, so a failed
/// transfer never exposes a half-filled result.
#[derive(Debug)]
pub struct TransferTxResultBuilder {
    params: TransferTxParams,
    transfer: Option<Transfer>,
    from_entry: Option<Entry>,
    to_entry: Option<Entry>,
    from_account: Option<Account>,
    to_account: Option<Account>,
}

impl TransferTxResultBuilder {
    pub fn new(params: TransferTxParams) -> Self {
        Self {
            params,
            transfer: None,
            from_entry: None,
            to_entry: None,
            from_account: None,
            to_account: None,
        }
    }

    pub fn record_transfer(&mut self, transfer: Transfer) -> &mut Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn record_from_entry(&mut self, entry: Entry) -> &mut Self {
        self.from_entry = Some(entry);
        self
    }

    pub fn record_to_entry(&mut self, entry: Entry) -> &mut Self {
        self.to_entry = Some(entry);
        self
    }

    /// Record an updated account, routed to its side by ID
    pub fn record_account(&mut self, account: Account) -> LedgerResult<&mut Self> {
        if account.id == self.params.from_account_id {
            self.from_account = Some(account);
        } else if account.id == self.params.to_account_id {
            self.to_account = Some(account);
        } else {
            return Err(LedgerError::Storage(format!(
                "Account {} is not part of transfer {} -> {}",
                account.id, self.params.from_account_id, self.params.to_account_id
            )));
        }
        Ok(self)
    }

    pub fn from_account(&self) -> Option<&Account> {
        self.from_account.as_ref()
    }

    /// Build the result; every step must have been recorded
    pub fn build(self) -> LedgerResult<TransferTxResult> {
        fn missing(what: &str) -> LedgerError {
            LedgerError::Storage(format!("Incomplete transfer result: missing {}", what))
        }

        Ok(TransferTxResult {
            transfer: self.transfer.ok_or_else(|| missing("transfer"))?,
            from_entry: self.from_entry.ok_or_else(|| missing("from entry"))?,
            to_entry: self.to_entry.ok_or_else(|| missing("to entry"))?,
            from_account: self.from_account.ok_or_else(|| missing("from account"))?,
            to_account: self.to_account.ok_or_else(|| missing("to account"))?,
        })
    }
}

/// Body of a transfer, run inside an open transaction
async fn transfer_steps(
    q: &mut dyn Queries,
    params: TransferTxParams,
    overdraft: OverdraftPolicy,
) -> LedgerResult<TransferTxResultBuilder> {
    let mut result = TransferTxResultBuilder::new(params);

    result.record_transfer(
        q.create_transfer(CreateTransferParams {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?,
    );

    result.record_from_entry(
        q.create_entry(CreateEntryParams {
            account_id: params.from_account_id,
            amount: -params.amount,
        })
        .await?,
    );

    result.record_to_entry(
        q.create_entry(CreateEntryParams {
            account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?,
    );

    // The sign follows the role, the order follows the ID.
    let [first, second] = lock_order([
        BalanceDelta::new(params.from_account_id, -params.amount),
        BalanceDelta::new(params.to_account_id, params.amount),
    ]);
    let (account1, account2) = add_money(q, first, second).await?;
    result.record_account(account1)?;
    result.record_account(account2)?;

    if overdraft == OverdraftPolicy::Reject {
        if let Some(from) = result.from_account().filter(|a| a.balance < 0) {
            return Err(LedgerError::InsufficientFunds {
                account_id: from.id,
                balance: from.balance,
            });
        }
    }

    Ok(result)
}

impl<S: LedgerStorage> Store<S> {
    /// Move `params.amount` from one account to another.
    ///
    /// Creates the transfer record and its two entries and updates both
    /// balances in a single transaction. Balances are updated in ascending
    /// account ID order (see [`lock_order`]) so concurrent transfers over the
    /// same accounts cannot deadlock, whichever direction they go.
    ///
    /// Rejects a non-positive amount or a transfer from an account to itself
    /// before opening a transaction. Under [`OverdraftPolicy::Reject`] a
    /// transfer that would leave the source negative is rolled back.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            from = params.from_account_id,
            to = params.to_account_id,
            amount = params.amount
        )
    )]
    pub async fn transfer_tx(
        &self,
        ctx: &Context,
        params: TransferTxParams,
    ) -> LedgerResult<TransferTxResult> {
        validate_transfer_params(&params)?;
        let overdraft = self.config().overdraft;

        let result = self
            .exec_tx(ctx, move |q| transfer_steps(q, params, overdraft).boxed())
            .await?
            .build()?;

        tracing::info!(
            transfer_id = result.transfer.id,
            from_balance = result.from_account.balance,
            to_balance = result.to_account.balance,
            "transfer committed"
        );
        Ok(result)
    }

    /// Transfer with a background context
    pub async fn transfer_money(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<TransferTxResult> {
        self.transfer_tx(
            &Context::background(),
            TransferTxParams::new(from_account_id, to_account_id, amount),
        )
        .await
    }
}
