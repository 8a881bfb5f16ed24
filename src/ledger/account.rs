//! Balance updates and the account lock order

use serde::{Deserialize, Serialize};

use crate::traits::*;
use crate::types::*;

/// Signed change to one account's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub account_id: AccountId,
    pub amount: i64,
}

impl BalanceDelta {
    pub fn new(account_id: AccountId, amount: i64) -> Self {
        Self { account_id, amount }
    }
}

impl From<BalanceDelta> for AddAccountBalanceParams {
    fn from(delta: BalanceDelta) -> Self {
        AddAccountBalanceParams {
            id: delta.account_id,
            amount: delta.amount,
        }
    }
}

/// Order balance updates so account rows are always locked by ascending ID.
///
/// Every transaction that touches several accounts must apply its updates in
/// the order returned here. With one global order, two transfers sharing
/// accounts can never each hold a lock the other is waiting for, whatever
/// direction they move money in. The sort is stable, so deltas for the same
/// account keep their relative order.
pub fn lock_order<const N: usize>(mut deltas: [BalanceDelta; N]) -> [BalanceDelta; N] {
    deltas.sort_by_key(|delta| delta.account_id);
    deltas
}

/// Apply two balance deltas strictly in the order given.
///
/// Each delta is a single atomic increment in storage, never a
/// read-then-write. Must run inside an open transaction; callers pick the
/// order with [`lock_order`]. Returns the updated accounts in input order.
pub async fn add_money<Q: Queries + ?Sized>(
    q: &mut Q,
    first: BalanceDelta,
    second: BalanceDelta,
) -> LedgerResult<(Account, Account)> {
    let account1 = q.add_account_balance(first.into()).await?;
    let account2 = q.add_account_balance(second.into()).await?;
    Ok((account1, account2))
}
