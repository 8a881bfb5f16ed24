//! Concurrent transfers between two accounts

use bank_ledger::logging::init_logging;
use bank_ledger::{CreateAccountParams, LedgerConfig, MemoryStorage, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LedgerConfig::from_file("ledger.toml")?;
    init_logging(&config.logging)?;

    println!("🏦 Bank Ledger - Concurrent Transfer Example\n");

    let storage = MemoryStorage::from_config(&config.store);
    let store = Store::with_config(storage, config.store.clone());

    // 1. Open two accounts
    let alice = store
        .create_account(CreateAccountParams::new("alice", 10_000, "USD"))
        .await?;
    let bob = store
        .create_account(CreateAccountParams::new("bob", 5_000, "USD"))
        .await?;
    println!("  ✓ Opened account {} for {} with {}", alice.id, alice.owner, alice.balance);
    println!("  ✓ Opened account {} for {} with {}\n", bob.id, bob.owner, bob.balance);

    // 2. Move money both ways at the same time
    println!("💸 Running 20 concurrent transfers in both directions...");
    let mut handles = Vec::new();
    for i in 0..20i64 {
        let store = store.clone();
        let (from, to) = if i % 2 == 0 {
            (alice.id, bob.id)
        } else {
            (bob.id, alice.id)
        };
        let amount = 100 + i * 10;
        handles.push(tokio::spawn(async move {
            store.transfer_money(from, to, amount).await
        }));
    }

    let mut failed = 0;
    for handle in handles {
        match handle.await? {
            Ok(result) => println!(
                "  ✓ Transfer {}: {} -> {} ({})",
                result.transfer.id,
                result.transfer.from_account_id,
                result.transfer.to_account_id,
                result.transfer.amount
            ),
            Err(e) => {
                failed += 1;
                println!("  ✗ Transfer failed: {}", e);
            }
        }
    }
    println!();

    // 3. Final balances
    let alice = store.get_account(alice.id).await?;
    let bob = store.get_account(bob.id).await?;
    println!("📊 Final balances:");
    println!("  {}: {}", alice.owner, alice.balance);
    println!("  {}: {}", bob.owner, bob.balance);
    println!("  total: {} (failed transfers: {})", alice.balance + bob.balance, failed);

    Ok(())
}
