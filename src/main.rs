//! Fee Ledger CLI
//!
//! ```text
//! fee_ledger [--env dev] [--memory] setup
//! fee_ledger [--env dev] [--memory] balances
//! fee_ledger [--env dev] [--memory] transfer <src> <dst> <amount> [fee_rate]
//! ```
//!
//! `--memory` runs against a fresh in-process ledger seeded with the demo
//! accounts instead of PostgreSQL.

use std::sync::Arc;

use anyhow::{Context, bail};

use fee_ledger::accounts::{demo_accounts, list_accounts, seed_accounts};
use fee_ledger::config::AppConfig;
use fee_ledger::logging::init_logging;
use fee_ledger::money::{format_amount, parse_amount, parse_fee_rate};
use fee_ledger::{
    AccountId, LedgerStore, MemoryLedgerStore, PgLedgerStore, Session, TransferEngine,
    TransferRequest, transfer_with_retry,
};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_memory_store() -> bool {
    std::env::args().any(|a| a == "--memory")
}

/// Command and its operands, with flags stripped
fn positional_args() -> Vec<String> {
    let mut out = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--env" | "-e" => {
                args.next();
            }
            "--memory" => {}
            _ => out.push(arg),
        }
    }
    out
}

fn usage() -> &'static str {
    "usage: fee_ledger [--env <name>] [--memory] <setup | balances | transfer <src> <dst> <amount> [fee_rate]>"
}

// ============================================================
// COMMANDS
// ============================================================

async fn cmd_setup(store: &dyn LedgerStore, config: &AppConfig) -> anyhow::Result<()> {
    store.ensure_schema().await?;
    let mut session = Session::connect_with(store, config.session).await?;
    let result = seed_accounts(&mut session, &demo_accounts()).await;
    session.close().await?;
    let created = result?;
    println!("schema ready, {} account(s) created", created);
    Ok(())
}

async fn cmd_balances(store: &dyn LedgerStore, config: &AppConfig) -> anyhow::Result<()> {
    let mut session = Session::connect_with(store, config.session).await?;
    session.set_readonly(true)?;
    let result = list_accounts(&mut session).await;
    session.close().await?;

    let accounts = result?;
    let mut total = rust_decimal::Decimal::ZERO;
    println!("{:>6}  {:>15}", "id", "balance");
    for account in &accounts {
        total += account.balance;
        println!("{:>6}  {:>15}", account.id, format_amount(account.balance));
    }
    println!("{:>6}  {:>15}", "total", format_amount(total));
    Ok(())
}

async fn cmd_transfer(
    store: &dyn LedgerStore,
    config: &AppConfig,
    operands: &[String],
) -> anyhow::Result<()> {
    if operands.len() < 3 {
        bail!("{}", usage());
    }
    let src: AccountId = operands[0]
        .parse()
        .with_context(|| format!("invalid source account: {}", operands[0]))?;
    let dst: AccountId = operands[1]
        .parse()
        .with_context(|| format!("invalid destination account: {}", operands[1]))?;
    let amount = parse_amount(&operands[2])?;
    let fee_rate = match operands.get(3) {
        Some(rate) => parse_fee_rate(rate)?,
        None => config.transfer.default_fee_rate,
    };

    let engine = TransferEngine::new(config.transfer.engine_config());
    let request = TransferRequest::new(src, dst, amount, fee_rate);

    let mut session = Session::connect_with(store, config.session).await?;
    let result =
        transfer_with_retry(&engine, store, &mut session, &request, &config.retry).await;
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Closing session after transfer failed");
    }

    match result {
        Ok(receipt) => {
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(())
        }
        Err(e) => {
            let kind = if e.is_retryable() { "retryable" } else { "terminal" };
            bail!("transfer failed [{} / {}]: {}", e.code(), kind, e)
        }
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config)?;

    let store: Arc<dyn LedgerStore> = if use_memory_store() {
        Arc::new(MemoryLedgerStore::with_accounts(demo_accounts()))
    } else {
        let url = app_config
            .database_url()
            .context("no database configured: set DATABASE_URL or postgres_url")?;
        Arc::new(PgLedgerStore::new(&url)?)
    };

    tracing::info!(
        "Starting fee_ledger in {} mode on the {} store",
        env,
        store.name()
    );

    let args = positional_args();
    match args.first().map(String::as_str) {
        Some("setup") => cmd_setup(store.as_ref(), &app_config).await,
        Some("balances") => cmd_balances(store.as_ref(), &app_config).await,
        Some("transfer") => cmd_transfer(store.as_ref(), &app_config, &args[1..]).await,
        _ => bail!("{}", usage()),
    }
}
