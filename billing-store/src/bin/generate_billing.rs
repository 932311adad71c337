//! Billing Ledger Generation Job
//!
//! Batch job that bills every treatment not yet present in the ledger:
//! one insert per unbilled treatment, consultation fee charged once per
//! consultation, insurer/patient split per the policy's payment model.
//! Safe to re-run: already-billed treatments are skipped.
//!
//! Usage:
//!   cargo run --bin generate_billing -- --database-url postgres://... [--fee-scope global]

use billing_engine::{BillingGenerator, FeeScope};
use billing_store::{BillingPool, FactRepository, LedgerTx};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "generate_billing")]
#[command(about = "Generate idempotent billing ledger entries for unbilled treatments")]
struct Args {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Consultation-fee deduplication scope: per-run (historical ledger
    /// behavior) or global (fee never charged twice across runs)
    #[arg(long, default_value = "per-run")]
    fee_scope: FeeScope,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting billing ledger generation");
    info!("Database: {}", mask_url(&args.database_url));
    info!("Fee scope: {:?}", args.fee_scope);

    let pool = BillingPool::connect(&args.database_url).await?;

    let source = FactRepository::new(pool.clone());
    let mut sink = LedgerTx::begin(&pool).await?;

    let mut generator = BillingGenerator::new().with_fee_scope(args.fee_scope);
    let summary = generator.run(&source, &mut sink).await?;

    sink.commit().await?;
    pool.close().await;

    info!(
        billed = summary.billed,
        skipped_existing = summary.skipped_existing,
        skipped_malformed = summary.skipped_malformed,
        "Billing successfully generated"
    );
    Ok(())
}

/// Hide credentials when logging the connection URL
fn mask_url(url: &str) -> String {
    match url.rfind('@') {
        Some(at) => match url.find("://") {
            Some(scheme) => format!("{}://***{}", &url[..scheme], &url[at..]),
            None => format!("***{}", &url[at..]),
        },
        None => url.to_string(),
    }
}
