use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use treuhand::application::orders::OrderService;
use treuhand::application::reconciliation::ReconciliationEngine;
use treuhand::domain::ports::{
    BankFeedRef, EscrowStoreRef, OrderStore, OrderStoreRef, ReconciliationStore,
    ReconciliationStoreRef,
};
use treuhand::infrastructure::in_memory::InMemoryStore;
use treuhand::interfaces::csv::capture_reader::CaptureReader;
use treuhand::interfaces::csv::feed_reader::CsvBankFeed;
use treuhand::interfaces::csv::writers::{JournalWriter, OrderWriter};

/// Escrow/settlement core: seeds captured orders, reconciles one bank-feed
/// window against pending escrows, and prints the resulting state as CSV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Captured-order seed CSV (order_id, customer_id, provider_id, gross, platform_fee)
    #[arg(long)]
    orders: Option<PathBuf>,

    /// Bank-feed CSV to reconcile (id, booked_at, amount, currency, sender, description)
    #[arg(long)]
    feed: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Print the reconciliation journal instead of order states
    #[arg(long)]
    journal: bool,
}

struct Stores {
    orders: OrderStoreRef,
    escrows: EscrowStoreRef,
    reconciliation: ReconciliationStoreRef,
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        Some(path) => open_persistent(path),
        None => {
            let store = Arc::new(InMemoryStore::new());
            Ok(Stores {
                orders: store.clone(),
                escrows: store.clone(),
                reconciliation: store,
            })
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(path: PathBuf) -> Result<Stores> {
    let store = Arc::new(
        treuhand::infrastructure::rocksdb::RocksDbStore::open(path).into_diagnostic()?,
    );
    Ok(Stores {
        orders: store.clone(),
        escrows: store.clone(),
        reconciliation: store,
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(_path: PathBuf) -> Result<Stores> {
    Err(miette!(
        "--db-path requires a build with the storage-rocksdb feature"
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let stores = open_stores(cli.db_path)?;

    if let Some(orders_path) = cli.orders {
        let intake = OrderService::new(stores.orders.clone(), stores.escrows.clone());
        let file = File::open(orders_path).into_diagnostic()?;
        let reader = CaptureReader::new(file);
        for capture in reader.captures() {
            match capture {
                Ok(capture) => {
                    if let Err(e) = intake.capture_payment(capture).await {
                        tracing::warn!(error = %e, "skipping capture event");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed capture row");
                }
            }
        }
    }

    if let Some(feed_path) = cli.feed {
        let feed: BankFeedRef = Arc::new(CsvBankFeed::new(feed_path));
        let engine = ReconciliationEngine::new(
            feed,
            stores.orders.clone(),
            stores.escrows.clone(),
            stores.reconciliation.clone(),
        );
        engine
            .run_once()
            .await
            .map_err(|e| miette!("reconciliation run failed: {e}"))?;
    }

    let stdout = io::stdout();
    if cli.journal {
        let rows = stores
            .reconciliation
            .journal()
            .await
            .map_err(|e| miette!("{e}"))?;
        JournalWriter::new(stdout.lock())
            .write_journal(rows)
            .map_err(|e| miette!("{e}"))?;
    } else {
        let orders = stores.orders.all().await.map_err(|e| miette!("{e}"))?;
        OrderWriter::new(stdout.lock())
            .write_orders(orders)
            .map_err(|e| miette!("{e}"))?;
    }

    Ok(())
}
