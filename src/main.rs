use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally::config::Config;
use tally::db::{create_pool, init_audit_db, init_db, queries, AppState};
use tally::handlers;
use tally::models::{BillingInterval, CreatePlan, CreateTransaction, TransactionKind};
use tally::provider::{HttpGateway, WebhookVerifier};
use tally::reconcile::{Reaper, Sweeper};

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Payment and subscription reconciliation engine")]
struct Cli {
    /// Seed the database with dev data (a plan and a pending transaction)
    #[arg(long)]
    seed: bool,

    /// Delete databases on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing.
/// Creates: one plan and one pending transaction linked to a fake provider id.
/// Only runs in dev mode and when the database is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let open = queries::count_open_transactions(&conn).expect("Failed to count transactions");
    if open > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let plan = queries::create_plan(
        &conn,
        &CreatePlan {
            name: "Pro Monthly".to_string(),
            price_cents: 7900,
            currency: "usd".to_string(),
            billing_interval: BillingInterval::Monthly,
        },
    )
    .expect("Failed to create dev plan");

    tracing::info!("Plan: {} (id: {})", plan.name, plan.id);

    let txn = queries::create_transaction(
        &conn,
        &CreateTransaction {
            user_id: "dev_user".to_string(),
            plan_id: Some(plan.id.clone()),
            kind: TransactionKind::Subscription,
            item_ref: None,
            amount_cents: plan.price_cents,
            currency: plan.currency.clone(),
            payment_method: "card".to_string(),
            expires_at: None,
        },
        state.recon.default_expiry_minutes,
    )
    .expect("Failed to create dev transaction");

    queries::attach_provider_txn(&conn, &txn.id, "pay_dev_0001")
        .expect("Failed to link dev transaction");

    tracing::info!("Transaction: {} (provider: pay_dev_0001)", txn.id);
    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    // Print copy-paste friendly output (no log formatting)
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  plan_id: {}", plan.id);
    println!("  transaction_id: {}", txn.id);
    println!("  provider_txn_id: pay_dev_0001");
    println!("--- END COPY ---");
    println!();
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    // Create database connection pools
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let audit_pool =
        create_pool(&config.audit_database_path).expect("Failed to create audit database pool");

    // Initialize database schemas
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = audit_pool.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit database");
    }

    let state = AppState {
        db: db_pool,
        audit: audit_pool,
        verifier: WebhookVerifier::new(config.provider_webhook_secret.clone()),
        recon: config.reconciler,
        audit_log_enabled: config.audit_log_enabled,
        http_client: reqwest::Client::new(),
        completion_webhook_url: config.completion_webhook_url.clone(),
    };

    // Purge old audit logs on startup (0 = never purge)
    if config.audit_log_retention_days > 0 {
        let conn = state.audit.get().expect("Failed to get audit connection for purge");
        match queries::purge_old_audit_logs(&conn, config.audit_log_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "Purged {} audit log entries older than {} days",
                    count,
                    config.audit_log_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to purge old audit logs: {}", e);
            }
        }
    }

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set TALLY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // Start the two periodic reconciliation tasks. The sweeper is the
    // correctness backstop for undelivered webhooks; the reaper guarantees
    // no transaction stays non-terminal past its window.
    let gateway = Arc::new(HttpGateway::new(
        config.provider_base_url.clone(),
        config.provider_secret_key.clone(),
    ));
    Sweeper::new(state.clone(), gateway).spawn();
    Reaper::new(state.clone()).spawn();
    tracing::info!(
        "Reconciliation tasks started (sweep every {}s, reap every {}s)",
        config.reconciler.poll_interval_secs,
        config.reconciler.reap_interval_secs
    );

    // Build the application router
    let app = Router::new()
        .merge(handlers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // Track if we should clean up on exit
    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    let audit_path = config.audit_database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: databases will be deleted on exit");
    }

    tracing::info!("Tally server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // Cleanup on exit if ephemeral mode
    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral databases...");
        for path in [&db_path, &audit_path] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path, e);
            } else {
                tracing::info!("Removed {}", path);
            }
            // Also remove WAL and SHM files if they exist
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
