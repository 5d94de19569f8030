mod from_row;
pub mod queries;
mod schema;

pub use from_row::FromRow;
pub use schema::{init_audit_db, init_db};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::ReconcilerConfig;
use crate::provider::WebhookVerifier;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding database pools and configuration
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (plans, transactions, subscriptions, webhook events)
    pub db: DbPool,
    /// Audit log database pool (separate file to isolate growth)
    pub audit: DbPool,
    /// Verifier for inbound webhook signatures
    pub verifier: WebhookVerifier,
    /// Timing/retry knobs shared by intake, sweeper, and reaper
    pub recon: ReconcilerConfig,
    pub audit_log_enabled: bool,
    /// Shared HTTP client for fire-and-forget completion notices
    pub http_client: reqwest::Client,
    /// URL notified when a transaction completes; None disables notices
    pub completion_webhook_url: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
    Pool::builder().max_size(10).build(manager)
}
