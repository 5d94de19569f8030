//! Test utilities and fixtures for Tally integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use tally::config::ReconcilerConfig;
pub use tally::db::{init_audit_db, init_db, queries, AppState};
pub use tally::models::*;
pub use tally::provider::{GatewayError, ProviderGateway, ProviderStatus, WebhookVerifier};
pub use tally::reconcile::{
    claim, ActivationOutcome, Claim, ClaimOutcome, Reaper, Resolution, ResolveOutcome, Sweeper,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test123secret456";

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create an in-memory test audit database with schema initialized
pub fn setup_test_audit_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory audit database");
    init_audit_db(&conn).expect("Failed to initialize audit schema");
    conn
}

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Get a future timestamp (minutes from now)
pub fn minutes_from_now(minutes: i64) -> i64 {
    now() + minutes * 60
}

/// Get a past timestamp (minutes ago)
pub fn minutes_ago(minutes: i64) -> i64 {
    now() - minutes * 60
}

/// Reconciler knobs tuned for tests: immediate re-checks, short windows.
pub fn test_recon_config() -> ReconcilerConfig {
    ReconcilerConfig {
        poll_interval_secs: 1,
        reap_interval_secs: 1,
        stale_claim_secs: 120,
        max_processing_attempts: 3,
        default_expiry_minutes: 30,
        recheck_interval_secs: 0,
        sweep_concurrency: 1,
    }
}

/// Create a test plan
pub fn create_test_plan(conn: &Connection, name: &str, price_cents: i64) -> Plan {
    let input = CreatePlan {
        name: name.to_string(),
        price_cents,
        currency: "usd".to_string(),
        billing_interval: BillingInterval::Monthly,
    };
    queries::create_plan(conn, &input).expect("Failed to create test plan")
}

/// Create a pending subscription transaction linked to a provider payment.
pub fn create_subscription_txn(
    conn: &Connection,
    user_id: &str,
    plan: &Plan,
    provider_txn_id: Option<&str>,
    expires_at: Option<i64>,
) -> Transaction {
    let input = CreateTransaction {
        user_id: user_id.to_string(),
        plan_id: Some(plan.id.clone()),
        kind: TransactionKind::Subscription,
        item_ref: None,
        amount_cents: plan.price_cents,
        currency: plan.currency.clone(),
        payment_method: "card".to_string(),
        expires_at,
    };
    let txn = queries::create_transaction(conn, &input, 30).expect("Failed to create transaction");
    if let Some(ptid) = provider_txn_id {
        let linked =
            queries::attach_provider_txn(conn, &txn.id, ptid).expect("Failed to link provider id");
        assert!(linked, "provider link should succeed on a fresh transaction");
        return queries::get_transaction(conn, &txn.id)
            .expect("query failed")
            .expect("transaction should exist");
    }
    txn
}

/// Create a pending one-off purchase transaction.
pub fn create_purchase_txn(
    conn: &Connection,
    user_id: &str,
    item_ref: &str,
    provider_txn_id: Option<&str>,
) -> Transaction {
    let input = CreateTransaction {
        user_id: user_id.to_string(),
        plan_id: None,
        kind: TransactionKind::Purchase,
        item_ref: Some(item_ref.to_string()),
        amount_cents: 500,
        currency: "usd".to_string(),
        payment_method: "card".to_string(),
        expires_at: None,
    };
    let txn = queries::create_transaction(conn, &input, 30).expect("Failed to create transaction");
    if let Some(ptid) = provider_txn_id {
        queries::attach_provider_txn(conn, &txn.id, ptid).expect("Failed to link provider id");
    }
    queries::get_transaction(conn, &txn.id)
        .expect("query failed")
        .expect("transaction should exist")
}

/// File-backed AppState for tests that exercise pooled access (handlers,
/// sweeper, reaper). In-memory pools give every pooled connection its own
/// database, so anything multi-connection needs a real file. Databases are
/// removed on drop.
pub struct TestApp {
    pub state: AppState,
    db_path: PathBuf,
    audit_path: PathBuf,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_recon_config())
    }

    pub fn with_config(recon: ReconcilerConfig) -> Self {
        let unique = uuid::Uuid::new_v4().as_simple().to_string();
        let db_path = std::env::temp_dir().join(format!("tally_test_{}.db", unique));
        let audit_path = std::env::temp_dir().join(format!("tally_test_{}_audit.db", unique));

        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
        let pool = Pool::builder().max_size(4).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            init_db(&conn).unwrap();
        }

        let audit_manager = SqliteConnectionManager::file(&audit_path)
            .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
        let audit_pool = Pool::builder().max_size(4).build(audit_manager).unwrap();
        {
            let conn = audit_pool.get().unwrap();
            init_audit_db(&conn).unwrap();
        }

        let state = AppState {
            db: pool,
            audit: audit_pool,
            verifier: WebhookVerifier::new(TEST_WEBHOOK_SECRET),
            recon,
            audit_log_enabled: true,
            http_client: reqwest::Client::new(),
            completion_webhook_url: None,
        };

        Self { state, db_path, audit_path }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        for path in [&self.db_path, &self.audit_path] {
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_file(format!("{}-wal", path.display()));
            let _ = std::fs::remove_file(format!("{}-shm", path.display()));
        }
    }
}

/// Sign a webhook payload the way the provider would.
pub fn sign_webhook(payload: &[u8]) -> String {
    WebhookVerifier::new(TEST_WEBHOOK_SECRET).sign(payload, now())
}

/// Scriptable provider gateway. Responses are popped from a queue; when the
/// queue is empty the default response is returned. Call counts are tracked
/// so tests can assert the provider was (not) consulted.
pub struct MockGateway {
    responses: Mutex<VecDeque<Result<ProviderStatus, GatewayError>>>,
    default: ProviderStatus,
    pub calls: AtomicUsize,
}

impl MockGateway {
    pub fn returning(default: ProviderStatus) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a scripted response ahead of the default.
    pub fn push(&self, response: Result<ProviderStatus, GatewayError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    async fn payment_status(&self, _id: &str) -> Result<ProviderStatus, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(r) => r,
            None => Ok(self.default),
        }
    }

    async fn subscription_status(&self, _id: &str) -> Result<ProviderStatus, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.default)
    }
}
