use rusqlite::Connection;

/// Initialize the main database schema (everything except audit logs)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Plans (purchasable subscription tiers)
        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            billing_interval TEXT NOT NULL CHECK (billing_interval IN ('monthly', 'yearly')),
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        -- Transactions (one payment attempt each)
        -- version: optimistic-lock counter. Every lifecycle mutation is a
        -- conditional UPDATE keyed on the previously observed version.
        -- Bookkeeping columns (race_condition_winner, webhook_received_at,
        -- last_polling_check_at) are written without a version bump.
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            provider_txn_id TEXT,
            user_id TEXT NOT NULL,
            plan_id TEXT REFERENCES plans(id),
            kind TEXT NOT NULL CHECK (kind IN ('subscription', 'purchase')),
            item_ref TEXT,

            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            payment_method TEXT NOT NULL,

            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'in_progress', 'completed', 'failed', 'cancelled', 'expired')),
            processing_source TEXT NOT NULL DEFAULT 'none'
                CHECK (processing_source IN ('webhook', 'polling', 'manual', 'none')),
            processing_attempts INTEGER NOT NULL DEFAULT 0,
            processing_started_at INTEGER,
            processing_completed_at INTEGER,

            race_condition_winner TEXT
                CHECK (race_condition_winner IS NULL OR race_condition_winner IN ('webhook', 'polling')),
            webhook_received_at INTEGER,
            last_polling_check_at INTEGER,

            provider_response TEXT,
            failure_reason TEXT,

            expires_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_provider_txn
            ON transactions(provider_txn_id) WHERE provider_txn_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);
        -- Serves both periodic scans (sweeper: expires_at in the future,
        -- reaper: expires_at in the past).
        CREATE INDEX IF NOT EXISTS idx_transactions_open
            ON transactions(expires_at) WHERE status IN ('pending', 'in_progress');

        -- Typed, append-only status history (one row per transition)
        CREATE TABLE IF NOT EXISTS transaction_status_history (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_status_history_txn
            ON transaction_status_history(transaction_id, created_at);

        -- Webhook events (raw delivery log + replay detection)
        -- Append-only: written once at intake, updated exactly once with the
        -- final disposition. Never deleted.
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            provider_event_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            sender_ip TEXT,
            sender_user_agent TEXT,
            status TEXT NOT NULL DEFAULT 'received'
                CHECK (status IN ('received', 'processing', 'completed', 'failed')),
            transaction_id TEXT REFERENCES transactions(id) ON DELETE SET NULL,
            subscription_id TEXT,
            error_message TEXT,
            processing_duration_ms INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, provider_event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_txn ON webhook_events(transaction_id);

        -- Subscriptions (recurring entitlements)
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            plan_id TEXT NOT NULL REFERENCES plans(id),
            transaction_id TEXT REFERENCES transactions(id) ON DELETE SET NULL,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'active', 'cancelled', 'expired', 'failed')),
            started_at INTEGER NOT NULL,
            ends_at INTEGER,
            next_billing_at INTEGER,
            price_cents_snapshot INTEGER NOT NULL,
            currency_snapshot TEXT NOT NULL,
            provider_subscription_id TEXT,
            provider_status TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user_plan ON subscriptions(user_id, plan_id);
        -- Backstop for the at-most-one-live rule. The activator's in-transaction
        -- check remains the primary enforcement; this catches writer bugs.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_live
            ON subscriptions(user_id, plan_id) WHERE status IN ('pending', 'active');

        -- Subscription history (append-only lifecycle audit)
        CREATE TABLE IF NOT EXISTS subscription_history (
            id TEXT PRIMARY KEY,
            subscription_id TEXT NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
            action TEXT NOT NULL
                CHECK (action IN ('started', 'upgraded', 'downgraded', 'cancelled', 'renewed', 'expired', 'failed')),
            previous_plan_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscription_history_sub
            ON subscription_history(subscription_id, created_at);

        -- Purchase grants (one-off entitlements; unique per transaction)
        CREATE TABLE IF NOT EXISTS purchase_grants (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            transaction_id TEXT NOT NULL UNIQUE,
            item_ref TEXT NOT NULL,
            granted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_purchase_grants_user ON purchase_grants(user_id);
        "#,
    )?;
    Ok(())
}

/// Initialize the audit log database schema (separate DB file)
/// Optimized for append-only workload with WAL mode
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    // WAL mode: writes are sequential appends, much faster for append-only workloads
    // synchronous=NORMAL: safe with WAL, faster than FULL
    // journal_size_limit: prevent WAL from growing indefinitely
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            actor TEXT NOT NULL CHECK (actor IN ('webhook', 'polling', 'reaper', 'manual', 'system')),
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            user_agent TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_resource ON audit_logs(resource_type, resource_id);
        "#,
    )?;
    Ok(())
}
