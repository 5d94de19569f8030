//! The polling sweeper: the correctness backstop for webhooks that were
//! never delivered.
//!
//! Runs on a fixed interval, finds transactions overdue for resolution, and
//! drives the same claim protocol as webhook intake. Candidates are
//! processed with bounded fan-out; overlap between workers is harmless
//! because each claims before acting.

use std::sync::Arc;

use futures::{stream, StreamExt};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{AuditAction, AuditActor, ProcessingSource, Transaction, TransactionStatus};
use crate::notify::{spawn_completion_notice, CompletionNotice};
use crate::provider::ProviderGateway;
use crate::util::audit;

use super::claim::{self, ClaimOutcome, Resolution, ResolveOutcome};

/// Upper bound on candidates examined per sweep pass.
const SWEEP_BATCH_LIMIT: i64 = 500;

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub resolved: usize,
    pub abandoned: usize,
    pub failed: usize,
    pub lost_races: usize,
}

enum SweepAction {
    Resolved,
    Abandoned,
    Failed,
    LostRace,
    Skipped,
}

pub struct Sweeper<G> {
    state: AppState,
    gateway: Arc<G>,
}

impl<G: ProviderGateway + 'static> Sweeper<G> {
    pub fn new(state: AppState, gateway: Arc<G>) -> Self {
        Self { state, gateway }
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let interval =
            std::time::Duration::from_secs(self.state.recon.poll_interval_secs.max(1) as u64);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match self.sweep_once(queries::now()).await {
                    Ok(stats) if stats.examined > 0 => {
                        tracing::info!(
                            "Sweep pass: {} examined, {} resolved, {} abandoned, {} failed, {} lost races",
                            stats.examined,
                            stats.resolved,
                            stats.abandoned,
                            stats.failed,
                            stats.lost_races
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Sweep pass failed: {}", e);
                    }
                }
            }
        })
    }

    /// Run a single sweep pass at time `now`.
    pub async fn sweep_once(&self, now: i64) -> Result<SweepStats> {
        let candidates = {
            let conn = self.state.db.get()?;
            queries::sweep_candidates(
                &conn,
                now,
                self.state.recon.recheck_interval_secs,
                SWEEP_BATCH_LIMIT,
            )?
        };

        let mut stats = SweepStats {
            examined: candidates.len(),
            ..Default::default()
        };

        let actions: Vec<SweepAction> = stream::iter(candidates)
            .map(|txn| self.process_candidate(txn, now))
            .buffer_unordered(self.state.recon.sweep_concurrency)
            .collect()
            .await;

        for action in actions {
            match action {
                SweepAction::Resolved => stats.resolved += 1,
                SweepAction::Abandoned => stats.abandoned += 1,
                SweepAction::Failed => stats.failed += 1,
                SweepAction::LostRace => stats.lost_races += 1,
                SweepAction::Skipped => {}
            }
        }

        Ok(stats)
    }

    /// Claim, poll the provider, resolve or abandon. Per-candidate faults
    /// are logged and folded into the stats, never escalated out of the
    /// sweep.
    async fn process_candidate(&self, txn: Transaction, now: i64) -> SweepAction {
        match self.try_process(txn, now).await {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!("Sweep candidate failed: {}", e);
                SweepAction::Skipped
            }
        }
    }

    async fn try_process(&self, txn: Transaction, now: i64) -> Result<SweepAction> {
        let mut conn = self.state.db.get()?;

        let claim = match claim::try_claim(
            &mut conn,
            &txn.id,
            ProcessingSource::Polling,
            now,
            &self.state.recon,
        )? {
            ClaimOutcome::Claimed(claim) => claim,
            ClaimOutcome::LostRace { winner } => {
                queries::touch_polling_check(&conn, &txn.id, now)?;
                audit(
                    &self.state,
                    AuditActor::Polling,
                    AuditAction::LoseRace,
                    "transaction",
                    &txn.id,
                    Some(serde_json::json!({ "winner": winner })),
                );
                return Ok(SweepAction::LostRace);
            }
            ClaimOutcome::NotFound => return Ok(SweepAction::Skipped),
        };

        audit(
            &self.state,
            AuditActor::Polling,
            AuditAction::ClaimTransaction,
            "transaction",
            &txn.id,
            Some(serde_json::json!({
                "attempt": claim.transaction().processing_attempts
            })),
        );

        // A transaction that never got a provider-side identifier has
        // nothing to poll; the expiry reaper terminates it eventually.
        let Some(provider_txn_id) = claim.transaction().provider_txn_id.clone() else {
            queries::touch_polling_check(&conn, &txn.id, now)?;
            let released = claim::abandon(&mut conn, claim, now)?;
            return Ok(if released { SweepAction::Abandoned } else { SweepAction::Skipped });
        };

        // The claim is already held; the provider call is the only blocking
        // point and no DB lock spans it.
        match self.gateway.payment_status(&provider_txn_id).await {
            Ok(status) => {
                if status.terminal_status().is_some() {
                    let response = serde_json::json!({ "status": status.as_str() });
                    let outcome =
                        claim::outcome_from_provider_status(status, Some(response.to_string()))?;
                    let txn_snapshot = claim.transaction().clone();
                    let resolution = claim::resolve(&mut conn, claim, outcome, now)?;
                    queries::touch_polling_check(&conn, &txn.id, now)?;
                    self.after_resolve(&txn_snapshot, &resolution, now);
                    Ok(SweepAction::Resolved)
                } else {
                    // Still pending (or unknown) at the provider; hand the
                    // claim back and try again next sweep.
                    queries::touch_polling_check(&conn, &txn.id, now)?;
                    let released = claim::abandon(&mut conn, claim, now)?;
                    audit(
                        &self.state,
                        AuditActor::Polling,
                        AuditAction::AbandonClaim,
                        "transaction",
                        &txn.id,
                        Some(serde_json::json!({ "reason": "provider still pending" })),
                    );
                    Ok(if released { SweepAction::Abandoned } else { SweepAction::Skipped })
                }
            }
            Err(e) => {
                queries::touch_polling_check(&conn, &txn.id, now)?;
                let attempts = claim.transaction().processing_attempts;
                if attempts >= self.state.recon.max_processing_attempts {
                    tracing::warn!(
                        "Transaction {} exhausted {} attempts; failing ({})",
                        txn.id,
                        attempts,
                        e
                    );
                    claim::resolve(
                        &mut conn,
                        claim,
                        ResolveOutcome::Failed {
                            reason: "max retries exceeded".to_string(),
                            provider_response: None,
                        },
                        now,
                    )?;
                    audit(
                        &self.state,
                        AuditActor::Polling,
                        AuditAction::ResolveTransaction,
                        "transaction",
                        &txn.id,
                        Some(serde_json::json!({
                            "status": "failed",
                            "reason": "max retries exceeded",
                            "attempts": attempts,
                        })),
                    );
                    Ok(SweepAction::Failed)
                } else {
                    tracing::debug!(
                        "Transient provider error for {} (attempt {}): {}",
                        txn.id,
                        attempts,
                        e
                    );
                    let released = claim::abandon(&mut conn, claim, now)?;
                    audit(
                        &self.state,
                        AuditActor::Polling,
                        AuditAction::AbandonClaim,
                        "transaction",
                        &txn.id,
                        Some(serde_json::json!({
                            "reason": "transient provider error",
                            "attempt": attempts,
                        })),
                    );
                    Ok(if released { SweepAction::Abandoned } else { SweepAction::Skipped })
                }
            }
        }
    }

    fn after_resolve(&self, txn: &Transaction, resolution: &Resolution, now: i64) {
        if let Resolution::Resolved { status, activation } = resolution {
            audit(
                &self.state,
                AuditActor::Polling,
                AuditAction::ResolveTransaction,
                "transaction",
                &txn.id,
                Some(serde_json::json!({ "status": status.as_ref() })),
            );
            if *status == TransactionStatus::Completed {
                spawn_completion_notice(
                    self.state.http_client.clone(),
                    self.state.completion_webhook_url.clone(),
                    CompletionNotice::for_transaction(txn, activation.as_ref(), now),
                );
            }
        }
    }
}
