//! The expiry reaper: terminates transactions that have outlived their
//! resolution window without provider confirmation.
//!
//! Runs independently of the sweeper and races the other producers for the
//! same claims. No provider call is made; expiry is decided purely by
//! `expires_at`. This guarantees no transaction stays non-terminal forever
//! even if the provider never responds and polling is disabled.

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{AuditAction, AuditActor, ProcessingSource};
use crate::util::audit;

use super::claim::{self, ClaimOutcome, Resolution, ResolveOutcome};

/// Upper bound on candidates examined per reap pass.
const REAP_BATCH_LIMIT: i64 = 500;

/// Counters for one reap pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub examined: usize,
    pub expired: usize,
    pub lost_races: usize,
}

pub struct Reaper {
    state: AppState,
}

impl Reaper {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Spawn the periodic reap loop.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let interval =
            std::time::Duration::from_secs(self.state.recon.reap_interval_secs.max(1) as u64);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match self.reap_once(queries::now()) {
                    Ok(stats) if stats.expired > 0 => {
                        tracing::info!(
                            "Reap pass: {} examined, {} expired, {} lost races",
                            stats.examined,
                            stats.expired,
                            stats.lost_races
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Reap pass failed: {}", e);
                    }
                }
            }
        })
    }

    /// Run a single reap pass at time `now`.
    pub fn reap_once(&self, now: i64) -> Result<ReapStats> {
        let mut conn = self.state.db.get()?;
        let candidates = queries::reap_candidates(&conn, now, REAP_BATCH_LIMIT)?;

        let mut stats = ReapStats {
            examined: candidates.len(),
            ..Default::default()
        };

        for txn in candidates {
            // The reaper acts as a polling-class claimant; audit entries
            // carry the reaper actor.
            match claim::try_claim(
                &mut conn,
                &txn.id,
                ProcessingSource::Polling,
                now,
                &self.state.recon,
            )? {
                ClaimOutcome::Claimed(claim) => {
                    match claim::resolve(&mut conn, claim, ResolveOutcome::Expired, now)? {
                        Resolution::Resolved { .. } => {
                            stats.expired += 1;
                            audit(
                                &self.state,
                                AuditActor::Reaper,
                                AuditAction::ExpireTransaction,
                                "transaction",
                                &txn.id,
                                Some(serde_json::json!({ "expires_at": txn.expires_at })),
                            );
                        }
                        Resolution::AlreadyResolved => {
                            stats.lost_races += 1;
                        }
                    }
                }
                ClaimOutcome::LostRace { winner } => {
                    stats.lost_races += 1;
                    audit(
                        &self.state,
                        AuditActor::Reaper,
                        AuditAction::LoseRace,
                        "transaction",
                        &txn.id,
                        Some(serde_json::json!({ "winner": winner })),
                    );
                }
                ClaimOutcome::NotFound => {}
            }
        }

        Ok(stats)
    }
}
