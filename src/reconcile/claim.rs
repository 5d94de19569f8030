//! The claim protocol: exclusive, time-bounded processing rights over one
//! transaction.
//!
//! Both producers and the reaper funnel through `try_claim` / `resolve` /
//! `abandon`. All three are optimistic compare-and-swaps keyed on the row
//! version observed at read time; no lock is ever held across a network
//! call.

use rusqlite::Connection;

use crate::config::ReconcilerConfig;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{ProcessingSource, Transaction, TransactionStatus};

use super::activator::{self, ActivationOutcome};

/// A successfully taken claim. Consumed by `resolve` or `abandon`, so a
/// claim can only be spent once.
#[derive(Debug)]
pub struct Claim {
    txn: Transaction,
    source: ProcessingSource,
}

impl Claim {
    /// The claimed transaction as of the claim (version included).
    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    pub fn source(&self) -> ProcessingSource {
        self.source
    }
}

/// Outcome of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// This caller now holds exclusive processing rights.
    Claimed(Claim),
    /// Another source holds the claim or already resolved the transaction.
    /// The expected outcome for whichever attempt arrives second.
    LostRace { winner: ProcessingSource },
    NotFound,
}

/// Terminal outcome the claim holder wants to record.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Completed { provider_response: Option<String> },
    Failed { reason: String, provider_response: Option<String> },
    Cancelled { provider_response: Option<String> },
    Expired,
}

impl ResolveOutcome {
    fn to_status(&self) -> TransactionStatus {
        match self {
            Self::Completed { .. } => TransactionStatus::Completed,
            Self::Failed { .. } => TransactionStatus::Failed,
            Self::Cancelled { .. } => TransactionStatus::Cancelled,
            Self::Expired => TransactionStatus::Expired,
        }
    }
}

/// Result of a resolve call.
#[derive(Debug)]
pub enum Resolution {
    Resolved {
        status: TransactionStatus,
        /// Present when the terminal status was `completed`.
        activation: Option<ActivationOutcome>,
    },
    /// Another actor resolved the transaction in the narrow window between
    /// claim and resolve. A logged no-op, never an error.
    AlreadyResolved,
}

/// Attempt to seize exclusive processing rights over `transaction_id`.
///
/// Claimable states: `pending`, or `in_progress` whose claim has gone stale
/// (no completion within `stale_claim_secs`). The write is a single
/// conditional UPDATE keyed on the version observed here; an interleaved
/// claim from the other producer makes it affect zero rows.
pub fn try_claim(
    conn: &mut Connection,
    transaction_id: &str,
    source: ProcessingSource,
    now: i64,
    cfg: &ReconcilerConfig,
) -> Result<ClaimOutcome> {
    let Some(txn) = queries::get_transaction(conn, transaction_id)? else {
        return Ok(ClaimOutcome::NotFound);
    };

    let claimable = match txn.status {
        TransactionStatus::Pending => true,
        TransactionStatus::InProgress => {
            // Stale claims are implicitly reclaimable; this is the system's
            // only timeout mechanism.
            txn.processing_started_at
                .map(|started| now - started >= cfg.stale_claim_secs)
                .unwrap_or(true)
        }
        _ => false,
    };

    if !claimable {
        let winner = txn.processing_source;
        if txn.status == TransactionStatus::InProgress {
            queries::record_race_winner(conn, transaction_id, winner)?;
        }
        return Ok(ClaimOutcome::LostRace { winner });
    }

    // Claim CAS + history append, atomically.
    let tx = conn.transaction()?;
    let won = queries::claim_transaction_cas(&tx, transaction_id, txn.version, source, now)?;
    if !won {
        drop(tx);
        // Lost between read and write; report whoever holds the row now.
        let winner = queries::get_transaction(conn, transaction_id)?
            .map(|t| t.processing_source)
            .unwrap_or(ProcessingSource::None);
        queries::record_race_winner(conn, transaction_id, winner)?;
        return Ok(ClaimOutcome::LostRace { winner });
    }
    queries::append_status_transition(
        &tx,
        transaction_id,
        txn.status,
        TransactionStatus::InProgress,
        source,
        now,
    )?;
    tx.commit()?;

    let mut claimed = txn;
    claimed.status = TransactionStatus::InProgress;
    claimed.processing_source = source;
    claimed.processing_attempts += 1;
    claimed.processing_started_at = Some(now);
    claimed.version += 1;

    tracing::debug!(
        "Claimed transaction {} for {} (attempt {})",
        transaction_id,
        source,
        claimed.processing_attempts
    );

    Ok(ClaimOutcome::Claimed(Claim { txn: claimed, source }))
}

/// Move the held claim to a terminal status.
///
/// One SQLite transaction covers the status CAS, the history append, and
/// (for completions) the entitlement activation. If activation fails the
/// whole unit rolls back and the row stays `in_progress`, eligible for a
/// later claim once stale.
pub fn resolve(conn: &mut Connection, claim: Claim, outcome: ResolveOutcome, now: i64) -> Result<Resolution> {
    let to_status = outcome.to_status();
    let (provider_response, failure_reason) = match &outcome {
        ResolveOutcome::Completed { provider_response } => (provider_response.clone(), None),
        ResolveOutcome::Failed { reason, provider_response } => {
            (provider_response.clone(), Some(reason.clone()))
        }
        ResolveOutcome::Cancelled { provider_response } => (provider_response.clone(), None),
        ResolveOutcome::Expired => (None, None),
    };

    let tx = conn.transaction()?;

    let won = queries::resolve_transaction_cas(
        &tx,
        &claim.txn.id,
        claim.txn.version,
        claim.source,
        to_status,
        provider_response.as_deref(),
        failure_reason.as_deref(),
        now,
    )?;

    if !won {
        // Someone else got there first; a successful no-op by contract.
        drop(tx);
        tracing::info!(
            "Transaction {} already resolved by another actor; {} resolve is a no-op",
            claim.txn.id,
            claim.source
        );
        return Ok(Resolution::AlreadyResolved);
    }

    queries::append_status_transition(
        &tx,
        &claim.txn.id,
        TransactionStatus::InProgress,
        to_status,
        claim.source,
        now,
    )?;

    let activation = if to_status == TransactionStatus::Completed {
        Some(activator::activate(&tx, &claim.txn, now)?)
    } else {
        None
    };

    tx.commit()?;

    tracing::info!(
        "Transaction {} resolved to {} by {}",
        claim.txn.id,
        to_status,
        claim.source
    );

    Ok(Resolution::Resolved { status: to_status, activation })
}

/// Release the held claim back to `pending` so a future sweep or webhook
/// can retry. Attempts are preserved; no terminal status is written.
///
/// Returns false if the claim was no longer held (narrow-window loss),
/// which callers treat as a no-op.
pub fn abandon(conn: &mut Connection, claim: Claim, now: i64) -> Result<bool> {
    let tx = conn.transaction()?;
    let released =
        queries::abandon_claim_cas(&tx, &claim.txn.id, claim.txn.version, claim.source)?;
    if released {
        queries::append_status_transition(
            &tx,
            &claim.txn.id,
            TransactionStatus::InProgress,
            TransactionStatus::Pending,
            claim.source,
            now,
        )?;
        tx.commit()?;
        tracing::debug!("Abandoned claim on transaction {} ({})", claim.txn.id, claim.source);
    }
    Ok(released)
}

/// Map a claimed provider status string onto a resolve outcome. Returns an
/// error for vocabulary this engine does not recognize.
pub fn outcome_from_provider_status(
    status: crate::provider::ProviderStatus,
    provider_response: Option<String>,
) -> Result<ResolveOutcome> {
    use crate::provider::ProviderStatus;
    match status {
        ProviderStatus::Succeeded => Ok(ResolveOutcome::Completed { provider_response }),
        ProviderStatus::Failed => Ok(ResolveOutcome::Failed {
            reason: "provider reported failure".to_string(),
            provider_response,
        }),
        ProviderStatus::Cancelled => Ok(ResolveOutcome::Cancelled { provider_response }),
        ProviderStatus::Pending | ProviderStatus::NotFound => Err(AppError::BadRequest(
            "non-terminal provider status cannot resolve a transaction".into(),
        )),
    }
}
