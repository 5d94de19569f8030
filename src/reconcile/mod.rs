//! The reconciliation core.
//!
//! Two independent producers (webhook intake, polling sweeper) plus the
//! expiry reaper race to finalize each transaction. The claim protocol in
//! [`claim`] is the single serialization point: whoever wins the
//! compare-and-swap holds the exclusive right to resolve, everyone else
//! observes a lost race and walks away without side effects.

pub mod activator;
pub mod claim;
pub mod reaper;
pub mod sweeper;

pub use activator::ActivationOutcome;
pub use claim::{Claim, ClaimOutcome, Resolution, ResolveOutcome};
pub use reaper::{ReapStats, Reaper};
pub use sweeper::{SweepStats, Sweeper};
