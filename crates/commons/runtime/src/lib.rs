//! Commons Runtime - round synchronization and group settlement
//!
//! The runtime drives one game instance: it collects each participant's
//! decision (or timeout) per round and phase, releases the barrier exactly
//! once, settles payoffs and commits each round's rows to the ledger.
//!
//! # Components
//!
//! - **RoundBarrier**: collects reports from the active members of a group
//!   and releases at most once per round and phase.
//! - **QuorumMonitor**: counts dropouts and latches group failure.
//! - **SettlementEngine**: computes contribution and punishment payoffs.
//! - **RoundLedger**: write-once rows, committed one whole round at a time.
//! - **GameEngine**: owns all groups, serializes each group's mutations and
//!   broadcasts lifecycle events.
//!
//! All group mutations run under that group's mutex; groups proceed in
//! parallel. The engine never reads a clock to decide a timeout: callers
//! report timeouts explicitly.

#![deny(unsafe_code)]

mod assignment;
mod barrier;
mod engine;
mod group;
mod ledger;
mod payout;
mod quorum;
mod settlement;

pub use assignment::TreatmentAssigner;
pub use barrier::{BarrierStatus, RoundBarrier};
pub use engine::GameEngine;
pub use ledger::{LedgerKey, RoundLedger};
pub use payout::compute_payout;
pub use quorum::{QuorumMonitor, QuorumVerdict};
pub use settlement::{ContributionInput, PunishmentInput, SettlementEngine};
