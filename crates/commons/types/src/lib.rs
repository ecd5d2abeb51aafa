//! Commons Domain Types
//!
//! This crate defines the domain types for the Commons round engine: a
//! repeated public-goods game in which a fixed group of participants makes
//! a private contribution every round, optionally followed by a peer
//! punishment stage.
//!
//! # Key Concepts
//!
//! - **Participant**: a group member whose status (active / dropped out)
//!   and accumulated earnings persist across rounds.
//! - **Group**: an ordered set of participants with a one-way `failed`
//!   latch that trips when too many members drop out.
//! - **Round**: one contribution phase and, for punishment groups, one
//!   punishment phase. Each phase settles at most once.
//! - **Points**: fixed-point currency in minor units, so payoff identities
//!   hold exactly.
//!
//! # Architecture
//!
//! This is a pure types crate with no runtime dependencies. All records
//! implement `Clone`, `Debug`, `Serialize`, `Deserialize`. IDs use the
//! newtype pattern and implement `Display`, `generate()`, and `new()`.

#![deny(unsafe_code)]

mod config;
mod errors;
mod event;
mod group;
mod ids;
mod outcome;
mod participant;
mod points;
mod punishment;

pub use config::*;
pub use errors::*;
pub use event::*;
pub use group::*;
pub use ids::*;
pub use outcome::*;
pub use participant::*;
pub use points::*;
pub use punishment::*;
