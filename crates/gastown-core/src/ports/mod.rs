//! Ports - the seams between the coordination core and the outside world.
//!
//! Storage backends, time, and id minting sit behind these traits; the
//! reference in-memory stores live in `impls`, production backends swap in
//! without touching core logic.

pub mod claim_store;
pub mod clock;
pub mod id_generator;
pub mod issue_store;

pub use self::claim_store::{ClaimAttempt, ClaimStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::issue_store::IssueStore;
