//! Impls - in-memory implementations of the storage ports.
//!
//! These are the reference backends used by tests and by single-process
//! runs of the CLI. Persistent backends implement the same traits.

pub mod inmem_claim_store;
pub mod inmem_issue_store;

pub use self::inmem_claim_store::InMemoryClaimStore;
pub use self::inmem_issue_store::InMemoryIssueStore;
