//! In-memory metric aggregators.
//!
//! # Responsibilities
//! - Accept one event at a time from concurrent request handlers
//! - Aggregate into bounded, lock-protected maps keyed by dimension tuples
//! - Hand the accumulated state to the sync cycle via atomic drain-and-reset
//!
//! # Design Decisions
//! - One mutex per aggregator; critical sections are O(1) map operations
//! - No I/O anywhere in this module, callers are never blocked on the network
//! - Deduplicated errors keep first-seen details, repeats only bump a count

pub mod consumers;
pub mod requests;
pub mod server_errors;
pub mod validation_errors;

pub use consumers::{Consumer, ConsumerRegistry, ConsumerSource};
pub use requests::{RequestCounter, RequestsItem};
pub use server_errors::{ErrorInfo, ServerErrorCounter, ServerErrorsItem};
pub use validation_errors::{ValidationErrorCounter, ValidationErrorsItem};
