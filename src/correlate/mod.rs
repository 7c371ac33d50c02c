//! Correlation of inbound notifications with the requests that caused them.
//!
//! - [`pending`] — keyed single-assignment slots awaited by requesters and
//!   settled by the inbound dispatcher.
//! - [`dedupe`] — collapses concurrent identical requests into one call.

pub mod dedupe;
pub mod pending;

pub use dedupe::Deduplicator;
pub use pending::{PendingRequest, PendingRequests, RequestKey};
