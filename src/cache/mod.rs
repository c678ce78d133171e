//! In-memory coordination state shared by driver invocations.
//!
//! None of these structures own cloud resources. They let a fresh call
//! resume work an earlier call started, and they are allowed to be empty
//! after a restart: every driver operation stays correct without them,
//! only slower.

mod inflight;
mod ledger;
mod poller;

pub use inflight::{InFlight, InFlightGuard};
pub use ledger::{Obligation, PendingDeletions};
pub use poller::{Operation, PollerCache, PollerKey};
