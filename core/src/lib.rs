//! Shared types for the chassis gRPC runtime.
//!
//! This crate carries the small vocabulary every other chassis crate speaks:
//! canonical gRPC status codes, the [`Status`] value propagated through pick
//! results and call terminations, channel [`ConnectivityState`]s, and the
//! per-call [`CallOptions`] bag consulted by pickers.

mod options;
mod state;
mod status;

pub use options::{CallOptions, CLUSTER_SELECTION_KEY};
pub use state::ConnectivityState;
pub use status::{Code, Status};
