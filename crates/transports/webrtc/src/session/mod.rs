//! Live sessions
//!
//! Maps session ids to their publishing connection and runs the join flow.

pub mod registry;
pub mod relay;

pub use registry::{Activation, SessionInfo, SessionRegistry};
pub use relay::{JoinOutcome, MediaAttachment, RelayCoordinator};
