//! Race synchronization: the per-client state machine, its relay wiring,
//! and the per-room win arbiter

pub mod arbiter;
pub mod coordinator;
pub mod machine;
pub mod session;

pub use arbiter::{ArbiterRegistry, RaceArbiter};
pub use coordinator::RaceCoordinator;
pub use machine::{RaceNotice, RacePhase, RaceStateMachine};
pub use session::{RaceSession, VoteState};
