//! Room lifecycle management and the persistent store boundary

pub mod lifecycle;
pub mod store;

pub use lifecycle::{MemberAction, RoomLifecycleManager};
pub use store::{InMemoryRoomStore, RoomStore};
