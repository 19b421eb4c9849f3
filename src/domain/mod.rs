//! Records and rules shared by the server and client tiers.

pub mod events;
pub mod models;
pub mod progression;

pub use events::{ChangeEvent, ChangeKind};
pub use models::*;
