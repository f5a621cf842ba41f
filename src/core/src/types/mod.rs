//! Shared identifier types

pub mod ids;

pub use ids::{ActorId, GroupId};
