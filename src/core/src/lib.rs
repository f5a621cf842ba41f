//! # Warden Core
//!
//! Shared identifiers, the injectable clock, and error handling used by the
//! Warden permission engine and its storage backends.

pub mod types;
pub mod traits;
pub mod error;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use traits::{Clock, ManualClock, SystemClock};
pub use types::{ActorId, GroupId};
