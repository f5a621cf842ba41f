//! # Warden Permission Engine
//!
//! Resolves hierarchical, wildcard-capable permissions for actors that
//! belong to prioritized, inheriting groups.
//!
//! ## Features
//!
//! - **Permission algebra** with `.*` wildcards, the universal `*` and `-` denials
//! - **Acyclic group graph** with priorities, multiple inheritance and cascade delete
//! - **Temporary grants and memberships** that lapse on an injected clock
//! - **Context-scoped permissions** (per world or server)
//! - **TTL cache** with epoch-checked invalidation
//! - **Expiry janitor** running on the tokio runtime
//! - **Pluggable storage** chosen from a startup registry (`memory`, `json`)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_authz::{Engine, EngineConfig, MemoryStorage};
//! use warden_core::{ActorId, SystemClock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::activate(
//!         EngineConfig::default(),
//!         Arc::new(MemoryStorage::new()),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let admin = engine.create_group("admin")?;
//!     engine.add_group_permission(admin, "server.*")?;
//!
//!     let alice = ActorId::generate();
//!     engine.register_actor(alice, "alice")?;
//!     engine.add_group_membership(alice, admin)?;
//!
//!     assert!(engine.has_permission(alice, "server.stop", None));
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod actors;
pub mod algebra;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod janitor;
pub mod model;
pub mod resolver;
pub mod storage;

// Re-export commonly used types
pub use algebra::Verdict;
pub use cache::{CacheStats, PermissionCache};
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats, PermissionCheck};
pub use error::{AuthzError, Result, ValidationError};
pub use graph::{GraphError, GroupGraph};
pub use janitor::ExpiryJanitor;
pub use model::{Actor, DisplayOverrides, Group, GroupDisplay};
pub use resolver::{EffectiveResolver, RawSet};
pub use storage::{GroupKey, JsonStorage, MemoryStorage, Storage, StorageRegistry};
