//! Repository layer for database access.
//!
//! The dispatch core depends only on the traits; the `Sqlx*` types are the
//! SQLite implementations.

pub mod dispatch_log;
pub mod farm;
pub mod preference;
pub mod settings;
pub mod subscription;

pub use dispatch_log::*;
pub use farm::*;
pub use preference::*;
pub use settings::*;
pub use subscription::*;

/// Max bound parameters per `IN (...)` chunk.
pub(crate) const IN_CLAUSE_CHUNK: usize = 500;
