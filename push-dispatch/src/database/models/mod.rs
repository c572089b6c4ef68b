//! Database models.
//!
//! These map directly onto the schema in `migrations/`.

pub mod dispatch_log;
pub mod preference;
pub mod settings;
pub mod subscription;

pub use dispatch_log::*;
pub use preference::*;
pub use settings::*;
pub use subscription::*;
