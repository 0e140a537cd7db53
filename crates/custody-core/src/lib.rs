//! Bookkeeping core of the containment engine.
//!
//! A *family* is a root process registered for monitoring together with every
//! process it spawns and every file it creates. The [`FamilyRegistry`] tracks
//! families and answers the ownership questions the process and filesystem
//! collaborators ask before allowing an action.

pub mod bounded_set;
pub mod config;
pub mod control;
pub mod error;
pub mod family;
pub mod ids;
pub mod process_control;
pub mod registry;
pub mod verdict;

pub use config::{ConfigError, ModuleConfig};
pub use error::{AddError, AddResult, AddResultExt};
pub use family::{FamilyNode, FamilySummary, RespawnPolicy};
pub use ids::{FileId, Pid};
pub use process_control::{ProcessControl, ProcessControlError, SignalProcessControl};
pub use registry::{FamilyRegistry, RegistryLimits, WaitOutcome};
pub use verdict::Verdict;
