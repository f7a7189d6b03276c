//! Applies an updated gadget layout — a declarative description of a device's block storage
//! and filesystem contents — to a running system, with full backup and rollback on any failure.
//!
//! The engine is deliberately agnostic to three things outside its scope: how a [`GadgetInfo`]
//! is parsed from a gadget description file, how the rollback scratch directory is provisioned,
//! and how a volume/structure name is mapped to a concrete block device or mountpoint (the
//! [`env::DeviceLocator`] capability covers that last one).
//!
//! ```text
//! (oldData, newData, rollbackDir)
//!     -> layout::resolve x2
//!     -> compat::can_update_volume / can_update_structure
//!     -> update::UpdaterFactory::for_structure per selected structure
//!     -> orchestrate::Orchestrator::update (backup all, then update all, rollback on failure)
//! ```

pub mod compat;
pub mod env;
pub mod error;
pub mod layout;
pub mod orchestrate;
pub mod types;
pub mod update;

pub use env::{DeviceLocator, Logger};
pub use error::OrchestrateError;
pub use orchestrate::Orchestrator;
pub use types::{GadgetData, GadgetInfo, Volume, VolumeStructure};
pub use update::{DefaultUpdaterFactory, UpdaterFactory};
