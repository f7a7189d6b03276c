//! The three-phase updater contract and the factory that selects an implementation per
//! structure.

pub mod fs;
pub mod raw;

use std::path::Path;
use std::sync::Arc;

use crate::env::{DeviceLocator, Logger};
use crate::error::{UpdateError, UpdaterFactoryError};
use crate::types::PositionedStructure;

/// Uniform three-phase contract both updater strategies implement.
pub trait StructureUpdater {
    /// Captures enough state to restore the structure's pre-update contents into
    /// `rollbackDir/structure-<index>/`. Idempotent: a second call when the backup is already
    /// complete and consistent is a no-op.
    fn backup(&mut self) -> Result<(), UpdateError>;

    /// Applies the new contents. Returns [`UpdateError::NoUpdate`] if there is nothing to do.
    fn update(&mut self) -> Result<(), UpdateError>;

    /// Restores the captured state. Must tolerate being called after either a successful
    /// `backup` alone or a partial `update`.
    fn rollback(&mut self) -> Result<(), UpdateError>;
}

/// Builds the right [`StructureUpdater`] for a [`PositionedStructure`]. Indirected through a
/// trait object passed into the orchestrator's constructor (dependency injection) rather than
/// a process-wide hook, so tests can supply a stub factory.
pub trait UpdaterFactory {
    fn for_structure(
        &self,
        volume_name: &str,
        ps: &PositionedStructure,
        gadget_root_dir: Option<&Path>,
        rollback_dir: &Path,
    ) -> Result<Box<dyn StructureUpdater>, UpdaterFactoryError>;
}

/// Returns the raw updater for bare structures, the filesystem updater otherwise.
pub struct DefaultUpdaterFactory {
    pub locator: Arc<dyn DeviceLocator>,
    pub logger: Arc<dyn Logger>,
}

impl DefaultUpdaterFactory {
    pub fn new(locator: Arc<dyn DeviceLocator>, logger: Arc<dyn Logger>) -> Self {
        Self { locator, logger }
    }
}

impl UpdaterFactory for DefaultUpdaterFactory {
    fn for_structure(
        &self,
        volume_name: &str,
        ps: &PositionedStructure,
        gadget_root_dir: Option<&Path>,
        rollback_dir: &Path,
    ) -> Result<Box<dyn StructureUpdater>, UpdaterFactoryError> {
        if rollback_dir.as_os_str().is_empty() {
            return Err(UpdaterFactoryError::NoRollbackDir);
        }

        if ps.is_bare() {
            let gadget_root_dir = gadget_root_dir.ok_or(UpdaterFactoryError::NoGadgetRootDir)?;
            let device = self.locator.block_device_for(volume_name)?;
            Ok(Box::new(raw::RawImageUpdater::new(
                ps.clone(),
                device,
                gadget_root_dir.to_path_buf(),
                rollback_dir.to_path_buf(),
            )))
        } else {
            let gadget_root_dir = gadget_root_dir.ok_or(UpdaterFactoryError::NoGadgetRootDir)?;
            let mountpoint = self.locator.mountpoint_for(volume_name, ps.name_str())?;
            Ok(Box::new(fs::FilesystemUpdater::new(
                ps.clone(),
                mountpoint,
                gadget_root_dir.to_path_buf(),
                rollback_dir.to_path_buf(),
                self.logger.clone(),
            )))
        }
    }
}
