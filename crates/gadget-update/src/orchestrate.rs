//! The top-level transaction manager: lays out both volumes, checks compatibility, selects the
//! update set, and drives the two-pass backup/update execution with ordered rollback on failure.

use std::path::Path;

use crate::compat::{can_update_structure, can_update_volume};
use crate::env::Logger;
use crate::error::{OrchestrateError, UpdateError};
use crate::layout;
use crate::types::{GadgetData, PositionedStructure};
use crate::update::{StructureUpdater, UpdaterFactory};

/// Drives one gadget transition: `resolve → compatibility check → structure selection →
/// backup-all → update-all (rollback on first failure)`.
///
/// Constructed with the capabilities the transition needs injected (factory, logger) rather than
/// read from process-wide state, per this engine's dependency-injection design.
pub struct Orchestrator {
    factory: Box<dyn UpdaterFactory>,
    logger: Box<dyn Logger>,
}

impl Orchestrator {
    pub fn new(factory: Box<dyn UpdaterFactory>, logger: Box<dyn Logger>) -> Self {
        Self { factory, logger }
    }

    /// Applies the transition from `old_data` to `new_data`, using `rollback_dir` as scratch
    /// space for backup artifacts. Returns [`OrchestrateError::NoUpdate`] if no structure was
    /// eligible — the engine's `ErrNoUpdate` sentinel.
    pub fn update(
        &self,
        old_data: &GadgetData,
        new_data: &GadgetData,
        rollback_dir: &Path,
    ) -> Result<(), OrchestrateError> {
        let old_volume_name = sole_volume_name(&old_data.info)?;

        let new_volume = new_data
            .info
            .volumes
            .get(&old_volume_name)
            .ok_or_else(|| OrchestrateError::VolumeNotFound(old_volume_name.clone()))?;
        let old_volume = &old_data.info.volumes[&old_volume_name];

        let old_positioned = layout::resolve(old_volume, &old_data.root_dir).map_err(OrchestrateError::LayoutOld)?;
        let new_positioned = layout::resolve(new_volume, &new_data.root_dir).map_err(OrchestrateError::LayoutNew)?;

        can_update_volume(&old_positioned, &new_positioned).map_err(OrchestrateError::VolumeIncompatible)?;

        let mut selected: Vec<(PositionedStructure, PositionedStructure)> = Vec::new();
        for (old_s, new_s) in old_positioned.structures.iter().zip(new_positioned.structures.iter()) {
            can_update_structure(old_s, new_s).map_err(|source| OrchestrateError::StructureIncompatible {
                index: new_s.index,
                name: new_s.name_str().to_string(),
                source,
            })?;

            // Open question (i) in this engine's design notes: a decreasing edition silently
            // skips rather than erroring, matching the upstream behavior this crate preserves.
            if new_s.structure.update.edition > old_s.structure.update.edition {
                selected.push((old_s.clone(), new_s.clone()));
            }
        }

        if selected.is_empty() {
            return Err(OrchestrateError::NoUpdate);
        }

        let mut updaters: Vec<(usize, String, Box<dyn StructureUpdater>)> = Vec::with_capacity(selected.len());
        for (_, new_s) in &selected {
            let updater = self
                .factory
                .for_structure(&old_volume_name, new_s, Some(&new_data.root_dir), rollback_dir)
                .map_err(|source| OrchestrateError::PrepareFailed {
                    index: new_s.index,
                    name: new_s.name_str().to_string(),
                    source,
                })?;
            updaters.push((new_s.index, new_s.name_str().to_string(), updater));
        }

        for entry in updaters.iter_mut() {
            let (index, name, updater) = entry;
            updater.backup().map_err(|source| OrchestrateError::BackupFailed {
                index: *index,
                name: name.clone(),
                source,
            })?;
        }

        for completed in 0..updaters.len() {
            let (index, name, updater) = &mut updaters[completed];
            let result = updater.update();
            let (index, name) = (*index, name.clone());

            // A per-structure `ErrNoUpdate` is the updater's own "nothing to do" signal (e.g.
            // a raw content region already matches the new image byte-for-byte); the
            // orchestrator treats it as success-with-skip, not a failure to roll back.
            if let Err(UpdateError::NoUpdate) = result {
                continue;
            }

            if let Err(source) = result {
                let primary = OrchestrateError::UpdateFailed {
                    index,
                    name,
                    source,
                };

                for (rollback_index, rollback_name, rollback_updater) in updaters.iter_mut().take(completed + 1) {
                    if let Err(rollback_err) = rollback_updater.rollback() {
                        self.logger.notice(&format!(
                            "cannot rollback volume structure #{rollback_index} (\"{rollback_name}\") update: {rollback_err}"
                        ));
                    }
                }

                return Err(primary);
            }
        }

        Ok(())
    }
}

fn sole_volume_name(info: &crate::types::GadgetInfo) -> Result<String, OrchestrateError> {
    if info.volumes.len() > 1 {
        return Err(OrchestrateError::MultipleVolumes);
    }
    info.volumes
        .keys()
        .next()
        .cloned()
        .ok_or(OrchestrateError::MultipleVolumes)
}
