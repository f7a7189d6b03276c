//! Mounted-filesystem updater: syncs gadget root content into an already-mounted filesystem
//! partition, backing up whatever it overwrites so it can be restored on rollback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use walkdir::WalkDir;

use crate::env::{escape_target, structure_dir, Logger};
use crate::error::UpdateError;
use crate::types::{FilesystemContent, PositionedStructure, UnpackFormat, VolumeContent};

use super::StructureUpdater;

/// One recorded backup action, persisted to the structure's manifest so rollback can run even
/// if the process that performed the backup is long gone.
#[derive(Debug, Clone)]
enum FsAction {
    /// `target` existed before the update; its prior contents were moved to `backup_path`.
    Moved { target: String, backup_path: PathBuf },
    /// `target` did not exist before the update; rollback must delete whatever update created.
    Tombstone { target: String },
}

pub struct FilesystemUpdater {
    structure: PositionedStructure,
    mountpoint: PathBuf,
    gadget_root_dir: PathBuf,
    rollback_dir: PathBuf,
    logger: Arc<dyn Logger>,
    actions: Vec<FsAction>,
}

impl FilesystemUpdater {
    pub fn new(
        structure: PositionedStructure,
        mountpoint: PathBuf,
        gadget_root_dir: PathBuf,
        rollback_dir: PathBuf,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            structure,
            mountpoint,
            gadget_root_dir,
            rollback_dir,
            logger,
            actions: Vec::new(),
        }
    }

    fn dir(&self) -> PathBuf {
        structure_dir(&self.rollback_dir, self.structure.index)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir().join("manifest")
    }

    fn is_preserved(&self, target: &str) -> bool {
        self.structure.structure.update.preserve.iter().any(|p| p == target)
    }

    fn fs_contents(&self) -> impl Iterator<Item = &FilesystemContent> {
        self.structure.structure.content.iter().filter_map(|c| match c {
            VolumeContent::Filesystem(fs) => Some(fs),
            VolumeContent::Raw(_) => None,
        })
    }

    fn load_manifest(&self) -> std::io::Result<Option<Vec<FsAction>>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let mut actions = Vec::new();
        for line in text.lines() {
            let mut fields = line.splitn(3, '\t');
            match fields.next() {
                Some("moved") => {
                    let target = fields.next().unwrap_or_default().to_string();
                    let backup_path = PathBuf::from(fields.next().unwrap_or_default());
                    actions.push(FsAction::Moved { target, backup_path });
                }
                Some("tombstone") => {
                    let target = fields.next().unwrap_or_default().to_string();
                    actions.push(FsAction::Tombstone { target });
                }
                _ => continue,
            }
        }
        Ok(Some(actions))
    }

    fn save_manifest(&self) -> std::io::Result<()> {
        let mut text = String::new();
        for action in &self.actions {
            match action {
                FsAction::Moved { target, backup_path } => {
                    text.push_str(&format!("moved\t{target}\t{}\n", backup_path.display()));
                }
                FsAction::Tombstone { target } => {
                    text.push_str(&format!("tombstone\t{target}\n"));
                }
            }
        }
        std::fs::write(self.manifest_path(), text)
    }
}

impl StructureUpdater for FilesystemUpdater {
    fn backup(&mut self) -> Result<(), UpdateError> {
        if let Some(actions) = self.load_manifest()? {
            self.actions = actions;
            return Ok(());
        }

        let dir = self.dir();
        std::fs::create_dir_all(&dir)?;

        let mut actions = Vec::new();
        for content in self.fs_contents() {
            if self.is_preserved(&content.target) {
                continue;
            }
            if actions
                .iter()
                .any(|a| matches!(a, FsAction::Moved { target, .. } | FsAction::Tombstone { target } if target == &content.target))
            {
                continue;
            }

            let absolute_target = self.mountpoint.join(content.target.trim_start_matches('/'));
            if absolute_target.exists() {
                let backup_path = dir.join(escape_target(&content.target));
                if let Some(parent) = backup_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                move_path(&absolute_target, &backup_path)?;
                actions.push(FsAction::Moved {
                    target: content.target.clone(),
                    backup_path,
                });
            } else {
                actions.push(FsAction::Tombstone {
                    target: content.target.clone(),
                });
            }
        }

        self.actions = actions;
        self.save_manifest()?;
        Ok(())
    }

    fn update(&mut self) -> Result<(), UpdateError> {
        let mut did_work = false;

        for content in self.fs_contents() {
            if self.is_preserved(&content.target) {
                continue;
            }

            let absolute_target = self.mountpoint.join(content.target.trim_start_matches('/'));
            if let Some(parent) = absolute_target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let source_path = self.gadget_root_dir.join(&content.source);

            match content.unpack {
                Some(format) => {
                    std::fs::create_dir_all(&absolute_target)?;
                    unpack_archive(&source_path, &absolute_target, format)?;
                }
                None => copy_path(&source_path, &absolute_target)?,
            }
            did_work = true;
        }

        if !did_work {
            return Err(UpdateError::NoUpdate);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), UpdateError> {
        if self.actions.is_empty() {
            if let Some(actions) = self.load_manifest()? {
                self.actions = actions;
            } else {
                return Ok(());
            }
        }

        for action in &self.actions {
            match action {
                FsAction::Moved { target, backup_path } => {
                    let absolute_target = self.mountpoint.join(target.trim_start_matches('/'));
                    if absolute_target.exists() {
                        remove_path(&absolute_target)?;
                    }
                    if let Some(parent) = absolute_target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    move_path(backup_path, &absolute_target)?;
                }
                FsAction::Tombstone { target } => {
                    let absolute_target = self.mountpoint.join(target.trim_start_matches('/'));
                    if absolute_target.exists() {
                        remove_path(&absolute_target)?;
                    } else {
                        self.logger
                            .notice(&format!("rollback: tombstone target \"{target}\" already absent"));
                    }
                }
            }
        }
        Ok(())
    }
}

fn move_path(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_path(from, to)?;
            remove_path(from)
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Recursively copies `source` into `target`. Files are written to a `.tmp` sibling and
/// renamed into place so a crash mid-copy never leaves a half-written file at the final path.
fn copy_path(source: &Path, target: &Path) -> std::io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    if metadata.is_dir() {
        std::fs::create_dir_all(target)?;
        for entry in WalkDir::new(source).min_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry.path().strip_prefix(source).expect("walkdir yields children of source");
            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else {
                copy_file_atomic(entry.path(), &dest)?;
            }
        }
        Ok(())
    } else {
        copy_file_atomic(source, target)
    }
}

fn copy_file_atomic(source: &Path, target: &Path) -> std::io::Result<()> {
    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = target.with_file_name(tmp_name);
    std::fs::copy(source, &tmp)?;
    std::fs::rename(&tmp, target)
}

fn unpack_archive(archive: &Path, target: &Path, format: UnpackFormat) -> Result<(), UpdateError> {
    let file = std::fs::File::open(archive)?;
    match format {
        UnpackFormat::Tar => {
            let mut archive = tar::Archive::new(file);
            archive
                .unpack(target)
                .map_err(|e| UpdateError::Archive(e.to_string()))?;
        }
        UnpackFormat::TarGz => {
            let decoder = GzDecoder::new(file);
            let mut archive = tar::Archive::new(decoder);
            archive
                .unpack(target)
                .map_err(|e| UpdateError::Archive(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::CapturingLogger;
    use crate::types::{Offset, Role, Size, UpdateInfo, VolumeStructure, VolumeStructureType};

    fn make_structure(content: Vec<VolumeContent>, preserve: Vec<String>) -> PositionedStructure {
        PositionedStructure {
            structure: VolumeStructure {
                name: Some("writable".to_string()),
                ty: VolumeStructureType::Bare,
                role: Role::SystemData,
                id: None,
                size: Size::MIB,
                offset: None,
                offset_write: None,
                filesystem: Some("ext4".to_string()),
                label: None,
                content,
                update: UpdateInfo { edition: 1, preserve },
            },
            start_offset: Offset::ZERO,
            index: 0,
            positioned_content: Vec::new(),
        }
    }

    fn logger() -> Arc<dyn Logger> {
        Arc::new(CapturingLogger::new())
    }

    #[test]
    fn update_copies_file_and_rollback_restores_prior_contents() {
        let gadget_root = tempfile::tempdir().unwrap();
        let mountpoint = tempfile::tempdir().unwrap();
        let rollback_dir = tempfile::tempdir().unwrap();

        std::fs::write(gadget_root.path().join("new.conf"), b"new").unwrap();
        std::fs::write(mountpoint.path().join("app.conf"), b"old").unwrap();

        let content = vec![VolumeContent::Filesystem(FilesystemContent {
            source: "new.conf".to_string(),
            target: "app.conf".to_string(),
            unpack: None,
        })];
        let structure = make_structure(content, Vec::new());
        let mut updater = FilesystemUpdater::new(
            structure,
            mountpoint.path().to_path_buf(),
            gadget_root.path().to_path_buf(),
            rollback_dir.path().to_path_buf(),
            logger(),
        );

        updater.backup().unwrap();
        updater.update().unwrap();
        assert_eq!(std::fs::read(mountpoint.path().join("app.conf")).unwrap(), b"new");

        updater.rollback().unwrap();
        assert_eq!(std::fs::read(mountpoint.path().join("app.conf")).unwrap(), b"old");
    }

    #[test]
    fn rollback_deletes_tombstone_for_previously_absent_target() {
        let gadget_root = tempfile::tempdir().unwrap();
        let mountpoint = tempfile::tempdir().unwrap();
        let rollback_dir = tempfile::tempdir().unwrap();

        std::fs::write(gadget_root.path().join("new.conf"), b"new").unwrap();

        let content = vec![VolumeContent::Filesystem(FilesystemContent {
            source: "new.conf".to_string(),
            target: "brand-new.conf".to_string(),
            unpack: None,
        })];
        let structure = make_structure(content, Vec::new());
        let mut updater = FilesystemUpdater::new(
            structure,
            mountpoint.path().to_path_buf(),
            gadget_root.path().to_path_buf(),
            rollback_dir.path().to_path_buf(),
            logger(),
        );

        updater.backup().unwrap();
        updater.update().unwrap();
        assert!(mountpoint.path().join("brand-new.conf").exists());

        updater.rollback().unwrap();
        assert!(!mountpoint.path().join("brand-new.conf").exists());
    }

    #[test]
    fn preserved_targets_are_never_touched() {
        let gadget_root = tempfile::tempdir().unwrap();
        let mountpoint = tempfile::tempdir().unwrap();
        let rollback_dir = tempfile::tempdir().unwrap();

        std::fs::write(gadget_root.path().join("new.conf"), b"new").unwrap();
        std::fs::write(mountpoint.path().join("keep.conf"), b"untouched").unwrap();

        let content = vec![VolumeContent::Filesystem(FilesystemContent {
            source: "new.conf".to_string(),
            target: "keep.conf".to_string(),
            unpack: None,
        })];
        let structure = make_structure(content, vec!["keep.conf".to_string()]);
        let mut updater = FilesystemUpdater::new(
            structure,
            mountpoint.path().to_path_buf(),
            gadget_root.path().to_path_buf(),
            rollback_dir.path().to_path_buf(),
            logger(),
        );

        updater.backup().unwrap();
        let err = updater.update().unwrap_err();
        assert!(matches!(err, UpdateError::NoUpdate));
        assert_eq!(std::fs::read(mountpoint.path().join("keep.conf")).unwrap(), b"untouched");
    }

    #[test]
    fn directory_source_is_copied_recursively() {
        let gadget_root = tempfile::tempdir().unwrap();
        let mountpoint = tempfile::tempdir().unwrap();
        let rollback_dir = tempfile::tempdir().unwrap();

        std::fs::create_dir_all(gadget_root.path().join("data/nested")).unwrap();
        std::fs::write(gadget_root.path().join("data/a.txt"), b"a").unwrap();
        std::fs::write(gadget_root.path().join("data/nested/b.txt"), b"b").unwrap();

        let content = vec![VolumeContent::Filesystem(FilesystemContent {
            source: "data".to_string(),
            target: "data".to_string(),
            unpack: None,
        })];
        let structure = make_structure(content, Vec::new());
        let mut updater = FilesystemUpdater::new(
            structure,
            mountpoint.path().to_path_buf(),
            gadget_root.path().to_path_buf(),
            rollback_dir.path().to_path_buf(),
            logger(),
        );

        updater.backup().unwrap();
        updater.update().unwrap();
        assert_eq!(std::fs::read(mountpoint.path().join("data/a.txt")).unwrap(), b"a");
        assert_eq!(
            std::fs::read(mountpoint.path().join("data/nested/b.txt")).unwrap(),
            b"b"
        );
    }
}
