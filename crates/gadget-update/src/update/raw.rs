//! Raw-image updater: writes the new image content to a bare structure's region of the
//! underlying block device, with backup of the pre-update bytes for rollback.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::env::structure_dir;
use crate::error::UpdateError;
use crate::types::PositionedStructure;

use super::StructureUpdater;

/// One backed-up region, recorded in the structure's manifest file.
#[derive(Debug, Clone)]
struct BackupEntry {
    /// Absolute offset on the block device.
    absolute_offset: u64,
    length: u64,
    backup_file: PathBuf,
    /// True if the existing region already matched the new image; `update` skips it.
    noop: bool,
}

pub struct RawImageUpdater {
    structure: PositionedStructure,
    device_path: PathBuf,
    gadget_root_dir: PathBuf,
    rollback_dir: PathBuf,
    entries: Vec<BackupEntry>,
}

impl RawImageUpdater {
    pub fn new(
        structure: PositionedStructure,
        device_path: PathBuf,
        gadget_root_dir: PathBuf,
        rollback_dir: PathBuf,
    ) -> Self {
        Self {
            structure,
            device_path,
            gadget_root_dir,
            rollback_dir,
            entries: Vec::new(),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        structure_dir(&self.rollback_dir, self.structure.index).join("manifest")
    }

    fn load_manifest(&self) -> std::io::Result<Option<Vec<BackupEntry>>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 4 {
                continue;
            }
            entries.push(BackupEntry {
                absolute_offset: fields[0].parse().unwrap_or(0),
                length: fields[1].parse().unwrap_or(0),
                backup_file: PathBuf::from(fields[2]),
                noop: fields[3] == "noop",
            });
        }
        Ok(Some(entries))
    }

    fn save_manifest(&self) -> std::io::Result<()> {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                entry.absolute_offset,
                entry.length,
                entry.backup_file.display(),
                if entry.noop { "noop" } else { "live" }
            ));
        }
        std::fs::write(self.manifest_path(), text)
    }
}

impl StructureUpdater for RawImageUpdater {
    fn backup(&mut self) -> Result<(), UpdateError> {
        if let Some(entries) = self.load_manifest()? {
            self.entries = entries;
            return Ok(());
        }

        let dir = structure_dir(&self.rollback_dir, self.structure.index);
        std::fs::create_dir_all(&dir)?;

        let mut device = File::open(&self.device_path)?;
        let mut entries = Vec::with_capacity(self.structure.positioned_content.len());

        for content in &self.structure.positioned_content {
            let absolute_offset = self.structure.start_offset.bytes() + content.offset.bytes();
            let length = content.size.bytes();

            let mut current = vec![0u8; length as usize];
            device.seek(SeekFrom::Start(absolute_offset))?;
            device.read_exact(&mut current)?;

            let image_path = self.gadget_root_dir.join(&content.content.image);
            let mut new_contents = vec![0u8; length as usize];
            let mut image_file = File::open(&image_path)?;
            image_file.read_exact(&mut new_contents)?;

            let noop = sha256(&current) == sha256(&new_contents);

            let backup_name = format!(
                "{}.backup",
                std::path::Path::new(&content.content.image)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("content")
            );
            let backup_file = dir.join(&backup_name);
            std::fs::write(&backup_file, &current)?;

            entries.push(BackupEntry {
                absolute_offset,
                length,
                backup_file,
                noop,
            });
        }

        self.entries = entries;
        self.save_manifest()?;
        Ok(())
    }

    fn update(&mut self) -> Result<(), UpdateError> {
        if self.entries.is_empty() {
            return Err(UpdateError::NoUpdate);
        }
        if self.entries.iter().all(|e| e.noop) {
            return Err(UpdateError::NoUpdate);
        }

        let mut device = OpenOptions::new().write(true).open(&self.device_path)?;

        for (entry, content) in self.entries.iter().zip(self.structure.positioned_content.iter()) {
            if entry.noop {
                continue;
            }
            let image_path = self.gadget_root_dir.join(&content.content.image);
            let mut image_file = File::open(&image_path)?;
            let mut buf = vec![0u8; entry.length as usize];
            image_file.read_exact(&mut buf)?;

            device.seek(SeekFrom::Start(entry.absolute_offset))?;
            device.write_all(&buf)?;
            device.sync_data()?;
        }

        Ok(())
    }

    fn rollback(&mut self) -> Result<(), UpdateError> {
        if self.entries.is_empty() {
            if let Some(entries) = self.load_manifest()? {
                self.entries = entries;
            } else {
                return Ok(());
            }
        }

        let mut device = OpenOptions::new().write(true).open(&self.device_path)?;

        for entry in &self.entries {
            let data = std::fs::read(&entry.backup_file)?;
            device.seek(SeekFrom::Start(entry.absolute_offset))?;
            device.write_all(&data)?;
            device.sync_data()?;
        }

        Ok(())
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
