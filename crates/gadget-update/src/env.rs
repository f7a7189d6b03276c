//! The two capabilities the engine needs from its embedding caller: somewhere to send
//! diagnostic notices, and a way to turn a volume/structure name into a concrete device path.
//!
//! Both are trait objects injected at construction time, the same way `hadris_io`'s
//! `Reader`/`Writer` traits decouple filesystem logic from any concrete I/O backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::EnvError;

/// A single-method logging capability. Rollback failures are reported through this, never
/// returned as an error (see [`crate::orchestrate::Orchestrator`]).
pub trait Logger: Send + Sync {
    fn notice(&self, message: &str);
}

impl<T: Logger + ?Sized> Logger for std::sync::Arc<T> {
    fn notice(&self, message: &str) {
        (**self).notice(message);
    }
}

/// Forwards to the `log` crate at `warn` level, matching how `hadris-iso-cli` wires up logging
/// for its own binary before calling into library code.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn notice(&self, message: &str) {
        log::warn!("{message}");
    }
}

/// Captures notices into an in-memory buffer, for tests that need to assert on log content
/// without a real logger attached.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    messages: std::sync::Mutex<Vec<String>>,
}

impl CapturingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Logger for CapturingLogger {
    fn notice(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Resolves the block device path or mountpoint backing a volume/structure. The engine treats
/// provisioning of this information as an external collaborator; this trait is where that
/// boundary is drawn in code.
pub trait DeviceLocator: Send + Sync {
    fn block_device_for(&self, volume_name: &str) -> Result<PathBuf, EnvError>;
    fn mountpoint_for(&self, volume_name: &str, structure_name: &str) -> Result<PathBuf, EnvError>;
}

/// A [`DeviceLocator`] backed by a fixed map of names to paths, for the common case where the
/// caller already knows where everything lives.
#[derive(Debug, Default, Clone)]
pub struct StaticDeviceLocator {
    block_devices: HashMap<String, PathBuf>,
    mountpoints: HashMap<(String, String), PathBuf>,
}

impl StaticDeviceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_device(mut self, volume_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.block_devices.insert(volume_name.into(), path.into());
        self
    }

    pub fn with_mountpoint(
        mut self,
        volume_name: impl Into<String>,
        structure_name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.mountpoints
            .insert((volume_name.into(), structure_name.into()), path.into());
        self
    }
}

impl DeviceLocator for StaticDeviceLocator {
    fn block_device_for(&self, volume_name: &str) -> Result<PathBuf, EnvError> {
        self.block_devices
            .get(volume_name)
            .cloned()
            .ok_or_else(|| EnvError::NoBlockDevice(volume_name.to_string()))
    }

    fn mountpoint_for(&self, volume_name: &str, structure_name: &str) -> Result<PathBuf, EnvError> {
        self.mountpoints
            .get(&(volume_name.to_string(), structure_name.to_string()))
            .cloned()
            .ok_or_else(|| EnvError::NoMountpoint {
                volume: volume_name.to_string(),
                structure: structure_name.to_string(),
            })
    }
}

/// Escapes a `Target` path into a filesystem-safe directory name under `rollbackDir`, used by
/// the mounted-filesystem updater to namespace backups per target.
pub fn escape_target(target: &str) -> String {
    target
        .trim_start_matches('/')
        .replace('/', "_")
        .replace("..", "_")
}

pub fn structure_dir(rollback_dir: &Path, index: usize) -> PathBuf {
    rollback_dir.join(format!("structure-{index}"))
}
