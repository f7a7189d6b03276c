//! Error types for each stage of the engine, following the layered `thiserror` shape
//! `hadris_iso::IsoImageError` uses for its own crate-level error.

use thiserror::Error;

/// Failure to lay out a [`crate::types::Volume`] into a [`crate::types::PositionedVolume`].
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("structure offset {offset} is less than the minimum next offset {minimum}")]
    OffsetBeforeCursor { offset: u64, minimum: u64 },

    #[error("cannot position structure #{index} (\"{name}\"): content \"{image}\": {source}")]
    ContentImage {
        index: usize,
        name: String,
        image: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "cannot position structure #{index} (\"{name}\"): content \"{image}\" declares size {declared} smaller than image size {actual}"
    )]
    ContentTooSmall {
        index: usize,
        name: String,
        image: String,
        declared: u64,
        actual: u64,
    },

    #[error(
        "cannot position structure #{index} (\"{name}\"): content \"{image}\" overflows the structure"
    )]
    ContentOverflow {
        index: usize,
        name: String,
        image: String,
    },

    #[error(
        "cannot position structure #{index} (\"{name}\"): offset-write relative to unknown structure \"{relative_to}\""
    )]
    UnknownRelativeTo {
        index: usize,
        name: String,
        relative_to: String,
    },

    #[error("structures overlap or are out of order at index {index}")]
    Overlap { index: usize },
}

/// A single human-readable attribute mismatch, rendered verbatim per the engine's documented
/// error message grammar.
#[derive(Debug, Error)]
pub enum CompatError {
    #[error("cannot change volume schema from \"{old}\" to \"{new}\"")]
    Schema { old: String, new: String },

    #[error("cannot change volume ID from \"{old}\" to \"{new}\"")]
    VolumeId { old: String, new: String },

    #[error("cannot change the number of structures within volume from {old} to {new}")]
    StructureCount { old: usize, new: usize },

    #[error("cannot change structure size from {old} to {new}")]
    Size { old: u64, new: u64 },

    #[error("cannot change structure offset from {old} to {new}")]
    Offset { old: String, new: String },

    #[error("cannot change structure start offset from {old} to {new}")]
    StartOffset { old: u64, new: u64 },

    #[error("cannot change structure offset-write from {old} to {new}")]
    OffsetWrite { old: String, new: String },

    #[error("cannot change structure role from \"{old}\" to \"{new}\"")]
    Role { old: String, new: String },

    #[error("cannot change structure type from \"{old}\" to \"{new}\"")]
    Type { old: String, new: String },

    #[error("cannot change structure ID from \"{old}\" to \"{new}\"")]
    Id { old: String, new: String },

    #[error("cannot change a bare structure to filesystem one")]
    BareToFilesystem,

    #[error("cannot change a filesystem structure to a bare one")]
    FilesystemToBare,

    #[error("cannot change filesystem from \"{old}\" to \"{new}\"")]
    Filesystem { old: String, new: String },

    #[error("cannot change filesystem label from \"{old}\" to \"{new}\"")]
    Label { old: String, new: String },
}

/// Errors raised from within a [`crate::update::StructureUpdater`] phase. Boxed into this enum
/// at the updater boundary so the orchestrator only ever handles one error type per phase.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("backup is inconsistent or incomplete: {0}")]
    InconsistentBackup(String),

    #[error("archive error: {0}")]
    Archive(String),

    /// Sentinel: after examining gadget roots and edition, there was nothing to do.
    #[error("no update needed")]
    NoUpdate,
}

/// Errors from [`crate::update::UpdaterFactory::for_structure`].
#[derive(Debug, Error)]
pub enum UpdaterFactoryError {
    #[error("internal error: backup directory cannot be unset")]
    NoRollbackDir,

    #[error("internal error: gadget content directory cannot be unset")]
    NoGadgetRootDir,

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Errors from a [`crate::env::DeviceLocator`] lookup.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("no block device known for volume \"{0}\"")]
    NoBlockDevice(String),

    #[error("no mountpoint known for volume \"{volume}\" structure \"{structure}\"")]
    NoMountpoint { volume: String, structure: String },
}

/// Top-level error returned by [`crate::orchestrate::Orchestrator::update`].
#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("cannot lay out the old volume: {0}")]
    LayoutOld(#[source] LayoutError),

    #[error("cannot lay out the new volume: {0}")]
    LayoutNew(#[source] LayoutError),

    #[error("cannot find entry for volume \"{0}\" in updated gadget info")]
    VolumeNotFound(String),

    #[error("cannot update with more than one volume")]
    MultipleVolumes,

    #[error("cannot apply update to volume: {0}")]
    VolumeIncompatible(#[source] CompatError),

    #[error("cannot update volume structure #{index} (\"{name}\"): {source}")]
    StructureIncompatible {
        index: usize,
        name: String,
        #[source]
        source: CompatError,
    },

    #[error("cannot prepare update for volume structure #{index} (\"{name}\"): {source}")]
    PrepareFailed {
        index: usize,
        name: String,
        #[source]
        source: UpdaterFactoryError,
    },

    #[error("cannot backup volume structure #{index} (\"{name}\"): {source}")]
    BackupFailed {
        index: usize,
        name: String,
        #[source]
        source: UpdateError,
    },

    #[error("cannot update volume structure #{index} (\"{name}\"): {source}")]
    UpdateFailed {
        index: usize,
        name: String,
        #[source]
        source: UpdateError,
    },

    /// `ErrNoUpdate` — no structure had a higher edition; nothing was done.
    #[error("no update needed")]
    NoUpdate,
}

impl OrchestrateError {
    /// True for the `ErrNoUpdate` sentinel, letting callers distinguish "nothing to do" from
    /// "failed" without matching on the full enum.
    pub fn is_no_update(&self) -> bool {
        matches!(self, OrchestrateError::NoUpdate)
    }
}
