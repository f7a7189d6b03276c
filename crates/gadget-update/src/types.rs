//! The declarative and positioned data model the rest of the crate operates on.

use std::collections::BTreeMap;

use hadris_common::part::gpt::Guid;

/// A non-negative byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Size(pub u64);

impl Size {
    pub const KIB: Size = Size(1024);
    pub const MIB: Size = Size(1024 * 1024);

    pub const fn bytes(self) -> u64 {
        self.0
    }
}

impl std::ops::Add for Size {
    type Output = Size;
    fn add(self, rhs: Size) -> Size {
        Size(self.0 + rhs.0)
    }
}

impl std::ops::Mul<u64> for Size {
    type Output = Size;
    fn mul(self, rhs: u64) -> Size {
        Size(self.0 * rhs)
    }
}

/// A non-negative byte position within a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

impl Offset {
    pub const ZERO: Offset = Offset(0);

    pub const fn bytes(self) -> u64 {
        self.0
    }
}

impl std::ops::Add<Size> for Offset {
    type Output = Offset;
    fn add(self, rhs: Size) -> Offset {
        Offset(self.0 + rhs.0)
    }
}

/// The `mbr`/GUID/hybrid/`bare` type tag carried by a [`VolumeStructure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeStructureType {
    /// `"bare"` — no partition table entry at all (e.g. u-boot env, MBR region).
    Bare,
    /// Two-hex-digit MBR partition type, e.g. `"0C"`.
    Mbr(u8),
    /// GUID Partition Table type GUID.
    Guid(Guid),
    /// `"HH,GUID"` — a hybrid MBR/GPT type, carried for hybrid schemas.
    Hybrid(u8, Guid),
    /// The legacy bare token `"mbr"`, distinct from `Role::Mbr`. Only ever seen on old-side
    /// structures; see [`crate::compat::can_update_structure`] for the one relaxation that
    /// lets it transition to `Bare` + `Role::Mbr`.
    MbrLegacy,
}

/// The structure's function, if any. Only a handful of values are meaningful to the engine;
/// anything else round-trips as [`Role::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    None,
    Mbr,
    SystemBoot,
    SystemData,
    Other(String),
}

impl Role {
    pub fn from_str(s: &str) -> Role {
        match s {
            "" => Role::None,
            "mbr" => Role::Mbr,
            "system-boot" => Role::SystemBoot,
            "system-data" => Role::SystemData,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::None => "",
            Role::Mbr => "mbr",
            Role::SystemBoot => "system-boot",
            Role::SystemData => "system-data",
            Role::Other(s) => s,
        }
    }
}

/// `{RelativeTo: name-or-empty, Offset}`, as declared on a structure or a raw content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeOffset {
    pub relative_to: String,
    pub offset: Offset,
}

/// `Image` content embedded in a bare structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    /// File name relative to the gadget root.
    pub image: String,
    pub offset: Option<Offset>,
    pub offset_write: Option<RelativeOffset>,
    pub size: Option<Size>,
}

/// File/directory content embedded in a filesystem structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemContent {
    /// Path relative to the gadget root; directory or single file.
    pub source: String,
    /// Path inside the mounted filesystem.
    pub target: String,
    /// Archive format to extract `source` with, if any.
    pub unpack: Option<UnpackFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackFormat {
    Tar,
    TarGz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeContent {
    Raw(RawContent),
    Filesystem(FilesystemContent),
}

/// `Update: {Edition, Preserve}` declared on a structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateInfo {
    pub edition: u32,
    pub preserve: Vec<String>,
}

/// One declarative region of a [`Volume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStructure {
    pub name: Option<String>,
    pub ty: VolumeStructureType,
    pub role: Role,
    pub id: Option<Guid>,
    pub size: Size,
    pub offset: Option<Offset>,
    pub offset_write: Option<RelativeOffset>,
    /// `""`/`"none"` normalizes to `None` at construction time; see [`VolumeStructure::is_bare`].
    pub filesystem: Option<String>,
    pub label: Option<String>,
    pub content: Vec<VolumeContent>,
    pub update: UpdateInfo,
}

impl VolumeStructure {
    pub fn is_bare(&self) -> bool {
        match &self.filesystem {
            None => true,
            Some(fs) => fs.is_empty() || fs == "none",
        }
    }

    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Gpt,
    Mbr,
}

impl Schema {
    /// Empty schema strings normalize to GPT, per §3/§4.2 of the spec this crate implements.
    pub fn from_str(s: &str) -> Schema {
        match s {
            "" | "gpt" => Schema::Gpt,
            "mbr" => Schema::Mbr,
            _ => Schema::Gpt,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Schema::Gpt => "gpt",
            Schema::Mbr => "mbr",
        }
    }
}

/// A declarative volume: `Bootloader`, `Schema`, optional `ID`, ordered structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub bootloader: Option<String>,
    pub schema: Schema,
    pub id: Option<Guid>,
    pub structures: Vec<VolumeStructure>,
}

/// One or more named volumes, as produced by the (out-of-scope) gadget-description parser.
#[derive(Debug, Clone, Default)]
pub struct GadgetInfo {
    pub volumes: BTreeMap<String, Volume>,
}

/// `{Info, RootDir}` — one of the two inputs to [`crate::orchestrate::Orchestrator::update`].
#[derive(Debug, Clone)]
pub struct GadgetData {
    pub info: GadgetInfo,
    pub root_dir: std::path::PathBuf,
}

/// Absolute image offset and resolved size of one [`RawContent`] item inside its structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedContent {
    pub content: RawContent,
    /// Offset from the start of the structure.
    pub offset: Offset,
    pub size: Size,
}

/// A [`VolumeStructure`] with its resolved `StartOffset` and declaration `Index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedStructure {
    pub structure: VolumeStructure,
    pub start_offset: Offset,
    pub index: usize,
    pub positioned_content: Vec<PositionedContent>,
}

impl PositionedStructure {
    pub fn is_bare(&self) -> bool {
        self.structure.is_bare()
    }

    pub fn name_str(&self) -> &str {
        self.structure.name_str()
    }
}

/// A [`Volume`] whose structures have all been assigned `StartOffset`s, sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedVolume {
    pub volume: Volume,
    pub structures: Vec<PositionedStructure>,
}
