//! Converts a declarative [`Volume`] into a [`PositionedVolume`]: every structure gains a
//! concrete `StartOffset`, every raw content item gains an absolute offset and resolved size.

use std::path::Path;

use crate::error::LayoutError;
use crate::types::{
    Offset, PositionedContent, PositionedStructure, PositionedVolume, RawContent, Role, Size,
    Volume, VolumeContent,
};

/// The reserved boot area size: the first non-`mbr` structure with no explicit offset is
/// promoted to this offset rather than packed against offset 0.
pub const RESERVED_BOOT_AREA: Size = Size(1024 * 1024);

/// Maximum size of the `mbr`-role structure, which is pinned to offset 0.
pub const MBR_MAX_SIZE: Size = Size(446);

/// Resolves `volume` into a [`PositionedVolume`], reading image file sizes for bare-structure
/// content from `gadget_root_dir`.
pub fn resolve(volume: &Volume, gadget_root_dir: &Path) -> Result<PositionedVolume, LayoutError> {
    let mut cursor = Offset::ZERO;
    let mut positioned = Vec::with_capacity(volume.structures.len());

    for (index, structure) in volume.structures.iter().enumerate() {
        let name = structure.name_str().to_string();
        let is_mbr = structure.role == Role::Mbr;

        let start_offset = if let Some(offset) = structure.offset {
            if offset < cursor {
                return Err(LayoutError::OffsetBeforeCursor {
                    offset: offset.bytes(),
                    minimum: cursor.bytes(),
                });
            }
            offset
        } else if is_mbr {
            Offset::ZERO
        } else if cursor < RESERVED_BOOT_AREA.into_offset() {
            // The first non-mbr structure (and any non-mbr structure that would otherwise land
            // inside the reserved boot area, e.g. right after an `mbr`-role structure pinned to
            // offset 0) is promoted to the reserved boot area rather than packed against the
            // cursor.
            RESERVED_BOOT_AREA.into_offset()
        } else {
            cursor
        };

        let positioned_content = if structure.is_bare() {
            position_content(index, &name, &structure.content, structure.size, gadget_root_dir)?
        } else {
            Vec::new()
        };

        cursor = start_offset + structure.size;

        positioned.push(PositionedStructure {
            structure: structure.clone(),
            start_offset,
            index,
            positioned_content,
        });
    }

    validate_offset_write_targets(&positioned)?;
    validate_ordered_non_overlapping(&positioned)?;

    positioned.sort_by_key(|s| s.start_offset);

    Ok(PositionedVolume {
        volume: volume.clone(),
        structures: positioned,
    })
}

fn position_content(
    index: usize,
    structure_name: &str,
    content: &[VolumeContent],
    structure_size: Size,
    gadget_root_dir: &Path,
) -> Result<Vec<PositionedContent>, LayoutError> {
    let mut out = Vec::with_capacity(content.len());
    let mut content_cursor = Offset::ZERO;

    for item in content {
        let raw = match item {
            VolumeContent::Raw(raw) => raw,
            VolumeContent::Filesystem(_) => continue,
        };

        let image_path = gadget_root_dir.join(&raw.image);
        let metadata = std::fs::metadata(&image_path).map_err(|source| LayoutError::ContentImage {
            index,
            name: structure_name.to_string(),
            image: raw.image.clone(),
            source,
        })?;
        let actual_size = metadata.len();

        let size = match raw.size {
            Some(declared) if declared.bytes() < actual_size => {
                return Err(LayoutError::ContentTooSmall {
                    index,
                    name: structure_name.to_string(),
                    image: raw.image.clone(),
                    declared: declared.bytes(),
                    actual: actual_size,
                });
            }
            Some(declared) => declared,
            None => Size(actual_size),
        };

        let offset = raw.offset.unwrap_or(content_cursor);

        if offset + size > structure_size.into_offset() {
            return Err(LayoutError::ContentOverflow {
                index,
                name: structure_name.to_string(),
                image: raw.image.clone(),
            });
        }

        content_cursor = offset + size;

        out.push(PositionedContent {
            content: clone_raw(raw),
            offset,
            size,
        });
    }

    Ok(out)
}

fn clone_raw(raw: &RawContent) -> RawContent {
    raw.clone()
}

fn validate_offset_write_targets(structures: &[PositionedStructure]) -> Result<(), LayoutError> {
    let check = |index: usize, name: &str, rel: &crate::types::RelativeOffset| -> Result<(), LayoutError> {
        if rel.relative_to.is_empty() {
            return Ok(());
        }
        let found = structures.iter().any(|other| other.name_str() == rel.relative_to);
        if found {
            Ok(())
        } else {
            Err(LayoutError::UnknownRelativeTo {
                index,
                name: name.to_string(),
                relative_to: rel.relative_to.clone(),
            })
        }
    };

    for ps in structures {
        if let Some(rel) = &ps.structure.offset_write {
            check(ps.index, ps.name_str(), rel)?;
        }

        for item in &ps.structure.content {
            if let VolumeContent::Raw(raw) = item {
                if let Some(rel) = &raw.offset_write {
                    check(ps.index, ps.name_str(), rel)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_ordered_non_overlapping(structures: &[PositionedStructure]) -> Result<(), LayoutError> {
    let mut prev_end: Option<Offset> = None;
    for (i, ps) in structures.iter().enumerate() {
        if let Some(end) = prev_end {
            if ps.start_offset < end {
                return Err(LayoutError::Overlap { index: i });
            }
        }
        prev_end = Some(ps.start_offset + ps.structure.size);
    }
    Ok(())
}

impl Size {
    fn into_offset(self) -> Offset {
        Offset(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Schema, UpdateInfo, VolumeStructure, VolumeStructureType};

    fn bare_structure(name: &str, size: Size, offset: Option<Offset>) -> VolumeStructure {
        VolumeStructure {
            name: Some(name.to_string()),
            ty: VolumeStructureType::Bare,
            role: Role::None,
            id: None,
            size,
            offset,
            offset_write: None,
            filesystem: None,
            label: None,
            content: Vec::new(),
            update: UpdateInfo::default(),
        }
    }

    fn volume(structures: Vec<VolumeStructure>) -> Volume {
        Volume {
            bootloader: None,
            schema: Schema::Gpt,
            id: None,
            structures,
        }
    }

    #[test]
    fn first_non_mbr_structure_defaults_to_one_mib() {
        let v = volume(vec![bare_structure("first", Size::MIB * 4, None)]);
        let dir = tempfile::tempdir().unwrap();
        let positioned = resolve(&v, dir.path()).unwrap();
        assert_eq!(positioned.structures[0].start_offset, RESERVED_BOOT_AREA.into_offset());
    }

    #[test]
    fn mbr_role_pinned_to_zero() {
        let mut mbr = bare_structure("mbr", Size(446), None);
        mbr.role = Role::Mbr;
        let rest = bare_structure("first", Size::MIB, None);
        let v = volume(vec![mbr, rest]);
        let dir = tempfile::tempdir().unwrap();
        let positioned = resolve(&v, dir.path()).unwrap();
        assert_eq!(positioned.structures[0].start_offset, Offset::ZERO);
        assert!(positioned.structures[0].structure.size.bytes() <= MBR_MAX_SIZE.bytes());
    }

    #[test]
    fn sequential_structures_pack_against_cursor() {
        let v = volume(vec![
            bare_structure("first", Size::MIB, None),
            bare_structure("second", Size::MIB * 2, None),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let positioned = resolve(&v, dir.path()).unwrap();
        assert_eq!(positioned.structures[0].start_offset, RESERVED_BOOT_AREA.into_offset());
        assert_eq!(
            positioned.structures[1].start_offset,
            RESERVED_BOOT_AREA.into_offset() + Size::MIB
        );
    }

    #[test]
    fn explicit_offset_before_cursor_is_rejected() {
        let v = volume(vec![
            bare_structure("first", Size::MIB, None),
            bare_structure("second", Size::MIB, Some(Offset(512))),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(&v, dir.path()).unwrap_err();
        assert!(matches!(err, LayoutError::OffsetBeforeCursor { .. }));
    }

    #[test]
    fn missing_image_file_reports_structure_and_content_name() {
        let mut bare = bare_structure("first", Size::MIB, None);
        bare.content.push(VolumeContent::Raw(RawContent {
            image: "missing.img".to_string(),
            offset: None,
            offset_write: None,
            size: None,
        }));
        let v = volume(vec![bare]);
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(&v, dir.path()).unwrap_err();
        match err {
            LayoutError::ContentImage { index, name, image, .. } => {
                assert_eq!(index, 0);
                assert_eq!(name, "first");
                assert_eq!(image, "missing.img");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn content_size_defaults_to_image_size_and_offsets_use_running_cursor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.img"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("b.img"), vec![0u8; 50]).unwrap();

        let mut bare = bare_structure("first", Size::MIB, None);
        bare.content.push(VolumeContent::Raw(RawContent {
            image: "a.img".to_string(),
            offset: None,
            offset_write: None,
            size: None,
        }));
        bare.content.push(VolumeContent::Raw(RawContent {
            image: "b.img".to_string(),
            offset: None,
            offset_write: None,
            size: None,
        }));
        let v = volume(vec![bare]);
        let positioned = resolve(&v, dir.path()).unwrap();
        let content = &positioned.structures[0].positioned_content;
        assert_eq!(content[0].offset, Offset::ZERO);
        assert_eq!(content[0].size, Size(100));
        assert_eq!(content[1].offset, Offset(100));
        assert_eq!(content[1].size, Size(50));
    }

    #[test]
    fn resolve_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.img"), vec![0u8; 10]).unwrap();
        let mut bare = bare_structure("first", Size::MIB, None);
        bare.content.push(VolumeContent::Raw(RawContent {
            image: "a.img".to_string(),
            offset: None,
            offset_write: None,
            size: None,
        }));
        let v = volume(vec![bare]);
        let a = resolve(&v, dir.path()).unwrap();
        let b = resolve(&v, dir.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn content_beyond_structure_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.img"), vec![0u8; 100]).unwrap();

        let mut bare = bare_structure("first", Size(64), None);
        bare.content.push(VolumeContent::Raw(RawContent {
            image: "a.img".to_string(),
            offset: None,
            offset_write: None,
            size: None,
        }));
        let v = volume(vec![bare]);
        let err = resolve(&v, dir.path()).unwrap_err();
        match err {
            LayoutError::ContentOverflow { index, name, image } => {
                assert_eq!(index, 0);
                assert_eq!(name, "first");
                assert_eq!(image, "a.img");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_mbr_structure_after_mbr_still_promotes_to_one_mib() {
        let mut mbr = bare_structure("mbr", Size(446), None);
        mbr.role = Role::Mbr;
        let rest = bare_structure("first", Size::MIB, None);
        let v = volume(vec![mbr, rest]);
        let dir = tempfile::tempdir().unwrap();
        let positioned = resolve(&v, dir.path()).unwrap();
        assert_eq!(positioned.structures[1].start_offset, RESERVED_BOOT_AREA.into_offset());
    }

    #[test]
    fn raw_content_offset_write_to_unknown_structure_is_rejected() {
        let mut bare = bare_structure("first", Size::MIB, None);
        bare.content.push(VolumeContent::Raw(RawContent {
            image: "a.img".to_string(),
            offset: None,
            offset_write: Some(crate::types::RelativeOffset {
                relative_to: "nonexistent".to_string(),
                offset: Offset::ZERO,
            }),
            size: None,
        }));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.img"), vec![0u8; 10]).unwrap();
        let v = volume(vec![bare]);
        let err = resolve(&v, dir.path()).unwrap_err();
        match err {
            LayoutError::UnknownRelativeTo { relative_to, .. } => {
                assert_eq!(relative_to, "nonexistent");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn structures_sorted_and_non_overlapping() {
        let dir = tempfile::tempdir().unwrap();
        let v = volume(vec![
            bare_structure("first", Size::MIB, None),
            bare_structure("second", Size::MIB, None),
            bare_structure("third", Size::MIB, None),
        ]);
        let positioned = resolve(&v, dir.path()).unwrap();
        let mut prev_end = None;
        for ps in &positioned.structures {
            if let Some(end) = prev_end {
                assert!(ps.start_offset >= end);
            }
            prev_end = Some(ps.start_offset + ps.structure.size);
        }
    }
}
