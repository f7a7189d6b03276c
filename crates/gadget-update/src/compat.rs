//! Decides whether a transition from an old [`PositionedVolume`]/[`PositionedStructure`] to a
//! new one is legal, per the strict compatibility rules this engine enforces.

use crate::error::CompatError;
use crate::types::{PositionedStructure, PositionedVolume, Role, VolumeStructureType};

/// The `Role → implicit Label` policy table, centralized here so the "empty-label upgrade"
/// rule in [`can_update_structure`] stays coherent with whatever roles the engine knows about.
const IMPLICIT_LABELS: &[(&str, &str)] = &[("system-data", "writable"), ("system-boot", "system-boot")];

fn implicit_label(role: &Role) -> Option<&'static str> {
    IMPLICIT_LABELS
        .iter()
        .find(|(r, _)| *r == role.as_str())
        .map(|(_, label)| *label)
}

/// Fails if `Schema`, `ID`, or the number of structures differs between `old` and `new`.
pub fn can_update_volume(old: &PositionedVolume, new: &PositionedVolume) -> Result<(), CompatError> {
    if old.volume.schema != new.volume.schema {
        return Err(CompatError::Schema {
            old: old.volume.schema.as_str().to_string(),
            new: new.volume.schema.as_str().to_string(),
        });
    }

    if old.volume.id != new.volume.id {
        return Err(CompatError::VolumeId {
            old: guid_str(&old.volume.id),
            new: guid_str(&new.volume.id),
        });
    }

    if old.structures.len() != new.structures.len() {
        return Err(CompatError::StructureCount {
            old: old.structures.len(),
            new: new.structures.len(),
        });
    }

    Ok(())
}

/// Enforces per-structure compatibility, per the attribute table this engine's documentation
/// carries verbatim.
pub fn can_update_structure(
    old: &PositionedStructure,
    new: &PositionedStructure,
) -> Result<(), CompatError> {
    if old.structure.size != new.structure.size {
        return Err(CompatError::Size {
            old: old.structure.size.bytes(),
            new: new.structure.size.bytes(),
        });
    }

    if old.structure.offset != new.structure.offset {
        return Err(CompatError::Offset {
            old: opt_offset_str(old.structure.offset),
            new: opt_offset_str(new.structure.offset),
        });
    }

    if old.start_offset != new.start_offset {
        return Err(CompatError::StartOffset {
            old: old.start_offset.bytes(),
            new: new.start_offset.bytes(),
        });
    }

    if old.structure.offset_write != new.structure.offset_write {
        return Err(CompatError::OffsetWrite {
            old: opt_relative_str(&old.structure.offset_write),
            new: opt_relative_str(&new.structure.offset_write),
        });
    }

    // Legacy-`mbr` relaxation: an old structure whose Type == "mbr" may transition to
    // Type == "bare" + Role == "mbr". The reverse is forbidden. Every other role/type
    // combination must match exactly.
    let legacy_relaxation = matches!(old.structure.ty, VolumeStructureType::MbrLegacy)
        && matches!(new.structure.ty, VolumeStructureType::Bare)
        && new.structure.role == Role::Mbr;

    if !legacy_relaxation {
        if old.structure.role != new.structure.role {
            return Err(CompatError::Role {
                old: old.structure.role.as_str().to_string(),
                new: new.structure.role.as_str().to_string(),
            });
        }
        if old.structure.ty != new.structure.ty {
            return Err(CompatError::Type {
                old: type_str(&old.structure.ty),
                new: type_str(&new.structure.ty),
            });
        }
    }

    if old.structure.id != new.structure.id {
        return Err(CompatError::Id {
            old: guid_str(&old.structure.id),
            new: guid_str(&new.structure.id),
        });
    }

    match (old.is_bare(), new.is_bare()) {
        (true, false) => return Err(CompatError::BareToFilesystem),
        (false, true) => return Err(CompatError::FilesystemToBare),
        _ => {}
    }

    if !old.is_bare() {
        if old.structure.filesystem != new.structure.filesystem {
            return Err(CompatError::Filesystem {
                old: old.structure.filesystem.clone().unwrap_or_default(),
                new: new.structure.filesystem.clone().unwrap_or_default(),
            });
        }
    }

    if old.structure.label != new.structure.label {
        let upgrade_is_allowed = old.structure.label.as_deref().unwrap_or("").is_empty()
            && new
                .structure
                .label
                .as_deref()
                .is_some_and(|new_label| implicit_label(&new.structure.role) == Some(new_label));

        if !upgrade_is_allowed {
            return Err(CompatError::Label {
                old: old.structure.label.clone().unwrap_or_default(),
                new: new.structure.label.clone().unwrap_or_default(),
            });
        }
    }

    Ok(())
}

fn guid_str(g: &Option<hadris_common::part::gpt::Guid>) -> String {
    g.map(|g| g.to_string()).unwrap_or_default()
}

fn type_str(ty: &VolumeStructureType) -> String {
    match ty {
        VolumeStructureType::Bare => "bare".to_string(),
        VolumeStructureType::Mbr(v) => format!("{v:02X}"),
        VolumeStructureType::Guid(g) => g.to_string(),
        VolumeStructureType::Hybrid(v, g) => format!("{v:02X},{g}"),
        VolumeStructureType::MbrLegacy => "mbr".to_string(),
    }
}

fn opt_offset_str(offset: Option<crate::types::Offset>) -> String {
    match offset {
        Some(o) => o.bytes().to_string(),
        None => "unspecified".to_string(),
    }
}

fn opt_relative_str(rel: &Option<crate::types::RelativeOffset>) -> String {
    match rel {
        Some(r) => format!("{{{}, {}}}", r.relative_to, r.offset.bytes()),
        None => "unspecified".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Offset, Schema, Size, UpdateInfo, Volume, VolumeStructure};

    fn structure(name: &str, size: Size, start: Offset) -> PositionedStructure {
        PositionedStructure {
            structure: VolumeStructure {
                name: Some(name.to_string()),
                ty: VolumeStructureType::Bare,
                role: Role::None,
                id: None,
                size,
                offset: None,
                offset_write: None,
                filesystem: None,
                label: None,
                content: Vec::new(),
                update: UpdateInfo::default(),
            },
            start_offset: start,
            index: 0,
            positioned_content: Vec::new(),
        }
    }

    fn volume(structures: Vec<PositionedStructure>) -> PositionedVolume {
        PositionedVolume {
            volume: Volume {
                bootloader: None,
                schema: Schema::Gpt,
                id: None,
                structures: structures.iter().map(|s| s.structure.clone()).collect(),
            },
            structures,
        }
    }

    #[test]
    fn identity_is_always_compatible() {
        let s = structure("first", Size::MIB, Offset::ZERO);
        assert!(can_update_structure(&s, &s).is_ok());
        let v = volume(vec![s]);
        assert!(can_update_volume(&v, &v).is_ok());
    }

    #[test]
    fn size_change_is_rejected() {
        let old = structure("first", Size::MIB, Offset::ZERO);
        let mut new = old.clone();
        new.structure.size = Size::MIB * 2;
        let err = can_update_structure(&old, &new).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot change structure size from 1048576 to 2097152"
        );
    }

    #[test]
    fn bare_to_filesystem_is_rejected() {
        let old = structure("foo", Size::MIB * 5, Offset(Size::MIB.bytes()));
        let mut new = old.clone();
        new.structure.filesystem = Some("ext4".to_string());
        let err = can_update_structure(&old, &new).unwrap_err();
        assert_eq!(err.to_string(), "cannot change a bare structure to filesystem one");
    }

    #[test]
    fn empty_schema_normalizes_to_gpt() {
        let s = structure("first", Size::MIB, Offset::ZERO);
        let mut old = volume(vec![s.clone()]);
        old.volume.schema = Schema::from_str("");
        let new = volume(vec![s]);
        assert!(can_update_volume(&old, &new).is_ok());
    }

    #[test]
    fn structure_count_change_is_rejected() {
        let old = volume(vec![structure("a", Size::MIB, Offset::ZERO)]);
        let new = volume(vec![
            structure("a", Size::MIB, Offset::ZERO),
            structure("b", Size::MIB, Offset(Size::MIB.bytes())),
        ]);
        let err = can_update_volume(&old, &new).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot change the number of structures within volume from 1 to 2"
        );
    }

    #[test]
    fn legacy_mbr_may_become_bare_with_mbr_role() {
        let mut old = structure("mbr", Size(446), Offset::ZERO);
        old.structure.ty = VolumeStructureType::MbrLegacy;
        let mut new = old.clone();
        new.structure.ty = VolumeStructureType::Bare;
        new.structure.role = Role::Mbr;
        assert!(can_update_structure(&old, &new).is_ok());
    }

    #[test]
    fn reverse_mbr_relaxation_is_forbidden() {
        let mut old = structure("mbr", Size(446), Offset::ZERO);
        old.structure.ty = VolumeStructureType::Bare;
        old.structure.role = Role::Mbr;
        let mut new = old.clone();
        new.structure.ty = VolumeStructureType::MbrLegacy;
        new.structure.role = Role::None;
        let err = can_update_structure(&old, &new).unwrap_err();
        assert!(matches!(err, CompatError::Role { .. }));
    }

    #[test]
    fn implicit_label_upgrade_is_allowed() {
        let mut old = structure("data", Size::MIB, Offset::ZERO);
        old.structure.role = Role::SystemData;
        old.structure.label = None;
        let mut new = old.clone();
        new.structure.label = Some("writable".to_string());
        assert!(can_update_structure(&old, &new).is_ok());
    }

    #[test]
    fn non_implicit_label_change_is_rejected() {
        let mut old = structure("data", Size::MIB, Offset::ZERO);
        old.structure.role = Role::SystemData;
        old.structure.label = None;
        let mut new = old.clone();
        new.structure.label = Some("something-else".to_string());
        let err = can_update_structure(&old, &new).unwrap_err();
        assert!(matches!(err, CompatError::Label { .. }));
    }
}
