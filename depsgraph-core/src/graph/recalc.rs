//! Recalc bitmasks and per-datablock requirement masks.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Which aspects of a datablock changed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Recalc(u32);

impl Recalc {
    pub const NONE: Recalc = Recalc(0);
    pub const TRANSFORM: Recalc = Recalc(1 << 0);
    pub const GEOMETRY: Recalc = Recalc(1 << 1);
    pub const ANIMATION: Recalc = Recalc(1 << 2);
    pub const PARAMETERS: Recalc = Recalc(1 << 3);
    pub const SHADING: Recalc = Recalc(1 << 4);
    pub const POINT_CACHE: Recalc = Recalc(1 << 5);
    pub const SEQUENCER: Recalc = Recalc(1 << 6);
    pub const BASE_FLAGS: Recalc = Recalc(1 << 7);
    pub const HIERARCHY: Recalc = Recalc(1 << 8);
    /// Structural change: the graph's relations must be rebuilt.
    pub const RELATIONS: Recalc = Recalc(1 << 9);
    pub const ALL: Recalc = Recalc((1 << 10) - 1);

    const NAMES: [(Recalc, &'static str); 10] = [
        (Recalc::TRANSFORM, "TRANSFORM"),
        (Recalc::GEOMETRY, "GEOMETRY"),
        (Recalc::ANIMATION, "ANIMATION"),
        (Recalc::PARAMETERS, "PARAMETERS"),
        (Recalc::SHADING, "SHADING"),
        (Recalc::POINT_CACHE, "POINT_CACHE"),
        (Recalc::SEQUENCER, "SEQUENCER"),
        (Recalc::BASE_FLAGS, "BASE_FLAGS"),
        (Recalc::HIERARCHY, "HIERARCHY"),
        (Recalc::RELATIONS, "RELATIONS"),
    ];

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether every flag of `other` is set in `self`.
    pub fn contains(&self, other: Recalc) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Recalc) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Recalc {
    type Output = Recalc;

    fn bitor(self, rhs: Recalc) -> Recalc {
        Recalc(self.0 | rhs.0)
    }
}

impl BitOrAssign for Recalc {
    fn bitor_assign(&mut self, rhs: Recalc) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Recalc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("Recalc(NONE)");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Recalc({})", names.join(" | "))
    }
}

/// Custom data layers an evaluated mesh has to keep, one mask per element
/// domain. Requests are merged by union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CustomDataMask {
    pub vmask: u64,
    pub emask: u64,
    pub fmask: u64,
    pub lmask: u64,
    pub pmask: u64,
}

impl CustomDataMask {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl BitOrAssign for CustomDataMask {
    fn bitor_assign(&mut self, rhs: CustomDataMask) {
        self.vmask |= rhs.vmask;
        self.emask |= rhs.emask;
        self.fmask |= rhs.fmask;
        self.lmask |= rhs.lmask;
        self.pmask |= rhs.pmask;
    }
}

/// Out-of-band evaluation requests attached to a datablock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalFlag {
    /// Evaluate the curve path so other objects can follow it.
    NeedCurvePath,
    /// Keep the camera's view frame available.
    NeedCameraInView,
    NeedBoundingBox,
}

impl EvalFlag {
    fn bit(self) -> u8 {
        match self {
            EvalFlag::NeedCurvePath => 1 << 0,
            EvalFlag::NeedCameraInView => 1 << 1,
            EvalFlag::NeedBoundingBox => 1 << 2,
        }
    }
}

/// Set of [`EvalFlag`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EvalFlags(u8);

impl EvalFlags {
    pub fn insert(&mut self, flag: EvalFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(&self, flag: EvalFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recalc_merges_instead_of_overwriting() {
        let mut recalc = Recalc::TRANSFORM;
        recalc |= Recalc::GEOMETRY;
        assert!(recalc.contains(Recalc::TRANSFORM));
        assert!(recalc.contains(Recalc::GEOMETRY));
        assert!(!recalc.contains(Recalc::TRANSFORM | Recalc::SHADING));
        assert!(recalc.intersects(Recalc::TRANSFORM | Recalc::SHADING));
    }

    #[test]
    fn recalc_debug_lists_flags() {
        assert_eq!(format!("{:?}", Recalc::NONE), "Recalc(NONE)");
        assert_eq!(
            format!("{:?}", Recalc::TRANSFORM | Recalc::POINT_CACHE),
            "Recalc(TRANSFORM | POINT_CACHE)"
        );
    }

    #[test]
    fn all_contains_every_flag() {
        for (flag, _) in Recalc::NAMES {
            assert!(Recalc::ALL.contains(flag));
        }
    }

    #[test]
    fn customdata_masks_union() {
        let mut mask = CustomDataMask {
            vmask: 0b01,
            ..Default::default()
        };
        mask |= CustomDataMask {
            vmask: 0b10,
            lmask: 4,
            ..Default::default()
        };
        assert_eq!(mask.vmask, 0b11);
        assert_eq!(mask.lmask, 4);
        assert!(!mask.is_empty());
    }

    #[test]
    fn eval_flags_set() {
        let mut flags = EvalFlags::default();
        assert!(flags.is_empty());
        flags.insert(EvalFlag::NeedCurvePath);
        assert!(flags.contains(EvalFlag::NeedCurvePath));
        assert!(!flags.contains(EvalFlag::NeedBoundingBox));
    }
}
