//! Maps a voxel position to the bone whose region it falls in.

use hashbrown::HashMap;

use crate::bone::BoneId;
use crate::voxel::{PositionKey, Side, VoxelCoord};

/// Y-band boundaries, half-open `[start, end)`, from torso down through the legs.
const TORSO_BANDS: &[(i32, i32, BoneId)] = &[
    (56, 64, BoneId::Head),
    (52, 56, BoneId::Neck),
    (44, 52, BoneId::Chest),
    (38, 44, BoneId::Spine),
    (34, 38, BoneId::Hips),
];

/// Leg Y-bands; side (left/right) picked separately by X.
const LEG_BANDS: &[(i32, i32)] = &[
    (20, 34), // upper leg
    (6, 20),  // lower leg
    (3, 6),   // foot
    (0, 3),   // toes
];

const ARM_Y_MIN: i32 = 44;
const ARM_Y_MAX: i32 = 56;
const ARM_SHOULDER_Y_MIN: i32 = 50;

/// Right-arm slab is `x in [0, 6)`; left is the mirrored `x in [26, 32)`.
const ARM_X_BAND_WIDTH: i32 = 6;

fn leg_bone(side: Side, band_index: usize) -> BoneId {
    use BoneId::*;
    match (side, band_index) {
        (Side::Left, 0) => LeftUpperLeg,
        (Side::Left, 1) => LeftLowerLeg,
        (Side::Left, 2) => LeftFoot,
        (Side::Left, 3) => LeftToes,
        (Side::Right, 0) => RightUpperLeg,
        (Side::Right, 1) => RightLowerLeg,
        (Side::Right, 2) => RightFoot,
        (Side::Right, _) => RightToes,
        (Side::Left, _) => unreachable!("band_index out of range"),
    }
}

/// Right-arm sub-band (x in [0,6), outward = decreasing x): shoulder only
/// above y=50, then upper/lower/hand moving toward the torso.
fn right_arm_bone(x: i32, y: i32) -> BoneId {
    use BoneId::*;
    if x >= 4 {
        if y >= ARM_SHOULDER_Y_MIN {
            RightShoulder
        } else {
            RightUpperArm
        }
    } else if x >= 3 {
        RightUpperArm
    } else if x >= 1 {
        RightLowerArm
    } else {
        RightHand
    }
}

/// Left-arm sub-band, mirrored (x in [26,32), outward = increasing x).
fn left_arm_bone(x: i32, y: i32) -> BoneId {
    use BoneId::*;
    let mirrored_x = 31 - x;
    if mirrored_x >= 4 {
        if y >= ARM_SHOULDER_Y_MIN {
            LeftShoulder
        } else {
            LeftUpperArm
        }
    } else if mirrored_x >= 3 {
        LeftUpperArm
    } else if mirrored_x >= 1 {
        LeftLowerArm
    } else {
        LeftHand
    }
}

/// Assigns a single primary bone to every `(x, y, z)` by Y/X banding, with an
/// assignment cache keyed by position.
#[derive(Debug, Default)]
pub struct RegionMapper {
    cache: HashMap<PositionKey, BoneId>,
}

impl RegionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the assignment cache. The bands themselves are a fixed table, so
    /// this exists mainly to let tests exercise a cold cache.
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
    }

    pub fn assign(&mut self, coord: VoxelCoord) -> BoneId {
        if let Some(key) = coord.encode() {
            if let Some(&bone) = self.cache.get(&key) {
                return bone;
            }
            let bone = Self::compute(coord);
            self.cache.insert(key, bone);
            bone
        } else {
            Self::compute(coord)
        }
    }

    fn compute(coord: VoxelCoord) -> BoneId {
        let VoxelCoord { x, y, z: _ } = coord;

        if (ARM_Y_MIN..ARM_Y_MAX).contains(&y) {
            if (0..ARM_X_BAND_WIDTH).contains(&x) {
                return right_arm_bone(x, y);
            }
            if (32 - ARM_X_BAND_WIDTH..32).contains(&x) {
                return left_arm_bone(x, y);
            }
        }

        for &(start, end, bone) in TORSO_BANDS {
            if (start..end).contains(&y) {
                return bone;
            }
        }

        for (band_index, &(start, end)) in LEG_BANDS.iter().enumerate() {
            if (start..end).contains(&y) {
                return leg_bone(coord.side(), band_index);
            }
        }

        // Y is outside every declared band (should not happen inside a
        // 64-tall box); fall back to the root bone rather than panicking.
        BoneId::Hips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_band() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(16, 60, 16)), BoneId::Head);
    }

    #[test]
    fn hips_band() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(16, 35, 16)), BoneId::Hips);
    }

    #[test]
    fn leg_side_by_x() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(20, 25, 16)), BoneId::LeftUpperLeg);
        assert_eq!(m.assign(VoxelCoord::new(10, 25, 16)), BoneId::RightUpperLeg);
    }

    #[test]
    fn toes_band() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(20, 1, 16)), BoneId::LeftToes);
    }

    #[test]
    fn right_arm_shoulder_requires_upper_y() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(5, 51, 16)), BoneId::RightShoulder);
        assert_eq!(m.assign(VoxelCoord::new(5, 45, 16)), BoneId::RightUpperArm);
    }

    #[test]
    fn right_arm_sub_bands() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(3, 45, 16)), BoneId::RightUpperArm);
        assert_eq!(m.assign(VoxelCoord::new(2, 45, 16)), BoneId::RightLowerArm);
        assert_eq!(m.assign(VoxelCoord::new(0, 45, 16)), BoneId::RightHand);
    }

    #[test]
    fn left_arm_mirrors_right() {
        let mut m = RegionMapper::new();
        assert_eq!(m.assign(VoxelCoord::new(26, 51, 16)), BoneId::LeftShoulder);
        assert_eq!(m.assign(VoxelCoord::new(31, 45, 16)), BoneId::LeftHand);
    }

    #[test]
    fn cache_is_consistent_with_direct_compute() {
        let mut m = RegionMapper::new();
        let coord = VoxelCoord::new(16, 60, 16);
        let first = m.assign(coord);
        let second = m.assign(coord);
        assert_eq!(first, second);
    }
}
