//! Bone hierarchy, pose state, forward kinematics and voxel skinning.

use glam::{Quat, Vec3};
use hashbrown::HashMap;

use crate::bone::{self, BoneId, BONE_COUNT};
use crate::region::RegionMapper;
use crate::voxel::VoxelCoord;

/// Whether a bone has been posed away from its rest transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoneState {
    #[default]
    Resting,
    Posed,
}

/// One joint in the fixed 21-bone hierarchy.
#[derive(Debug, Clone)]
pub struct Bone {
    pub id: BoneId,
    pub parent: Option<BoneId>,
    pub children: Vec<BoneId>,
    pub rest_position: Vec3,
    pub local_rotation: Quat,
    pub local_position_offset: Vec3,
    pub world_position: Vec3,
    pub world_rotation: Quat,
    pub length: f32,
    pub state: BoneState,
}

impl Bone {
    fn new(id: BoneId, parent: Option<BoneId>, rest_position: Vec3) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            rest_position,
            local_rotation: Quat::IDENTITY,
            local_position_offset: Vec3::ZERO,
            world_position: rest_position,
            world_rotation: Quat::IDENTITY,
            length: 0.0,
            state: BoneState::Resting,
        }
    }
}

/// The 21-bone hierarchy: rest pose, authored pose, and derived world transforms.
#[derive(Debug, Clone)]
pub struct Skeleton {
    bones: [Bone; BONE_COUNT],
}

/// Derive each bone's rest position as the voxel centroid of the region the
/// `RegionMapper` assigns to it over the full box. Reuses the same band table
/// as skinning rather than inventing a second source of truth for bone
/// placement.
fn derive_rest_positions() -> HashMap<BoneId, Vec3> {
    let mut mapper = RegionMapper::new();
    let mut sum = HashMap::<BoneId, Vec3>::new();
    let mut count = HashMap::<BoneId, u32>::new();
    for x in 0..crate::voxel::DIM_X {
        for y in 0..crate::voxel::DIM_Y {
            for z in 0..crate::voxel::DIM_Z {
                let coord = VoxelCoord::new(x, y, z);
                let bone = mapper.assign(coord);
                *sum.entry(bone).or_insert(Vec3::ZERO) +=
                    Vec3::new(x as f32, y as f32, z as f32);
                *count.entry(bone).or_insert(0) += 1;
            }
        }
    }
    let mut rest = HashMap::new();
    for &id in &bone::ALL {
        let centroid = match (sum.get(&id), count.get(&id)) {
            (Some(&s), Some(&c)) if c > 0 => (s / c as f32).round(),
            _ => Vec3::ZERO,
        };
        rest.insert(id, centroid);
    }
    rest
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new()
    }
}

impl Skeleton {
    pub fn new() -> Self {
        let rest_positions = derive_rest_positions();
        let bones = bone::ALL.map(|id| {
            let rest = rest_positions[&id];
            Bone::new(id, id.parent(), rest)
        });
        let mut skeleton = Self { bones };
        for &id in &bone::ALL {
            if let Some(parent) = id.parent() {
                skeleton.bones[parent.index()].children.push(id);
            }
        }
        for &id in &bone::ALL {
            let length = match skeleton.bone(id).parent {
                Some(parent) => skeleton.bone(id).rest_position.distance(skeleton.bone(parent).rest_position),
                None => 0.0,
            };
            skeleton.bones[id.index()].length = length;
        }
        skeleton.update_world_transforms();
        skeleton
    }

    pub fn root() -> BoneId {
        BoneId::Hips
    }

    pub fn bone(&self, id: BoneId) -> &Bone {
        &self.bones[id.index()]
    }

    pub fn bones(&self) -> &[Bone; BONE_COUNT] {
        &self.bones
    }

    pub fn set_local_rotation(&mut self, id: BoneId, rotation: Quat) {
        let bone = &mut self.bones[id.index()];
        bone.local_rotation = rotation.normalize();
        bone.state = BoneState::Posed;
    }

    pub fn set_local_position_offset(&mut self, id: BoneId, offset: Vec3) {
        let bone = &mut self.bones[id.index()];
        bone.local_position_offset = offset;
        bone.state = BoneState::Posed;
    }

    /// Apply a batch of poses, skipping any bone name outside the fixed set
    /// (unknown bone names are silently ignored, not an error).
    pub fn apply_pose_by_name(&mut self, poses: &HashMap<String, (Option<Quat>, Option<Vec3>)>) {
        for (name, (rotation, offset)) in poses {
            match BoneId::from_str(name) {
                Some(id) => {
                    if let Some(r) = rotation {
                        self.set_local_rotation(id, *r);
                    }
                    if let Some(o) = offset {
                        self.set_local_position_offset(id, *o);
                    }
                }
                None => {
                    tracing::debug!(bone = %name, "applyPose: unknown bone name ignored");
                }
            }
        }
    }

    pub fn reset_to_tpose(&mut self) {
        for bone in &mut self.bones {
            bone.local_rotation = Quat::IDENTITY;
            bone.local_position_offset = Vec3::ZERO;
            bone.state = BoneState::Resting;
        }
        self.update_world_transforms();
    }

    /// Recompute every bone's world transform via forward kinematics,
    /// traversing depth-first from `hips`.
    pub fn update_world_transforms(&mut self) {
        self.update_subtree(Self::root(), None);
    }

    fn update_subtree(&mut self, id: BoneId, parent: Option<(Vec3, Quat, Vec3)>) {
        let (world_position, world_rotation) = match parent {
            None => {
                let bone = &self.bones[id.index()];
                (bone.rest_position + bone.local_position_offset, bone.local_rotation)
            }
            Some((parent_world_pos, parent_world_rot, parent_rest)) => {
                let bone = &self.bones[id.index()];
                let delta = bone.rest_position - parent_rest + bone.local_position_offset;
                let rotated = parent_world_rot * delta;
                (parent_world_pos + rotated, parent_world_rot * bone.local_rotation)
            }
        };
        let (rest_position, children) = {
            let bone = &mut self.bones[id.index()];
            bone.world_position = world_position;
            bone.world_rotation = world_rotation;
            (bone.rest_position, bone.children.clone())
        };
        for child in children {
            self.update_subtree(child, Some((world_position, world_rotation, rest_position)));
        }
    }

    /// Posed world position of a voxel rest-position, given its bone-weight
    /// list from [`crate::weights::WeightCalculator`].
    ///
    /// The single-bone case is a rigid transform; the multi-bone case is a
    /// weighted average of each bone's independently transformed point.
    pub fn transform_voxel(&self, voxel_rest: Vec3, weights: &[(BoneId, f32)]) -> Vec3 {
        if let [(only, _)] = weights {
            return self.transform_voxel_single(voxel_rest, *only);
        }
        let mut accum = Vec3::ZERO;
        for &(id, w) in weights {
            accum += self.transform_voxel_single(voxel_rest, id) * w;
        }
        accum
    }

    fn transform_voxel_single(&self, voxel_rest: Vec3, id: BoneId) -> Vec3 {
        let bone = self.bone(id);
        let local = voxel_rest - bone.rest_position;
        bone.world_position + bone.world_rotation * local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn reset_to_tpose_matches_rest_transform() {
        let mut skel = Skeleton::new();
        skel.set_local_rotation(BoneId::LeftShoulder, Quat::from_rotation_z(FRAC_PI_4));
        skel.update_world_transforms();
        skel.reset_to_tpose();
        for &id in &bone::ALL {
            let bone = skel.bone(id);
            assert!(bone.world_position.distance(bone.rest_position) < 1e-5);
            assert_eq!(bone.world_rotation, Quat::IDENTITY);
        }
    }

    #[test]
    fn leaf_depends_only_on_chain_to_root() {
        let mut a = Skeleton::new();
        let mut b = Skeleton::new();
        // Posing an unrelated bone (a leg) must not perturb the left arm chain.
        a.set_local_rotation(BoneId::RightUpperLeg, Quat::from_rotation_x(0.3));
        a.update_world_transforms();
        b.update_world_transforms();
        let hand_a = a.bone(BoneId::LeftHand).world_position;
        let hand_b = b.bone(BoneId::LeftHand).world_position;
        assert!(hand_a.distance(hand_b) < 1e-5);
    }

    #[test]
    fn shoulder_rotation_propagates_to_hand() {
        let mut skel = Skeleton::new();
        let q = Quat::from_rotation_z(FRAC_PI_4);
        skel.set_local_rotation(BoneId::LeftShoulder, q);
        skel.update_world_transforms();

        let shoulder = skel.bone(BoneId::LeftShoulder);
        let shoulder_world_pos = shoulder.world_position;
        let shoulder_world_rot = shoulder.world_rotation;

        // Rebuild the analytic expectation for the hand by walking the same
        // rest-offset chain by hand (shoulder -> upperArm -> lowerArm -> hand),
        // rotating every offset by the shoulder's world rotation.
        let rest = |id: BoneId| skel.bone(id).rest_position;
        let mut expected_pos = shoulder_world_pos;
        let mut expected_rot = shoulder_world_rot;
        for (child, parent) in [
            (BoneId::LeftUpperArm, BoneId::LeftShoulder),
            (BoneId::LeftLowerArm, BoneId::LeftUpperArm),
            (BoneId::LeftHand, BoneId::LeftLowerArm),
        ] {
            let delta = rest(child) - rest(parent);
            expected_pos += expected_rot * delta;
            expected_rot *= skel.bone(child).local_rotation;
        }

        let hand = skel.bone(BoneId::LeftHand);
        assert!(hand.world_position.distance(expected_pos) < 1e-5);
    }

    #[test]
    fn unknown_bone_name_is_ignored() {
        let mut skel = Skeleton::new();
        let mut poses = HashMap::new();
        poses.insert("leftPinky".to_string(), (Some(Quat::IDENTITY), None));
        skel.apply_pose_by_name(&poses);
        assert_eq!(skel.bone(BoneId::LeftHand).state, BoneState::Resting);
    }

    #[test]
    fn single_bone_skinning_matches_rigid_transform() {
        let mut skel = Skeleton::new();
        skel.set_local_rotation(BoneId::Head, Quat::from_rotation_y(0.5));
        skel.update_world_transforms();
        let head_rest = skel.bone(BoneId::Head).rest_position;
        let voxel_rest = head_rest + Vec3::new(1.0, 0.0, 0.0);
        let posed = skel.transform_voxel(voxel_rest, &[(BoneId::Head, 1.0)]);
        let expected = skel.bone(BoneId::Head).world_position
            + skel.bone(BoneId::Head).world_rotation * Vec3::new(1.0, 0.0, 0.0);
        assert!(posed.distance(expected) < 1e-6);
    }
}
