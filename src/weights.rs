//! Per-voxel bone blend weights for multi-bone skinning.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::bone::BoneId;
use crate::region::RegionMapper;
use crate::skeleton::Skeleton;
use crate::voxel::VoxelCoord;

/// Tunables for [`WeightCalculator::compute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightCalculatorConfig {
    pub max_bones: usize,
    pub blend_distance: f32,
    pub min_weight: f32,
}

impl Default for WeightCalculatorConfig {
    fn default() -> Self {
        Self {
            max_bones: 4,
            blend_distance: 3.0,
            min_weight: 0.01,
        }
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Up to `maxBones` `(bone, weight)` pairs, weights summing to 1.0.
pub type BoneWeights = SmallVec<[(BoneId, f32); 4]>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WeightCalculator {
    pub config: WeightCalculatorConfig,
}

impl WeightCalculator {
    pub fn new(config: WeightCalculatorConfig) -> Self {
        Self { config }
    }

    /// Blend weights for a single voxel: the voxel's primary bone starts at
    /// weight 1.0; bones joined to it by a parent/child joint gain weight as
    /// the voxel nears that joint, via a smoothstep falloff.
    pub fn compute(
        &self,
        skeleton: &Skeleton,
        region_mapper: &mut RegionMapper,
        coord: VoxelCoord,
    ) -> BoneWeights {
        let primary = region_mapper.assign(coord);
        let point = glam::Vec3::new(coord.x as f32, coord.y as f32, coord.z as f32);

        let mut weights: HashMap<BoneId, f32> = HashMap::new();
        weights.insert(primary, 1.0);

        let mut adjacent: SmallVec<[BoneId; 6]> = SmallVec::new();
        if let Some(parent) = skeleton.bone(primary).parent {
            adjacent.push(parent);
        }
        adjacent.extend(skeleton.bone(primary).children.iter().copied());

        for joint_bone in adjacent {
            let distance = point.distance(skeleton.bone(joint_bone).rest_position);
            if distance < self.config.blend_distance {
                let w = smoothstep(1.0 - distance / self.config.blend_distance);
                *weights.entry(joint_bone).or_insert(0.0) += w;
                *weights.entry(primary).or_insert(0.0) -= 0.5 * w;
            }
        }

        weights.retain(|_, w| *w >= self.config.min_weight);

        let mut ranked: SmallVec<[(BoneId, f32); 8]> = weights.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.config.max_bones);

        let total: f32 = ranked.iter().map(|(_, w)| *w).sum();
        let mut result = BoneWeights::new();
        if total > 0.0 {
            for (bone, w) in ranked {
                result.push((bone, w / total));
            }
        } else {
            result.push((primary, 1.0));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let skeleton = Skeleton::new();
        let mut mapper = RegionMapper::new();
        let calc = WeightCalculator::default();
        for coord in [
            VoxelCoord::new(16, 60, 16),
            VoxelCoord::new(3, 45, 16),
            VoxelCoord::new(16, 1, 16),
        ] {
            let weights = calc.compute(&skeleton, &mut mapper, coord);
            let total: f32 = weights.iter().map(|(_, w)| *w).sum();
            assert!((total - 1.0).abs() < 1e-5, "weights {weights:?} sum to {total}");
        }
    }

    #[test]
    fn far_from_any_joint_is_single_bone() {
        let skeleton = Skeleton::new();
        let mut mapper = RegionMapper::new();
        let calc = WeightCalculator::default();
        // Center of the hips band, far from the spine/leg joints.
        let weights = calc.compute(&skeleton, &mut mapper, VoxelCoord::new(16, 35, 16));
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].0, BoneId::Hips);
    }

    #[test]
    fn truncates_to_max_bones() {
        let skeleton = Skeleton::new();
        let mut mapper = RegionMapper::new();
        let calc = WeightCalculator::new(WeightCalculatorConfig {
            max_bones: 1,
            ..Default::default()
        });
        let weights = calc.compute(&skeleton, &mut mapper, VoxelCoord::new(16, 38, 16));
        assert_eq!(weights.len(), 1);
        assert!((weights[0].1 - 1.0).abs() < 1e-5);
    }
}
