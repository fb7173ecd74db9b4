//! Verlet-integrated spring-bone chains for authored secondary motion.

use glam::Vec3;
use hashbrown::HashMap;

use crate::bone::BoneId;
use crate::pool::{Pool, PoolHandle};
use crate::skeleton::Skeleton;
use crate::voxel::{PositionKey, SpringParams, SpringRegion, VoxelBody};

/// Global tunables shared by every chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringBonesConfig {
    pub time_step: f32,
    pub gravity: Vec3,
}

impl Default for SpringBonesConfig {
    fn default() -> Self {
        Self {
            time_step: 1.0 / 60.0,
            gravity: Vec3::new(0.0, -9.8, 0.0),
        }
    }
}

/// One mass point in a spring chain: one or more voxels that move together.
#[derive(Debug, Clone)]
pub struct SpringNode {
    pub rest_position: Vec3,
    pub current_position: Vec3,
    pub previous_position: Vec3,
    pub voxel_keys: Vec<PositionKey>,
}

impl SpringNode {
    fn new(rest_position: Vec3, voxel_keys: Vec<PositionKey>) -> Self {
        Self {
            rest_position,
            current_position: rest_position,
            previous_position: rest_position,
            voxel_keys,
        }
    }

    fn reset(&mut self) {
        self.current_position = self.rest_position;
        self.previous_position = self.rest_position;
    }
}

/// A root-to-tip sequence of nodes, pinned to `attachment_bone` at the root.
#[derive(Debug, Clone)]
struct SpringChain {
    handles: Vec<PoolHandle>,
    attachment_bone: BoneId,
    params: SpringParams,
    /// Rest distance between consecutive nodes, used by the distance constraint.
    segment_lengths: Vec<f32>,
}

/// Group a region's voxels into nodes by Y-band, root (highest Y) first.
///
/// Voxels within 2 units of Y of the current group join it; a larger gap
/// starts a new node, so a chain with real gaps (e.g. a skirt panel
/// separated from the hem) still simulates as a sequence of discrete nodes.
fn build_nodes(region: &SpringRegion) -> Vec<SpringNode> {
    let mut by_y: std::collections::BTreeMap<i32, Vec<PositionKey>> = std::collections::BTreeMap::new();
    for &key in &region.voxel_keys {
        by_y.entry(key.decode().y).or_default().push(key);
    }
    let mut ys: Vec<i32> = by_y.keys().copied().collect();
    ys.sort_unstable_by(|a, b| b.cmp(a));

    let mut groups: Vec<Vec<i32>> = Vec::new();
    for y in ys {
        match groups.last_mut() {
            Some(group) if group.last().copied().unwrap() - y <= 2 => group.push(y),
            _ => groups.push(vec![y]),
        }
    }

    groups
        .into_iter()
        .map(|group_ys| {
            let mut keys = Vec::new();
            let mut sum = Vec3::ZERO;
            for y in group_ys {
                for &key in &by_y[&y] {
                    let coord = key.decode();
                    sum += Vec3::new(coord.x as f32, coord.y as f32, coord.z as f32);
                    keys.push(key);
                }
            }
            let centroid = sum / keys.len() as f32;
            SpringNode::new(centroid, keys)
        })
        .collect()
}

fn resolve_attachment_bone(skeleton: &Skeleton, root_rest: Vec3) -> BoneId {
    crate::bone::ALL
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = skeleton.bone(*a).rest_position.distance(root_rest);
            let db = skeleton.bone(*b).rest_position.distance(root_rest);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(BoneId::Hips)
}

/// Owns every spring chain authored on a body and steps them each tick.
#[derive(Debug)]
pub struct SpringBones {
    config: SpringBonesConfig,
    pool: Pool<SpringNode>,
    chains: Vec<SpringChain>,
    wind: Vec3,
    /// voxel key -> (chain index, node index within chain), for O(1) lookup
    /// in `transformed_voxel_position`.
    voxel_index: HashMap<PositionKey, (usize, usize)>,
}

impl SpringBones {
    pub fn build(config: SpringBonesConfig, body: &VoxelBody, skeleton: &Skeleton) -> Self {
        let mut pool = Pool::new();
        let mut chains = Vec::new();
        let mut voxel_index = HashMap::new();

        for (chain_index, region) in body.spring_regions().iter().enumerate() {
            let nodes = build_nodes(region);
            if nodes.is_empty() {
                continue;
            }
            let attachment_bone = resolve_attachment_bone(skeleton, nodes[0].rest_position);
            let mut segment_lengths = Vec::with_capacity(nodes.len().saturating_sub(1));
            for pair in nodes.windows(2) {
                segment_lengths.push(pair[0].rest_position.distance(pair[1].rest_position));
            }

            let mut handles = Vec::with_capacity(nodes.len());
            for (node_index, node) in nodes.into_iter().enumerate() {
                for &key in &node.voxel_keys {
                    voxel_index.insert(key, (chain_index, node_index));
                }
                handles.push(pool.acquire(node));
            }

            chains.push(SpringChain {
                handles,
                attachment_bone,
                params: region.params,
                segment_lengths,
            });
        }

        Self {
            config,
            pool,
            chains,
            wind: Vec3::ZERO,
            voxel_index,
        }
    }

    pub fn set_wind(&mut self, wind: Vec3) {
        self.wind = wind;
    }

    pub fn reset(&mut self) {
        for chain in &self.chains {
            for &handle in &chain.handles {
                if let Some(node) = self.pool.get_mut(handle) {
                    node.reset();
                }
            }
        }
    }

    /// Step every chain by `dt`, capped to `3 * time_step` to keep a stalled
    /// frame from injecting a huge, unstable Verlet step.
    pub fn update(&mut self, dt: f32, skeleton: &Skeleton) {
        let dt = dt.min(self.config.time_step * 3.0);
        for chain in &self.chains {
            let root_world = skeleton.bone(chain.attachment_bone).world_position;
            let root_rot = skeleton.bone(chain.attachment_bone).world_rotation;
            let attach_rest = skeleton.bone(chain.attachment_bone).rest_position;

            for (index, &handle) in chain.handles.iter().enumerate() {
                if index == 0 {
                    if let Some(node) = self.pool.get_mut(handle) {
                        let local = node.rest_position - attach_rest;
                        let pinned = root_world + root_rot * local;
                        node.previous_position = node.current_position;
                        node.current_position = pinned;
                    }
                    continue;
                }

                let acceleration = self.config.gravity * chain.params.gravity_factor
                    + self.wind * chain.params.wind_influence;
                if let Some(node) = self.pool.get_mut(handle) {
                    let velocity = (node.current_position - node.previous_position)
                        * (1.0 - chain.params.damping);
                    let next = node.current_position + velocity + acceleration * dt * dt;
                    node.previous_position = node.current_position;
                    node.current_position = next;
                }

                let parent_position = self
                    .pool
                    .get(chain.handles[index - 1])
                    .map(|n| n.current_position)
                    .unwrap_or(root_world);
                let rest_length = chain.segment_lengths[index - 1];
                if let Some(node) = self.pool.get_mut(handle) {
                    apply_distance_constraint(
                        node,
                        parent_position,
                        rest_length,
                        chain.params.stiffness,
                    );
                }
            }
        }
    }

    /// World position of one voxel, or `None` if it isn't part of any spring
    /// region. Computed as a rigid translation of its node's rest offset.
    pub fn transformed_voxel_position(&self, key: PositionKey) -> Option<Vec3> {
        let &(chain_index, node_index) = self.voxel_index.get(&key)?;
        let handle = self.chains[chain_index].handles[node_index];
        let node = self.pool.get(handle)?;
        let coord = key.decode();
        let voxel_rest = Vec3::new(coord.x as f32, coord.y as f32, coord.z as f32);
        let offset = voxel_rest - node.rest_position;
        Some(node.current_position + offset)
    }
}

/// Pull `node` back toward `parent_position` so the segment length blends
/// between unconstrained (stiffness 0) and rest-length-exact (stiffness 1).
fn apply_distance_constraint(node: &mut SpringNode, parent_position: Vec3, rest_length: f32, stiffness: f32) {
    let delta = node.current_position - parent_position;
    let distance = delta.length();
    if distance < 1e-6 {
        return;
    }
    let target = parent_position + delta / distance * rest_length;
    node.current_position = node.current_position.lerp(target, stiffness.clamp(0.0, 1.0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::{Metadata, VoxelCoord};

    fn region_with_tail() -> SpringRegion {
        let mut keys = std::collections::HashSet::new();
        for y in [10, 9, 6, 5, 2] {
            keys.insert(VoxelCoord::new(16, y, 16).encode().unwrap());
        }
        SpringRegion {
            name: crate::voxel::BoundedName::new("tail").unwrap(),
            voxel_keys: keys,
            params: SpringParams::default(),
        }
    }

    #[test]
    fn gaps_over_two_split_into_separate_nodes() {
        let nodes = build_nodes(&region_with_tail());
        // y=10,9 together; y=6,5 together; y=2 alone: three nodes.
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn settles_toward_rest_without_gravity() {
        let mut body = VoxelBody::new(Metadata::new("id", "n"));
        body.add_spring_region(region_with_tail()).unwrap();
        let skeleton = Skeleton::new();
        let mut config = SpringBonesConfig::default();
        config.gravity = Vec3::ZERO;
        let mut sim = SpringBones::build(config, &body, &skeleton);

        for _ in 0..120 {
            sim.update(config.time_step, &skeleton);
        }

        let key = VoxelCoord::new(16, 2, 16).encode().unwrap();
        let pos = sim.transformed_voxel_position(key).unwrap();
        let rest = Vec3::new(16.0, 2.0, 16.0);
        assert!(pos.distance(rest) < 0.5, "tail settled far from rest: {pos:?}");
    }

    #[test]
    fn reset_restores_rest_position() {
        let mut body = VoxelBody::new(Metadata::new("id", "n"));
        body.add_spring_region(region_with_tail()).unwrap();
        let skeleton = Skeleton::new();
        let config = SpringBonesConfig::default();
        let mut sim = SpringBones::build(config, &body, &skeleton);
        for _ in 0..30 {
            sim.update(config.time_step, &skeleton);
        }
        sim.reset();
        let key = VoxelCoord::new(16, 2, 16).encode().unwrap();
        let pos = sim.transformed_voxel_position(key).unwrap();
        assert!(pos.distance(Vec3::new(16.0, 2.0, 16.0)) < 1e-4);
    }
}
