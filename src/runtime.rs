//! Owns every subsystem and sequences one tick's data flow: animation ->
//! skeleton FK -> spring bones -> expression -> look-at -> a second FK pass
//! so look-at's head/neck override is reflected in the world transforms
//! handed back to the caller.

use glam::Vec3;
use hashbrown::HashMap;

use crate::animation::{AnimState, AnimationMixer, AnimationMixerConfig};
use crate::bone::BoneId;
use crate::color::Color;
use crate::expression::{ExpressionController, ExpressionControllerConfig};
use crate::lookat::{LookAt, LookAtConfig};
use crate::mesh::{self, FaceMaterial, MeshData, MeshableVoxels};
use crate::region::RegionMapper;
use crate::skeleton::Skeleton;
use crate::spring::{SpringBones, SpringBonesConfig};
use crate::voxel::{PositionKey, VoxelBody, VoxelCoord};
use crate::weights::{BoneWeights, WeightCalculator, WeightCalculatorConfig};

/// Configuration for every subsystem an [`AvatarRuntime`] owns.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvatarRuntimeConfig {
    pub weights: WeightCalculatorConfig,
    pub spring: SpringBonesConfig,
    pub mixer: AnimationMixerConfig,
    pub expression: ExpressionControllerConfig,
    pub look_at: LookAtConfig,
}

pub struct AvatarRuntime {
    body: VoxelBody,
    skeleton: Skeleton,
    region_mapper: RegionMapper,
    weight_calculator: WeightCalculator,
    voxel_weights: HashMap<PositionKey, BoneWeights>,
    spring: SpringBones,
    mixer: AnimationMixer,
    expression: ExpressionController,
    look_at: LookAt,
}

impl AvatarRuntime {
    pub fn new(body: VoxelBody, config: AvatarRuntimeConfig, expression_seed: u64) -> Self {
        let skeleton = Skeleton::new();
        let mut region_mapper = RegionMapper::new();
        let weight_calculator = WeightCalculator::new(config.weights);

        let mut voxel_weights = HashMap::new();
        body.for_each_sorted(|key, _| {
            let coord = key.decode();
            let weights = weight_calculator.compute(&skeleton, &mut region_mapper, coord);
            voxel_weights.insert(key, weights);
        });

        let spring = SpringBones::build(config.spring, &body, &skeleton);
        let mixer = AnimationMixer::new(config.mixer);
        let expression = ExpressionController::new(config.expression, expression_seed);
        let look_at = LookAt::new(config.look_at);

        Self {
            body,
            skeleton,
            region_mapper,
            weight_calculator,
            voxel_weights,
            spring,
            mixer,
            expression,
            look_at,
        }
    }

    pub fn body(&self) -> &VoxelBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut VoxelBody {
        &mut self.body
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// Recompute every voxel's bone weights from scratch. Call after editing
    /// `body`'s voxel set so skinning reflects the new geometry.
    pub fn rebuild_weights(&mut self) {
        self.region_mapper.invalidate_cache();
        self.voxel_weights.clear();
        let skeleton = &self.skeleton;
        let region_mapper = &mut self.region_mapper;
        let weight_calculator = &self.weight_calculator;
        let voxel_weights = &mut self.voxel_weights;
        self.body.for_each_sorted(|key, _| {
            let coord = key.decode();
            let weights = weight_calculator.compute(skeleton, region_mapper, coord);
            voxel_weights.insert(key, weights);
        });
    }

    pub fn set_movement_speed(&mut self, speed: f32) {
        self.mixer.set_movement_speed(speed);
    }

    pub fn trigger_state(&mut self, state: AnimState) {
        self.mixer.trigger_state(state);
    }

    pub fn trigger_expression(&mut self, expression_name: impl Into<String>, duration: f32) {
        self.expression.trigger(expression_name, duration);
    }

    pub fn set_wind(&mut self, wind: Vec3) {
        self.spring.set_wind(wind);
    }

    pub fn set_look_target(&mut self, target: Option<Vec3>) {
        self.look_at.set_target(target);
    }

    /// Advance every subsystem by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.mixer.update(dt);
        self.mixer.apply(&mut self.skeleton);
        self.skeleton.update_world_transforms();

        self.spring.update(dt, &self.skeleton);
        self.expression.update(dt);

        let head_position = self.skeleton.bone(BoneId::Head).world_position;
        self.look_at.update(dt, head_position);
        self.look_at.apply(&mut self.skeleton);
        self.skeleton.update_world_transforms();
    }

    /// World-space position of one voxel after the current tick's pose: the
    /// spring-simulated position if it belongs to a spring region, otherwise
    /// skeletal skinning from its cached bone weights.
    pub fn posed_voxel_position(&self, key: PositionKey) -> Option<Vec3> {
        if let Some(spring_position) = self.spring.transformed_voxel_position(key) {
            return Some(spring_position);
        }
        let weights = self.voxel_weights.get(&key)?;
        let coord = key.decode();
        let rest = Vec3::new(coord.x as f32, coord.y as f32, coord.z as f32);
        Some(self.skeleton.transform_voxel(rest, weights))
    }

    /// The palette index visible at `key` this tick, after expression and
    /// blink blending: the base grid with any overlay sample whose weight
    /// has crossed the halfway point resolved in.
    pub fn rendered_palette(&self) -> HashMap<PositionKey, u8> {
        let mut out = HashMap::new();
        self.body.for_each_sorted(|key, index| {
            out.insert(key, index);
        });
        for (key, sample) in self.expression.apply(&self.body) {
            if sample.weight >= 0.5 {
                out.insert(key, sample.palette_index);
            }
        }
        out
    }

    /// Build the current-frame surface mesh in rest-grid space (skinning is
    /// applied per-vertex downstream, not rebaked into topology).
    pub fn build_mesh(&self) -> MeshData {
        let rendered = self.rendered_palette();
        let view = RuntimeMeshView {
            palette: self.body.palette(),
            voxels: &rendered,
        };
        mesh::mesh(&view)
    }

    /// A single-cube stand-in for distant LOD, colored by the dominant
    /// palette slot.
    pub fn build_impostor_mesh(&mut self) -> Option<MeshData> {
        let counts = self.body.voxel_count_by_palette();
        let dominant_index = mesh::dominant_palette_index(&counts)?;
        let dominant_color = self.body.palette().get(dominant_index)?;
        let bounds = self.body.bounds()?;
        Some(mesh::impostor_mesh(dominant_color, bounds.min, bounds.max))
    }
}

struct RuntimeMeshView<'a> {
    palette: &'a crate::color::Palette,
    voxels: &'a HashMap<PositionKey, u8>,
}

impl MeshableVoxels for RuntimeMeshView<'_> {
    fn material_at(&self, coord: VoxelCoord) -> Option<FaceMaterial> {
        let key = coord.encode()?;
        let index = *self.voxels.get(&key)?;
        let color: Color = self.palette.get(index)?;
        Some(FaceMaterial::from_color(color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::Metadata;

    fn sample_runtime() -> AvatarRuntime {
        let mut body = VoxelBody::new(Metadata::new("id", "n"));
        body.palette_mut().add(200, 50, 50, crate::color::ColorType::Solid).unwrap();
        for y in 0..64 {
            for x in (0..32).step_by(4) {
                body.set(x, y, 16, 0).ok();
            }
        }
        AvatarRuntime::new(body, AvatarRuntimeConfig::default(), 7)
    }

    #[test]
    fn update_does_not_panic_across_many_ticks() {
        let mut runtime = sample_runtime();
        runtime.set_movement_speed(5.0);
        runtime.set_look_target(Some(Vec3::new(2.0, 50.0, -4.0)));
        for _ in 0..120 {
            runtime.update(1.0 / 60.0);
        }
    }

    #[test]
    fn posed_voxel_position_is_defined_for_every_voxel() {
        let runtime = sample_runtime();
        let mut any = false;
        runtime.body().for_each_sorted(|key, _| {
            any = true;
            assert!(runtime.posed_voxel_position(key).is_some());
        });
        assert!(any);
    }

    #[test]
    fn build_mesh_is_non_empty_for_nonempty_body() {
        let runtime = sample_runtime();
        let mesh = runtime.build_mesh();
        assert!(mesh.vertex_count() > 0);
    }
}
