//! End-to-end scenarios spanning more than one module: a posed, skinned,
//! meshed body; a settling spring chain; and a codec round trip through a
//! full runtime build.

use glam::Vec3;
use voxavatar_core::animation::AnimState;
use voxavatar_core::bone::BoneId;
use voxavatar_core::codec;
use voxavatar_core::color::ColorType;
use voxavatar_core::runtime::{AvatarRuntime, AvatarRuntimeConfig};
use voxavatar_core::skeleton::Skeleton;
use voxavatar_core::voxel::{Metadata, SpringParams, SpringRegion, VoxelBody, VoxelCoord};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn humanoid_slab() -> VoxelBody {
    let mut body = VoxelBody::new(Metadata::new("test-id", "humanoid"));
    body.palette_mut().add(120, 90, 60, ColorType::Solid).unwrap();
    body.palette_mut().add(40, 40, 200, ColorType::Solid).unwrap();
    // A thin torso+legs silhouette: a solid column through the middle Y
    // bands, enough to touch hips, spine, chest, neck and head.
    for y in 0..64 {
        for x in 14..18 {
            for z in 14..18 {
                body.set(x, y, z, 0).unwrap();
            }
        }
    }
    body
}

#[test]
fn greedy_mesh_of_a_solid_column_has_geometry() {
    init_tracing();
    let body = humanoid_slab();
    let runtime = AvatarRuntime::new(body, AvatarRuntimeConfig::default(), 1);
    let mesh = runtime.build_mesh();
    assert!(mesh.vertex_count() > 0);
    assert!(mesh.triangle_count() > 0);
    // Every index must reference a real vertex.
    for &index in &mesh.indices {
        assert!((index as usize) < mesh.vertex_count());
    }
}

#[test]
fn skeleton_forward_kinematics_propagates_down_the_spine() {
    let mut skeleton = Skeleton::new();
    skeleton.set_local_rotation(BoneId::Chest, glam::Quat::from_rotation_z(0.4));
    skeleton.update_world_transforms();

    let chest = skeleton.bone(BoneId::Chest).world_position;
    let head = skeleton.bone(BoneId::Head).world_position;
    let neck = skeleton.bone(BoneId::Neck).world_position;

    // Rotating the chest must move both the neck and head away from their
    // T-pose rest column, and they must move together (head still attached
    // to neck), not independently.
    let rest_head = skeleton_rest(BoneId::Head);
    let rest_neck = skeleton_rest(BoneId::Neck);
    assert!(head.distance(rest_head) > 1e-3);
    assert!(neck.distance(rest_neck) > 1e-3);
    assert!(chest.y > 0.0);
}

fn skeleton_rest(bone: BoneId) -> Vec3 {
    Skeleton::new().bone(bone).rest_position
}

#[test]
fn spring_chain_settles_after_many_ticks_with_no_wind() {
    let mut body = humanoid_slab();
    let mut keys = std::collections::HashSet::new();
    for y in [20, 19, 16, 15, 12] {
        keys.insert(VoxelCoord::new(16, y, 16).encode().unwrap());
    }
    body.add_spring_region(SpringRegion {
        name: voxavatar_core::voxel::BoundedName::new("ponytail").unwrap(),
        voxel_keys: keys,
        params: SpringParams {
            stiffness: 0.8,
            damping: 0.2,
            gravity_factor: 0.0,
            wind_influence: 1.0,
        },
    })
    .unwrap();

    let mut runtime = AvatarRuntime::new(body, AvatarRuntimeConfig::default(), 3);
    let tip_key = VoxelCoord::new(16, 12, 16).encode().unwrap();
    let first_tick = runtime.posed_voxel_position(tip_key).unwrap();

    for _ in 0..300 {
        runtime.update(1.0 / 60.0);
    }
    let settled = runtime.posed_voxel_position(tip_key).unwrap();

    // With gravity zeroed and no wind, the tip should stop moving, not keep
    // drifting frame over frame.
    runtime.update(1.0 / 60.0);
    let one_more = runtime.posed_voxel_position(tip_key).unwrap();
    assert!(settled.distance(one_more) < 1e-3);
    let _ = first_tick;
}

#[test]
fn codec_round_trip_preserves_a_full_runtime_body() {
    let mut body = humanoid_slab();
    let mut delta = voxavatar_core::voxel::ExpressionDelta::new();
    let key = VoxelCoord::new(16, 60, 16).encode().unwrap();
    delta.insert(key, 1);
    body.set_expression("smile", delta).unwrap();

    let encoded = codec::encode(&body, true).unwrap();
    let decoded = codec::decode(&encoded).unwrap();
    assert_eq!(decoded, body);
}

#[test]
fn movement_speed_drives_locomotion_state_through_the_runtime() {
    let body = humanoid_slab();
    let mut runtime = AvatarRuntime::new(body, AvatarRuntimeConfig::default(), 9);
    runtime.set_movement_speed(6.0);
    runtime.update(1.0 / 60.0);
    runtime.trigger_state(AnimState::Jump);
    runtime.update(1.0 / 60.0);
    // Mostly a smoke test: driving the mixer through the runtime must not
    // panic and must leave the skeleton in a finite, posed state.
    let head = runtime.skeleton().bone(BoneId::Head).world_position;
    assert!(head.is_finite());
}
