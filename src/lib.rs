//! Core runtime for a sparse-voxel humanoid avatar: voxel storage and codec,
//! VRM-style skeleton and skinning, a unified greedy mesher, animation,
//! secondary motion and gaze.
//!
//! Logging follows `tracing`'s convention of structured fields over
//! formatted strings; callers wanting output should install a subscriber
//! (`tracing_subscriber::fmt()` in binaries, `tracing_subscriber::fmt().with_test_writer()`
//! in tests).

pub mod animation;
pub mod bone;
pub mod codec;
pub mod color;
pub mod error;
pub mod expression;
pub mod lookat;
pub mod mesh;
pub mod pool;
pub mod region;
pub mod runtime;
pub mod skeleton;
pub mod spring;
pub mod voxel;
pub mod weights;

pub use bone::BoneId;
pub use error::{CodecError, VoxelError};
pub use runtime::{AvatarRuntime, AvatarRuntimeConfig};
pub use skeleton::Skeleton;
pub use voxel::VoxelBody;
