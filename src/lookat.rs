//! Target-driven head/eye orientation.

use glam::{Quat, Vec3};

use crate::bone::BoneId;
use crate::skeleton::Skeleton;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookAtConfig {
    pub max_yaw: f32,
    pub max_pitch: f32,
    pub turn_speed: f32,
    pub neck_share: f32,
    /// Empirical multiplier on the head-to-target vector used when deriving
    /// eye convergence from head yaw/pitch alone. Exposed as a tunable
    /// rather than hidden as a magic constant.
    pub eye_offset_scale: f32,
}

impl Default for LookAtConfig {
    fn default() -> Self {
        Self {
            max_yaw: 0.9,
            max_pitch: 0.5,
            turn_speed: 10.0,
            neck_share: 0.3,
            eye_offset_scale: 2.0,
        }
    }
}

/// Smoothly turns the head (and a fraction of the neck) toward a world-space
/// target, clamped to a cone and critically-damped rather than snapping.
pub struct LookAt {
    config: LookAtConfig,
    target: Option<Vec3>,
    current_yaw: f32,
    current_pitch: f32,
}

impl LookAt {
    pub fn new(config: LookAtConfig) -> Self {
        Self {
            config,
            target: None,
            current_yaw: 0.0,
            current_pitch: 0.0,
        }
    }

    pub fn set_target(&mut self, target: Option<Vec3>) {
        self.target = target;
    }

    /// Step the current yaw/pitch toward the clamped target angles.
    pub fn update(&mut self, dt: f32, head_world_position: Vec3) {
        let Some(target) = self.target else {
            self.approach(0.0, 0.0, dt);
            return;
        };
        let to_target = target - head_world_position;
        if to_target.length_squared() < 1e-6 {
            return;
        }
        let desired_yaw = to_target.x.atan2(-to_target.z).clamp(-self.config.max_yaw, self.config.max_yaw);
        let horizontal = (to_target.x * to_target.x + to_target.z * to_target.z).sqrt();
        let desired_pitch = to_target
            .y
            .atan2(horizontal.max(1e-6))
            .clamp(-self.config.max_pitch, self.config.max_pitch);
        self.approach(desired_yaw, desired_pitch, dt);
    }

    fn approach(&mut self, desired_yaw: f32, desired_pitch: f32, dt: f32) {
        let alpha = 1.0 - (-self.config.turn_speed * dt).exp();
        self.current_yaw += (desired_yaw - self.current_yaw) * alpha;
        self.current_pitch += (desired_pitch - self.current_pitch) * alpha;
    }

    /// Apply the current yaw/pitch to the head bone, with `neck_share` of it
    /// also carried by the neck so the whole upper spine contributes.
    pub fn apply(&self, skeleton: &mut Skeleton) {
        let neck_yaw = self.current_yaw * self.config.neck_share;
        let neck_pitch = self.current_pitch * self.config.neck_share;
        let head_yaw = self.current_yaw - neck_yaw;
        let head_pitch = self.current_pitch - neck_pitch;

        let neck_rotation = Quat::from_rotation_y(neck_yaw) * Quat::from_rotation_x(neck_pitch);
        let head_rotation = Quat::from_rotation_y(head_yaw) * Quat::from_rotation_x(head_pitch);

        skeleton.set_local_rotation(BoneId::Neck, neck_rotation);
        skeleton.set_local_rotation(BoneId::Head, head_rotation);
    }

    /// Where the eyes should converge, derived from the current look angles
    /// rather than true per-eye geometry.
    pub fn convergence_point(&self, head_world_position: Vec3) -> Vec3 {
        let direction = Quat::from_rotation_y(self.current_yaw) * Quat::from_rotation_x(self.current_pitch) * -Vec3::Z;
        head_world_position + direction * self.config.eye_offset_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_target_relaxes_to_neutral() {
        let mut look = LookAt::new(LookAtConfig::default());
        look.set_target(Some(Vec3::new(5.0, 0.0, -5.0)));
        for _ in 0..60 {
            look.update(1.0 / 60.0, Vec3::ZERO);
        }
        look.set_target(None);
        for _ in 0..120 {
            look.update(1.0 / 60.0, Vec3::ZERO);
        }
        assert!(look.current_yaw.abs() < 1e-3);
        assert!(look.current_pitch.abs() < 1e-3);
    }

    #[test]
    fn yaw_is_clamped_to_max() {
        let config = LookAtConfig {
            max_yaw: 0.3,
            ..Default::default()
        };
        let mut look = LookAt::new(config);
        look.set_target(Some(Vec3::new(100.0, 0.0, 0.0)));
        for _ in 0..600 {
            look.update(1.0 / 60.0, Vec3::ZERO);
        }
        assert!(look.current_yaw <= 0.3 + 1e-3);
    }

    #[test]
    fn apply_does_not_panic() {
        let mut look = LookAt::new(LookAtConfig::default());
        look.set_target(Some(Vec3::new(1.0, 0.2, -3.0)));
        look.update(1.0 / 60.0, Vec3::ZERO);
        let mut skeleton = Skeleton::new();
        look.apply(&mut skeleton);
        skeleton.update_world_transforms();
    }
}
