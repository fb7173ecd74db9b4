//! Procedural generators for the four built-in locomotion clips.
//!
//! There is no authored animation data in this crate; every clip is a small
//! closed-form sinusoid over a handful of limb bones, sampled the same way
//! an authored clip would be.

use std::f32::consts::PI;

use glam::{Quat, Vec3};

use super::types::{Clip, LoopMode, Track};
use crate::bone::BoneId;

fn swing_track(bone: BoneId, axis: Vec3, amplitude: f32, duration: f32, samples: usize, phase: f32) -> Track {
    let mut keyframes = Vec::with_capacity(samples + 1);
    for i in 0..=samples {
        let t = duration * i as f32 / samples as f32;
        let angle = amplitude * (2.0 * PI * t / duration + phase).sin();
        keyframes.push((t, Quat::from_axis_angle(axis, angle)));
    }
    Track::Rotation { bone, keyframes }
}

fn bob_track(bone: BoneId, amplitude: f32, duration: f32, samples: usize) -> Track {
    let mut keyframes = Vec::with_capacity(samples + 1);
    for i in 0..=samples {
        let t = duration * i as f32 / samples as f32;
        let y = amplitude * (2.0 * PI * t / duration).sin().abs();
        keyframes.push((t, Vec3::new(0.0, y, 0.0)));
    }
    Track::Position { bone, keyframes }
}

pub fn idle() -> Clip {
    let duration = 2.4;
    Clip {
        name: "idle".to_string(),
        duration,
        loop_mode: LoopMode::Loop,
        transition_duration: 0.25,
        tracks: vec![
            bob_track(BoneId::Chest, 0.03, duration, 24),
            swing_track(BoneId::Head, Vec3::Y, 0.05, duration, 24, PI / 2.0),
        ],
    }
}

pub fn walk() -> Clip {
    let duration = 1.0;
    Clip {
        name: "walk".to_string(),
        duration,
        loop_mode: LoopMode::Loop,
        transition_duration: 0.2,
        tracks: vec![
            swing_track(BoneId::LeftUpperLeg, Vec3::X, 0.5, duration, 16, 0.0),
            swing_track(BoneId::RightUpperLeg, Vec3::X, 0.5, duration, 16, PI),
            swing_track(BoneId::LeftUpperArm, Vec3::X, 0.35, duration, 16, PI),
            swing_track(BoneId::RightUpperArm, Vec3::X, 0.35, duration, 16, 0.0),
            bob_track(BoneId::Hips, 0.08, duration, 16),
        ],
    }
}

pub fn run() -> Clip {
    let duration = 0.55;
    Clip {
        name: "run".to_string(),
        duration,
        loop_mode: LoopMode::Loop,
        transition_duration: 0.15,
        tracks: vec![
            swing_track(BoneId::LeftUpperLeg, Vec3::X, 0.9, duration, 16, 0.0),
            swing_track(BoneId::RightUpperLeg, Vec3::X, 0.9, duration, 16, PI),
            swing_track(BoneId::LeftLowerLeg, Vec3::X, 0.6, duration, 16, PI / 2.0),
            swing_track(BoneId::RightLowerLeg, Vec3::X, 0.6, duration, 16, PI + PI / 2.0),
            swing_track(BoneId::LeftUpperArm, Vec3::X, 0.6, duration, 16, PI),
            swing_track(BoneId::RightUpperArm, Vec3::X, 0.6, duration, 16, 0.0),
            bob_track(BoneId::Hips, 0.15, duration, 16),
        ],
    }
}

pub fn jump() -> Clip {
    let duration = 0.7;
    Clip {
        name: "jump".to_string(),
        duration,
        loop_mode: LoopMode::Once,
        transition_duration: 0.1,
        tracks: vec![
            Track::Rotation {
                bone: BoneId::LeftUpperLeg,
                keyframes: vec![
                    (0.0, Quat::IDENTITY),
                    (0.3, Quat::from_axis_angle(Vec3::X, 0.9)),
                    (0.7, Quat::IDENTITY),
                ],
            },
            Track::Rotation {
                bone: BoneId::RightUpperLeg,
                keyframes: vec![
                    (0.0, Quat::IDENTITY),
                    (0.3, Quat::from_axis_angle(Vec3::X, 0.9)),
                    (0.7, Quat::IDENTITY),
                ],
            },
            Track::Rotation {
                bone: BoneId::LeftUpperArm,
                keyframes: vec![
                    (0.0, Quat::IDENTITY),
                    (0.3, Quat::from_axis_angle(Vec3::X, -1.2)),
                    (0.7, Quat::IDENTITY),
                ],
            },
            Track::Rotation {
                bone: BoneId::RightUpperArm,
                keyframes: vec![
                    (0.0, Quat::IDENTITY),
                    (0.3, Quat::from_axis_angle(Vec3::X, -1.2)),
                    (0.7, Quat::IDENTITY),
                ],
            },
            Track::Position {
                bone: BoneId::Hips,
                keyframes: vec![(0.0, Vec3::ZERO), (0.35, Vec3::new(0.0, 0.6, 0.0)), (0.7, Vec3::ZERO)],
            },
        ],
    }
}
