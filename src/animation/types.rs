//! Typed clip/track representation: keyed by [`BoneId`], not by string, so
//! a malformed track can't silently target a nonexistent bone.

use glam::{Quat, Vec3};

use crate::bone::BoneId;

/// A single animated channel on one bone.
#[derive(Debug, Clone)]
pub enum Track {
    Rotation {
        bone: BoneId,
        keyframes: Vec<(f32, Quat)>,
    },
    Position {
        bone: BoneId,
        keyframes: Vec<(f32, Vec3)>,
    },
}

impl Track {
    pub fn bone(&self) -> BoneId {
        match self {
            Track::Rotation { bone, .. } => *bone,
            Track::Position { bone, .. } => *bone,
        }
    }

    /// Sample a rotation track at `time`, or `None` for a position track.
    ///
    /// Within-clip keyframes are blended componentwise and renormalized
    /// rather than slerped; slerp is reserved for cross-fading between
    /// clips, not for sampling inside one.
    pub fn sample_rotation(&self, time: f32) -> Option<Quat> {
        match self {
            Track::Rotation { keyframes, .. } => Some(sample_keyframes(keyframes, time, lerp_quat)),
            Track::Position { .. } => None,
        }
    }

    /// Sample a position track at `time`, or `None` for a rotation track.
    pub fn sample_position(&self, time: f32) -> Option<Vec3> {
        match self {
            Track::Position { keyframes, .. } => Some(sample_keyframes(keyframes, time, Vec3::lerp)),
            Track::Rotation { .. } => None,
        }
    }
}

/// Componentwise quaternion interpolation, renormalized after blending.
/// Cheaper than `Quat::slerp` and matches how adjacent within-clip
/// keyframes are meant to be sampled; the short angular spans between
/// neighboring keyframes make the lack of constant angular velocity
/// imperceptible.
fn lerp_quat(a: Quat, b: Quat, t: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    (a * (1.0 - t) + b * t).normalize()
}

fn sample_keyframes<T: Copy>(keyframes: &[(f32, T)], time: f32, lerp: impl Fn(T, T, f32) -> T) -> T {
    debug_assert!(!keyframes.is_empty(), "a track must have at least one keyframe");
    if keyframes.len() == 1 || time <= keyframes[0].0 {
        return keyframes[0].1;
    }
    if time >= keyframes[keyframes.len() - 1].0 {
        return keyframes[keyframes.len() - 1].1;
    }
    for window in keyframes.windows(2) {
        let (t0, v0) = window[0];
        let (t1, v1) = window[1];
        if time >= t0 && time <= t1 {
            let span = (t1 - t0).max(1e-6);
            let t = (time - t0) / span;
            return lerp(v0, v1, t);
        }
    }
    keyframes[keyframes.len() - 1].1
}

/// How a clip's timeline behaves past its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Once,
    Loop,
}

/// A named set of tracks sharing a duration.
#[derive(Debug, Clone)]
pub struct Clip {
    pub name: String,
    pub duration: f32,
    pub loop_mode: LoopMode,
    pub tracks: Vec<Track>,
    pub transition_duration: f32,
}

impl Clip {
    pub fn track_for(&self, bone: BoneId) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.bone() == bone).collect()
    }

    /// Wrap or clamp `time` into the clip's domain depending on loop mode.
    pub fn normalize_time(&self, time: f32) -> f32 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        match self.loop_mode {
            LoopMode::Loop => time.rem_euclid(self.duration),
            LoopMode::Once => time.clamp(0.0, self.duration),
        }
    }
}

/// High-level locomotion/action state driving which clip plays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnimState {
    Idle,
    Walk,
    Run,
    Jump,
    Fall,
    Land,
    Crouch,
    Emote(String),
    Custom(String),
}

impl AnimState {
    pub fn clip_name(&self) -> String {
        match self {
            AnimState::Idle => "idle".to_string(),
            AnimState::Walk => "walk".to_string(),
            AnimState::Run => "run".to_string(),
            AnimState::Jump => "jump".to_string(),
            AnimState::Fall => "fall".to_string(),
            AnimState::Land => "land".to_string(),
            AnimState::Crouch => "crouch".to_string(),
            AnimState::Emote(name) => name.clone(),
            AnimState::Custom(name) => name.clone(),
        }
    }
}
