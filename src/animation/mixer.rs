//! Cross-fading state machine driving the skeleton's authored pose.

use glam::{Quat, Vec3};
use hashbrown::HashMap;

use super::clips;
use super::types::{AnimState, Clip, LoopMode, Track};
use crate::bone::BoneId;
use crate::skeleton::Skeleton;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationMixerConfig {
    pub walk_speed_threshold: f32,
    pub run_speed_threshold: f32,
}

impl Default for AnimationMixerConfig {
    fn default() -> Self {
        Self {
            walk_speed_threshold: 0.1,
            run_speed_threshold: 5.0,
        }
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

struct PlayingClip {
    name: String,
    time: f32,
}

pub struct AnimationMixer {
    config: AnimationMixerConfig,
    clips: HashMap<String, Clip>,
    state: AnimState,
    current: PlayingClip,
    previous: Option<PlayingClip>,
    blend_remaining: f32,
    blend_total: f32,
    /// Playback rate multiplier driven by movement speed: clip time and
    /// cross-fade progress both advance at `dt * time_scale`.
    time_scale: f32,
}

impl AnimationMixer {
    pub fn new(config: AnimationMixerConfig) -> Self {
        let mut clips = HashMap::new();
        clips.insert("idle".to_string(), clips::idle());
        clips.insert("walk".to_string(), clips::walk());
        clips.insert("run".to_string(), clips::run());
        clips.insert("jump".to_string(), clips::jump());

        Self {
            config,
            clips,
            state: AnimState::Idle,
            current: PlayingClip {
                name: "idle".to_string(),
                time: 0.0,
            },
            previous: None,
            blend_remaining: 0.0,
            blend_total: 0.0,
            time_scale: 1.0,
        }
    }

    pub fn register_clip(&mut self, clip: Clip) {
        self.clips.insert(clip.name.clone(), clip);
    }

    pub fn state(&self) -> &AnimState {
        &self.state
    }

    /// Drive ground-movement state from a scalar speed, mapping to
    /// Idle/Walk/Run by `config`'s thresholds. Also sets the clip playback
    /// rate: `speed/3` while walking, `speed/8` while running, so faster
    /// movement plays the step cycle faster instead of sliding the feet. A
    /// no-op while an action state (Jump/Emote/Custom) is still playing.
    pub fn set_movement_speed(&mut self, speed: f32) {
        if matches!(self.state, AnimState::Jump | AnimState::Emote(_) | AnimState::Custom(_)) {
            return;
        }
        let target = if speed >= self.config.run_speed_threshold {
            AnimState::Run
        } else if speed >= self.config.walk_speed_threshold {
            AnimState::Walk
        } else {
            AnimState::Idle
        };
        self.time_scale = match target {
            AnimState::Walk => (speed / 3.0).max(0.0),
            AnimState::Run => (speed / 8.0).max(0.0),
            _ => 1.0,
        };
        if target != self.state {
            self.transition_to(target);
        }
    }

    /// Trigger a one-shot or looping action state regardless of movement.
    /// Plays at normal speed; movement-driven `time_scale` only applies to
    /// Walk/Run.
    pub fn trigger_state(&mut self, state: AnimState) {
        self.time_scale = 1.0;
        self.transition_to(state);
    }

    fn transition_to(&mut self, state: AnimState) {
        let clip_name = state.clip_name();
        let Some(clip) = self.clips.get(&clip_name) else {
            tracing::warn!(clip = %clip_name, "animation state has no registered clip, ignoring");
            return;
        };
        let transition_duration = clip.transition_duration;
        let old_current = std::mem::replace(
            &mut self.current,
            PlayingClip {
                name: clip_name,
                time: 0.0,
            },
        );
        self.previous = Some(old_current);
        self.blend_total = transition_duration;
        self.blend_remaining = transition_duration;
        self.state = state;
    }

    pub fn update(&mut self, dt: f32) {
        let scaled_dt = dt * self.time_scale;
        self.current.time += scaled_dt;
        if let Some(prev) = &mut self.previous {
            prev.time += scaled_dt;
        }
        if self.blend_remaining > 0.0 {
            self.blend_remaining = (self.blend_remaining - scaled_dt).max(0.0);
            if self.blend_remaining == 0.0 {
                self.previous = None;
            }
        }

        if let Some(clip) = self.clips.get(&self.current.name) {
            if clip.loop_mode == LoopMode::Once && self.current.time >= clip.duration {
                if !matches!(self.state, AnimState::Idle) {
                    self.state = AnimState::Idle;
                    let idle_name = "idle".to_string();
                    self.previous = None;
                    self.current = PlayingClip {
                        name: idle_name,
                        time: 0.0,
                    };
                    self.blend_remaining = 0.0;
                }
            }
        }
    }

    /// Write the blended pose directly onto `skeleton`'s bones touched by
    /// either the current or the outgoing clip.
    pub fn apply(&self, skeleton: &mut Skeleton) {
        let Some(current_clip) = self.clips.get(&self.current.name) else {
            return;
        };
        let current_time = current_clip.normalize_time(self.current.time);

        let blend = if self.blend_total > 0.0 {
            1.0 - smoothstep(self.blend_remaining / self.blend_total)
        } else {
            1.0
        };

        let previous_sample = self.previous.as_ref().and_then(|prev| {
            self.clips.get(&prev.name).map(|clip| (clip, clip.normalize_time(prev.time)))
        });

        let mut touched: Vec<BoneId> = current_clip.tracks.iter().map(Track::bone).collect();
        if let Some((prev_clip, _)) = previous_sample {
            touched.extend(prev_clip.tracks.iter().map(Track::bone));
        }
        touched.sort_unstable();
        touched.dedup();

        for bone in touched {
            let current_rot = sample_bone_rotation(current_clip, bone, current_time);
            let current_pos = sample_bone_position(current_clip, bone, current_time);

            let (rot, pos) = match previous_sample {
                Some((prev_clip, prev_time)) => {
                    let prev_rot = sample_bone_rotation(prev_clip, bone, prev_time);
                    let prev_pos = sample_bone_position(prev_clip, bone, prev_time);
                    let rot = match (prev_rot, current_rot) {
                        (Some(p), Some(c)) => Some(p.slerp(c, blend)),
                        (None, Some(c)) => Some(c),
                        (Some(p), None) => Some(p),
                        (None, None) => None,
                    };
                    let pos = match (prev_pos, current_pos) {
                        (Some(p), Some(c)) => Some(p.lerp(c, blend)),
                        (None, Some(c)) => Some(c),
                        (Some(p), None) => Some(p),
                        (None, None) => None,
                    };
                    (rot, pos)
                }
                None => (current_rot, current_pos),
            };

            if let Some(rot) = rot {
                skeleton.set_local_rotation(bone, rot);
            }
            if let Some(pos) = pos {
                skeleton.set_local_position_offset(bone, pos);
            }
        }
    }
}

fn sample_bone_rotation(clip: &Clip, bone: BoneId, time: f32) -> Option<Quat> {
    clip.tracks.iter().find(|t| t.bone() == bone).and_then(|t| t.sample_rotation(time))
}

fn sample_bone_position(clip: &Clip, bone: BoneId, time: f32) -> Option<Vec3> {
    clip.tracks.iter().find(|t| t.bone() == bone).and_then(|t| t.sample_position(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_is_default_state() {
        let mixer = AnimationMixer::new(AnimationMixerConfig::default());
        assert_eq!(mixer.state(), &AnimState::Idle);
    }

    #[test]
    fn speed_maps_to_locomotion_state() {
        let mut mixer = AnimationMixer::new(AnimationMixerConfig::default());
        mixer.set_movement_speed(1.0);
        assert_eq!(mixer.state(), &AnimState::Walk);
        mixer.set_movement_speed(10.0);
        assert_eq!(mixer.state(), &AnimState::Run);
        mixer.set_movement_speed(0.0);
        assert_eq!(mixer.state(), &AnimState::Idle);
    }

    #[test]
    fn jump_returns_to_idle_after_duration() {
        let mut mixer = AnimationMixer::new(AnimationMixerConfig::default());
        mixer.trigger_state(AnimState::Jump);
        assert_eq!(mixer.state(), &AnimState::Jump);
        mixer.update(10.0);
        assert_eq!(mixer.state(), &AnimState::Idle);
    }

    #[test]
    fn apply_does_not_panic_mid_blend() {
        let mut mixer = AnimationMixer::new(AnimationMixerConfig::default());
        let mut skeleton = Skeleton::new();
        mixer.set_movement_speed(2.0);
        mixer.update(0.05);
        mixer.apply(&mut skeleton);
        skeleton.update_world_transforms();
    }
}
