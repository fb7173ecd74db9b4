//! Facial expression cross-fade blending and idle blink scheduling.

use std::collections::VecDeque;

use hashbrown::HashMap;
use rand::Rng;
use rand_pcg::Pcg32;

use crate::voxel::{PositionKey, VoxelBody};

const BLINK_EXPRESSION_NAME: &str = "blink";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionControllerConfig {
    pub blend_speed: f32,
    pub blink_interval_min: f32,
    pub blink_interval_max: f32,
    pub blink_duration: f32,
}

impl Default for ExpressionControllerConfig {
    fn default() -> Self {
        Self {
            blend_speed: 8.0,
            blink_interval_min: 2.0,
            blink_interval_max: 6.0,
            blink_duration: 0.15,
        }
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// One overlay voxel: the palette index an expression delta wants at this
/// key, and how strongly it should be weighted against whatever the base
/// grid already has there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionSample {
    pub palette_index: u8,
    pub weight: f32,
}

#[derive(Debug, Clone)]
struct QueuedExpression {
    name: String,
    duration: f32,
}

/// Blends a body's base voxels toward an authored expression delta, and
/// separately schedules and blends involuntary blinks via a seeded RNG so
/// playback is deterministic given a fixed seed.
pub struct ExpressionController {
    config: ExpressionControllerConfig,
    current: Option<String>,
    target: Option<String>,
    blend_progress: f32,
    queue: VecDeque<QueuedExpression>,
    queue_elapsed: f32,
    rng: Pcg32,
    next_blink_in: f32,
    blink_phase: f32,
    blink_active: bool,
}

impl ExpressionController {
    pub fn new(config: ExpressionControllerConfig, seed: u64) -> Self {
        let mut rng = Pcg32::new(seed, 0xa02bdbf7bb3c0a7);
        let next_blink_in = rng.random_range(config.blink_interval_min..config.blink_interval_max);
        Self {
            config,
            current: None,
            target: None,
            blend_progress: 1.0,
            queue: VecDeque::new(),
            queue_elapsed: 0.0,
            rng,
            next_blink_in,
            blink_phase: 0.0,
            blink_active: false,
        }
    }

    fn set_target(&mut self, expression_name: Option<String>) {
        self.target = expression_name;
        self.blend_progress = 0.0;
    }

    /// Queue an expression to play, with its own duration, once the current
    /// cross-fade settles. Returns to no expression once the queue empties.
    pub fn trigger(&mut self, expression_name: impl Into<String>, duration: f32) {
        self.queue.push_back(QueuedExpression {
            name: expression_name.into(),
            duration,
        });
    }

    /// Switch immediately, with no queueing and no fade-in.
    pub fn set_immediate(&mut self, expression_name: Option<String>) {
        self.current = expression_name.clone();
        self.target = expression_name;
        self.blend_progress = 1.0;
        self.queue.clear();
        self.queue_elapsed = 0.0;
    }

    pub fn current_target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn current_expression(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn update(&mut self, dt: f32) {
        if self.blend_progress < 1.0 {
            self.blend_progress = (self.blend_progress + dt * self.config.blend_speed).min(1.0);
            if self.blend_progress >= 1.0 {
                self.current = self.target.clone();
            }
        }

        if self.blend_progress >= 1.0 {
            if let Some(front) = self.queue.front().cloned() {
                if self.queue_elapsed == 0.0 {
                    self.set_target(Some(front.name.clone()));
                }
                self.queue_elapsed += dt;
                if self.queue_elapsed >= front.duration {
                    self.queue.pop_front();
                    self.queue_elapsed = 0.0;
                    if self.queue.is_empty() {
                        self.set_target(None);
                    }
                }
            }
        }

        if self.blink_active {
            self.blink_phase += dt;
            if self.blink_phase >= self.config.blink_duration {
                self.blink_active = false;
                self.blink_phase = 0.0;
                self.next_blink_in = self
                    .rng
                    .random_range(self.config.blink_interval_min..self.config.blink_interval_max);
            }
        } else {
            self.next_blink_in -= dt;
            if self.next_blink_in <= 0.0 {
                self.blink_active = true;
                self.blink_phase = 0.0;
            }
        }
    }

    /// Asymmetric blink curve: eases in over the first 30% of the blink
    /// (closing) and eases back out over the remaining 70% (opening),
    /// peaking at `1.0` exactly at the 30% mark.
    fn blink_weight(&self) -> f32 {
        if !self.blink_active || self.config.blink_duration <= 0.0 {
            return 0.0;
        }
        let p = (self.blink_phase / self.config.blink_duration).clamp(0.0, 1.0);
        if p < 0.3 {
            smoothstep(p / 0.3)
        } else {
            1.0 - smoothstep((p - 0.3) / 0.7)
        }
    }

    /// The overlay voxels to apply on top of a body's base grid this frame:
    /// `current`'s delta fading out at `1 - smoothstep(blendProgress)`,
    /// `target`'s fading in at `smoothstep(blendProgress)`, and the blink
    /// delta layered on top of both at its own curve weight.
    pub fn apply(&self, body: &VoxelBody) -> HashMap<PositionKey, ExpressionSample> {
        let mut out = HashMap::new();

        if let Some(name) = &self.current {
            if let Some(delta) = body.get_expression(name) {
                let weight = 1.0 - smoothstep(self.blend_progress);
                for (&key, &palette_index) in delta {
                    out.insert(key, ExpressionSample { palette_index, weight });
                }
            }
        }

        if let Some(name) = &self.target {
            if let Some(delta) = body.get_expression(name) {
                let weight = smoothstep(self.blend_progress);
                for (&key, &palette_index) in delta {
                    out.insert(key, ExpressionSample { palette_index, weight });
                }
            }
        }

        let blink_weight = self.blink_weight();
        if blink_weight > 0.0 {
            if let Some(delta) = body.get_expression(BLINK_EXPRESSION_NAME) {
                for (&key, &palette_index) in delta {
                    out.insert(
                        key,
                        ExpressionSample {
                            palette_index,
                            weight: blink_weight,
                        },
                    );
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::{ExpressionDelta, Metadata, VoxelCoord};

    fn body_with_smile() -> VoxelBody {
        let mut b = VoxelBody::new(Metadata::new("id", "n"));
        b.palette_mut().add(0, 0, 0, crate::color::ColorType::Solid).unwrap();
        b.palette_mut().add(1, 1, 1, crate::color::ColorType::Solid).unwrap();
        b.set(0, 0, 0, 0).unwrap();
        let key = VoxelCoord::new(0, 0, 0).encode().unwrap();
        let mut delta = ExpressionDelta::new();
        delta.insert(key, 1);
        b.set_expression("smile", delta).unwrap();
        b
    }

    #[test]
    fn deterministic_given_same_seed() {
        let mut a = ExpressionController::new(ExpressionControllerConfig::default(), 42);
        let mut b = ExpressionController::new(ExpressionControllerConfig::default(), 42);
        for _ in 0..600 {
            a.update(1.0 / 60.0);
            b.update(1.0 / 60.0);
        }
        assert_eq!(a.blink_active, b.blink_active);
        assert!((a.next_blink_in - b.next_blink_in).abs() < 1e-6);
    }

    #[test]
    fn immediate_switch_applies_fully() {
        let body = body_with_smile();
        let mut ctrl = ExpressionController::new(ExpressionControllerConfig::default(), 1);
        ctrl.set_immediate(Some("smile".to_string()));
        let applied = ctrl.apply(&body);
        let key = VoxelCoord::new(0, 0, 0).encode().unwrap();
        assert_eq!(
            applied.get(&key),
            Some(&ExpressionSample {
                palette_index: 1,
                weight: 1.0
            })
        );
    }

    #[test]
    fn mid_blend_weights_current_and_target_continuously() {
        let body = body_with_smile();
        let mut ctrl = ExpressionController::new(ExpressionControllerConfig::default(), 1);
        ctrl.set_immediate(None);
        ctrl.set_target(Some("smile".to_string()));
        ctrl.blend_progress = 0.5;
        let applied = ctrl.apply(&body);
        let key = VoxelCoord::new(0, 0, 0).encode().unwrap();
        let sample = applied.get(&key).unwrap();
        assert_eq!(sample.palette_index, 1);
        assert!((sample.weight - smoothstep(0.5)).abs() < 1e-6);
    }

    #[test]
    fn triggered_expression_waits_for_current_blend() {
        let mut ctrl = ExpressionController::new(ExpressionControllerConfig::default(), 1);
        ctrl.set_immediate(Some("neutral".to_string()));
        ctrl.blend_progress = 0.2;
        ctrl.trigger("smile", 30.0);
        ctrl.update(0.001);
        assert_eq!(ctrl.current_target(), Some("neutral"));
        ctrl.update(10.0);
        assert_eq!(ctrl.current_target(), Some("smile"));
    }

    #[test]
    fn queue_returns_to_neutral_once_duration_elapses() {
        let mut ctrl = ExpressionController::new(ExpressionControllerConfig::default(), 1);
        ctrl.trigger("smile", 0.5);
        ctrl.update(1.0 / 60.0);
        assert_eq!(ctrl.current_target(), Some("smile"));
        for _ in 0..60 {
            ctrl.update(1.0 / 60.0);
        }
        assert_eq!(ctrl.current_target(), None);
    }

    #[test]
    fn blink_curve_peaks_at_thirty_percent() {
        let mut ctrl = ExpressionController::new(ExpressionControllerConfig::default(), 1);
        ctrl.blink_active = true;
        ctrl.blink_phase = ctrl.config.blink_duration * 0.3;
        assert!((ctrl.blink_weight() - 1.0).abs() < 1e-5);
    }
}
