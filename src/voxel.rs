//! The sparse voxel grid: [`VoxelBody`], its position-key encoding, expression
//! deltas and spring-region metadata.

use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::{HashMap, HashSet};

use crate::color::Palette;
use crate::error::VoxelError;

pub const DIM_X: i32 = 32;
pub const DIM_Y: i32 = 64;
pub const DIM_Z: i32 = 32;

/// The single `u16` that identifies a voxel slot on the wire, in RLE runs, and
/// in expression/spring-region key sets.
///
/// `k = x + y*32 + z*32*64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey(pub u16);

impl PositionKey {
    pub fn decode(self) -> VoxelCoord {
        let k = self.0 as i32;
        let x = k % DIM_X;
        let y = (k / DIM_X) % DIM_Y;
        let z = k / (DIM_X * DIM_Y);
        VoxelCoord { x, y, z }
    }
}

/// A decoded `(x, y, z)` voxel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn in_bounds(self) -> bool {
        (0..DIM_X).contains(&self.x) && (0..DIM_Y).contains(&self.y) && (0..DIM_Z).contains(&self.z)
    }

    /// `encode(decode(k)) == k` and `decode(encode(x,y,z)) == (x,y,z)` for
    /// all in-bounds positions.
    pub fn encode(self) -> Option<PositionKey> {
        if !self.in_bounds() {
            return None;
        }
        let k = self.x + self.y * DIM_X + self.z * DIM_X * DIM_Y;
        Some(PositionKey(k as u16))
    }

    /// Mirror across the X midplane: `x` becomes `31 - x`.
    pub fn mirrored_x(self) -> VoxelCoord {
        VoxelCoord::new(DIM_X - 1 - self.x, self.y, self.z)
    }
}

/// Which side of the arm/leg X-bands a position falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl VoxelCoord {
    /// `x >= 16` is left, `x < 16` is right.
    pub fn side(self) -> Side {
        if self.x >= DIM_X / 2 {
            Side::Left
        } else {
            Side::Right
        }
    }
}

/// How the renderer should interpret the voxel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Auto = 0,
    Cube = 1,
    Smooth = 2,
}

impl RenderMode {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RenderMode::Auto),
            1 => Some(RenderMode::Cube),
            2 => Some(RenderMode::Smooth),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A bounded name used for expressions and spring regions (wire limit 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoundedName(String);

pub const BOUNDED_NAME_MAX: usize = 32;

impl BoundedName {
    pub fn new(s: impl Into<String>) -> Result<Self, VoxelError> {
        let s = s.into();
        if s.len() > BOUNDED_NAME_MAX {
            return Err(VoxelError::NameTooLong {
                max: BOUNDED_NAME_MAX,
            });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BoundedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An expression's sparse delta: position key -> replacement palette index.
pub type ExpressionDelta = HashMap<PositionKey, u8>;

/// Tunable per-region secondary-motion parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringParams {
    pub stiffness: f32,
    pub damping: f32,
    pub gravity_factor: f32,
    /// Scales the wind term applied to this chain: `0.0` ignores wind
    /// entirely, `1.0` applies it at full strength.
    pub wind_influence: f32,
}

impl Default for SpringParams {
    fn default() -> Self {
        Self {
            stiffness: 0.5,
            damping: 0.1,
            gravity_factor: 1.0,
            wind_influence: 1.0,
        }
    }
}

/// An authored set of voxels participating in dynamic secondary motion.
#[derive(Debug, Clone, PartialEq)]
pub struct SpringRegion {
    pub name: BoundedName,
    pub voxel_keys: HashSet<PositionKey>,
    pub params: SpringParams,
}

/// Author-facing metadata; not interpreted by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub id: String,
    pub name: String,
    pub creator_id: Option<String>,
    pub created_at: u64,
    pub modified_at: u64,
}

pub const METADATA_NAME_MAX: usize = 64;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Metadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            creator_id: None,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Tight axis-aligned bounding box over a non-empty voxel set, in voxel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aabb {
    pub min: VoxelCoord,
    pub max: VoxelCoord,
}

/// A single violation reported by [`VoxelBody::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    VoxelOutOfPalette { key: PositionKey, index: u8 },
    ExpressionKeyOutOfBounds { expression: String, key: u16 },
    ExpressionIndexOutOfPalette { expression: String, index: u8 },
    SpringRegionKeyOutOfBounds { region: String, key: u16 },
    NameTooLong { field: &'static str, len: usize },
}

/// The sparse 32x64x32 voxel store, its palette, expressions and spring regions.
#[derive(Debug, Clone)]
pub struct VoxelBody {
    voxels: HashMap<PositionKey, u8>,
    palette: Palette,
    metadata: Metadata,
    render_mode: RenderMode,
    expressions: HashMap<BoundedName, ExpressionDelta>,
    spring_regions: Vec<SpringRegion>,
    bounds_cache: Option<Option<Aabb>>,
}

impl VoxelBody {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            voxels: HashMap::new(),
            palette: Palette::new(),
            metadata,
            render_mode: RenderMode::default(),
            expressions: HashMap::new(),
            spring_regions: Vec::new(),
            bounds_cache: None,
        }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut Palette {
        &mut self.palette
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.render_mode = mode;
        self.touch();
    }

    fn touch(&mut self) {
        self.metadata.modified_at = now_millis();
        self.bounds_cache = None;
    }

    /// Set the voxel at `(x, y, z)` to `palette_index`.
    pub fn set(&mut self, x: i32, y: i32, z: i32, palette_index: u8) -> Result<(), VoxelError> {
        let coord = VoxelCoord::new(x, y, z);
        let key = coord
            .encode()
            .ok_or(VoxelError::InvalidPosition { x, y, z })?;
        if palette_index as usize >= self.palette.len() {
            return Err(VoxelError::InvalidPaletteIndex(palette_index));
        }
        self.voxels.insert(key, palette_index);
        self.touch();
        Ok(())
    }

    pub fn get(&self, x: i32, y: i32, z: i32) -> Option<u8> {
        let key = VoxelCoord::new(x, y, z).encode()?;
        self.voxels.get(&key).copied()
    }

    pub fn has(&self, x: i32, y: i32, z: i32) -> bool {
        self.get(x, y, z).is_some()
    }

    /// Remove the voxel at `(x, y, z)`, also dropping it from whichever spring
    /// region owns it (the "at most one region" invariant is enforced here).
    pub fn remove(&mut self, x: i32, y: i32, z: i32) {
        let Some(key) = VoxelCoord::new(x, y, z).encode() else {
            return;
        };
        if self.voxels.remove(&key).is_some() {
            for region in &mut self.spring_regions {
                region.voxel_keys.remove(&key);
            }
            self.touch();
        }
    }

    pub fn clear(&mut self) {
        self.voxels.clear();
        self.touch();
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// The tight AABB over all voxels, or `None` if empty.
    pub fn bounds(&mut self) -> Option<Aabb> {
        if let Some(cached) = self.bounds_cache {
            return cached;
        }
        let aabb = self.compute_bounds();
        self.bounds_cache = Some(aabb);
        aabb
    }

    fn compute_bounds(&self) -> Option<Aabb> {
        let mut iter = self.voxels.keys().map(|k| k.decode());
        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for c in iter {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            min.z = min.z.min(c.z);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
            max.z = max.z.max(c.z);
        }
        Some(Aabb { min, max })
    }

    /// Iterate voxels in ascending key order.
    ///
    /// Because `key = x + 32*y + 2048*z`, this is equivalent to sorting
    /// primarily by `z`, then `y`, then `x`. That order keeps runs of
    /// consecutive `x` contiguous, which is what makes the RLE voxel
    /// encoding effective.
    pub fn for_each_sorted(&self, mut f: impl FnMut(PositionKey, u8)) {
        let mut entries: Vec<_> = self.voxels.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_unstable_by_key(|(k, _)| k.0);
        for (k, v) in entries {
            f(k, v);
        }
    }

    /// Flip every voxel across the X midplane. Applying this twice restores
    /// the original voxel set.
    pub fn mirror_x(&mut self) {
        let mirrored: HashMap<PositionKey, u8> = self
            .voxels
            .iter()
            .map(|(k, v)| {
                let mirrored_key = k
                    .decode()
                    .mirrored_x()
                    .encode()
                    .expect("mirroring an in-bounds coordinate stays in-bounds");
                (mirrored_key, *v)
            })
            .collect();
        self.voxels = mirrored;
        self.touch();
    }

    /// Overwrite one side of the body with the mirror image of the other.
    pub fn apply_symmetry(&mut self, direction: SymmetryDirection) {
        use crate::voxel::Side::*;
        let (source_side, dest_side) = match direction {
            SymmetryDirection::LeftToRight => (Left, Right),
            SymmetryDirection::RightToLeft => (Right, Left),
        };
        let source: Vec<(PositionKey, u8)> = self
            .voxels
            .iter()
            .filter(|(k, _)| k.decode().side() == source_side)
            .map(|(k, v)| (*k, *v))
            .collect();
        self.voxels.retain(|k, _| k.decode().side() != dest_side);
        for (key, idx) in source {
            let mirrored_key = key
                .decode()
                .mirrored_x()
                .encode()
                .expect("mirroring an in-bounds coordinate stays in-bounds");
            self.voxels.insert(mirrored_key, idx);
        }
        self.touch();
    }

    pub fn set_expression(&mut self, name: &str, delta: ExpressionDelta) -> Result<(), VoxelError> {
        let name = BoundedName::new(name)?;
        self.expressions.insert(name, delta);
        self.touch();
        Ok(())
    }

    pub fn get_expression(&self, name: &str) -> Option<&ExpressionDelta> {
        self.expressions
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, d)| d)
    }

    pub fn remove_expression(&mut self, name: &str) {
        self.expressions.retain(|n, _| n.as_str() != name);
        self.touch();
    }

    pub fn list_expressions(&self) -> impl Iterator<Item = &str> {
        self.expressions.keys().map(|n| n.as_str())
    }

    pub fn expressions(&self) -> &HashMap<BoundedName, ExpressionDelta> {
        &self.expressions
    }

    pub fn add_spring_region(&mut self, region: SpringRegion) -> Result<(), VoxelError> {
        for existing in &self.spring_regions {
            if existing.voxel_keys.iter().any(|k| region.voxel_keys.contains(k)) {
                let conflicting = *existing
                    .voxel_keys
                    .iter()
                    .find(|k| region.voxel_keys.contains(k))
                    .unwrap();
                return Err(VoxelError::VoxelAlreadyInSpringRegion(conflicting));
            }
        }
        self.spring_regions.push(region);
        self.touch();
        Ok(())
    }

    pub fn get_spring_region(&self, name: &str) -> Option<&SpringRegion> {
        self.spring_regions.iter().find(|r| r.name.as_str() == name)
    }

    pub fn spring_regions(&self) -> &[SpringRegion] {
        &self.spring_regions
    }

    pub fn list_spring_regions(&self) -> impl Iterator<Item = &str> {
        self.spring_regions.iter().map(|r| r.name.as_str())
    }

    /// Resolve a single voxel's blended palette index for a given expression
    /// at `weight`, without materializing a whole derived voxel map.
    ///
    /// `None` means there is nothing to render at `key` at all (both the base
    /// body and the delta are empty there).
    pub fn applied_expression_voxel(&self, key: PositionKey, expression: &str, weight: f32) -> Option<u8> {
        let base = self.voxels.get(&key).copied();
        let Some(delta) = self.get_expression(expression) else {
            return base;
        };
        let Some(&delta_index) = delta.get(&key) else {
            return base;
        };
        if weight >= 1.0 {
            Some(delta_index)
        } else if weight <= 0.0 {
            base
        } else {
            // Palette indices don't blend continuously; the renderer picks the
            // index whose weight crosses 0.5, matching expression deltas'
            // replace semantics rather than a true color lerp.
            if weight >= 0.5 {
                Some(delta_index)
            } else {
                base.or(Some(delta_index))
            }
        }
    }

    /// Voxel count per palette slot, used by the mesher's fast impostor path
    /// to find the dominant color in one scan.
    pub fn voxel_count_by_palette(&self) -> [u32; 16] {
        let mut counts = [0u32; 16];
        for &idx in self.voxels.values() {
            if (idx as usize) < counts.len() {
                counts[idx as usize] += 1;
            }
        }
        counts
    }

    /// Enumerate every structural issue without short-circuiting, for
    /// editor-side surfacing.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.metadata.name.len() > METADATA_NAME_MAX {
            violations.push(Violation::NameTooLong {
                field: "name",
                len: self.metadata.name.len(),
            });
        }
        for (&key, &index) in &self.voxels {
            if index as usize >= self.palette.len() {
                violations.push(Violation::VoxelOutOfPalette { key, index });
            }
        }
        for (name, delta) in &self.expressions {
            for (&key, &index) in delta {
                if !key.decode().in_bounds() {
                    violations.push(Violation::ExpressionKeyOutOfBounds {
                        expression: name.as_str().to_string(),
                        key: key.0,
                    });
                }
                if index as usize >= self.palette.len() {
                    violations.push(Violation::ExpressionIndexOutOfPalette {
                        expression: name.as_str().to_string(),
                        index,
                    });
                }
            }
        }
        for region in &self.spring_regions {
            for &key in &region.voxel_keys {
                if !key.decode().in_bounds() {
                    violations.push(Violation::SpringRegionKeyOutOfBounds {
                        region: region.name.as_str().to_string(),
                        key: key.0,
                    });
                }
            }
        }
        violations
    }
}

/// Direction argument to [`VoxelBody::apply_symmetry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetryDirection {
    LeftToRight,
    RightToLeft,
}

impl PartialEq for VoxelBody {
    fn eq(&self, other: &Self) -> bool {
        self.voxels == other.voxels
            && self.palette == other.palette
            && self.render_mode == other.render_mode
            && self.expressions == other.expressions
            && self.spring_regions == other.spring_regions
            && self.metadata.name == other.metadata.name
            && self.metadata.creator_id == other.metadata.creator_id
            && self.metadata.created_at == other.metadata.created_at
            && self.metadata.modified_at == other.metadata.modified_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorType;

    fn body_with_red_palette() -> VoxelBody {
        let mut b = VoxelBody::new(Metadata::new("id", "name"));
        b.palette_mut().add(255, 0, 0, ColorType::Solid).unwrap();
        b.palette_mut().add(0, 255, 0, ColorType::Solid).unwrap();
        b
    }

    #[test]
    fn encode_decode_roundtrip_all_keys() {
        for k in 0..(DIM_X * DIM_Y * DIM_Z) as u16 {
            let coord = PositionKey(k).decode();
            assert_eq!(coord.encode(), Some(PositionKey(k)));
        }
    }

    #[test]
    fn encode_decode_roundtrip_all_coords() {
        for x in 0..DIM_X {
            for y in (0..DIM_Y).step_by(7) {
                for z in 0..DIM_Z {
                    let coord = VoxelCoord::new(x, y, z);
                    let key = coord.encode().unwrap();
                    assert_eq!(key.decode(), coord);
                }
            }
        }
    }

    #[test]
    fn out_of_bounds_position_fails() {
        let mut b = body_with_red_palette();
        assert_eq!(
            b.set(32, 0, 0, 0),
            Err(VoxelError::InvalidPosition { x: 32, y: 0, z: 0 })
        );
    }

    #[test]
    fn set_get_remove() {
        let mut b = body_with_red_palette();
        b.set(1, 2, 3, 0).unwrap();
        assert_eq!(b.get(1, 2, 3), Some(0));
        assert!(b.has(1, 2, 3));
        b.remove(1, 2, 3);
        assert!(!b.has(1, 2, 3));
    }

    #[test]
    fn mirror_x_twice_is_identity() {
        let mut b = body_with_red_palette();
        b.set(0, 0, 0, 0).unwrap();
        b.set(5, 10, 15, 1).unwrap();
        let before = b.clone();
        b.mirror_x();
        b.mirror_x();
        assert_eq!(b, before);
    }

    #[test]
    fn mirror_x_moves_expected_voxel() {
        let mut b = body_with_red_palette();
        b.set(0, 0, 0, 0).unwrap();
        b.mirror_x();
        assert!(!b.has(0, 0, 0));
        assert!(b.has(31, 0, 0));
    }

    #[test]
    fn for_each_sorted_is_key_ascending() {
        let mut b = body_with_red_palette();
        b.set(5, 0, 0, 0).unwrap();
        b.set(0, 0, 0, 0).unwrap();
        b.set(3, 0, 0, 0).unwrap();
        let mut seen = Vec::new();
        b.for_each_sorted(|k, _| seen.push(k.0));
        assert_eq!(seen, vec![0, 3, 5]);
    }

    #[test]
    fn bounds_of_empty_body_is_none() {
        let mut b = body_with_red_palette();
        assert_eq!(b.bounds(), None);
    }

    #[test]
    fn bounds_is_tight() {
        let mut b = body_with_red_palette();
        b.set(1, 2, 3, 0).unwrap();
        b.set(4, 5, 6, 0).unwrap();
        let aabb = b.bounds().unwrap();
        assert_eq!(aabb.min, VoxelCoord::new(1, 2, 3));
        assert_eq!(aabb.max, VoxelCoord::new(4, 5, 6));
    }

    #[test]
    fn removing_voxel_drops_it_from_spring_region() {
        let mut b = body_with_red_palette();
        b.set(1, 1, 1, 0).unwrap();
        let key = VoxelCoord::new(1, 1, 1).encode().unwrap();
        let mut keys = HashSet::new();
        keys.insert(key);
        b.add_spring_region(SpringRegion {
            name: BoundedName::new("tail").unwrap(),
            voxel_keys: keys,
            params: SpringParams::default(),
        })
        .unwrap();
        b.remove(1, 1, 1);
        assert!(!b.get_spring_region("tail").unwrap().voxel_keys.contains(&key));
    }

    #[test]
    fn spring_region_membership_is_exclusive() {
        let mut b = body_with_red_palette();
        b.set(1, 1, 1, 0).unwrap();
        let key = VoxelCoord::new(1, 1, 1).encode().unwrap();
        let mut keys = HashSet::new();
        keys.insert(key);
        b.add_spring_region(SpringRegion {
            name: BoundedName::new("a").unwrap(),
            voxel_keys: keys.clone(),
            params: SpringParams::default(),
        })
        .unwrap();
        let err = b
            .add_spring_region(SpringRegion {
                name: BoundedName::new("b").unwrap(),
                voxel_keys: keys,
                params: SpringParams::default(),
            })
            .unwrap_err();
        assert_eq!(err, VoxelError::VoxelAlreadyInSpringRegion(key));
    }

    #[test]
    fn validate_reports_out_of_palette_voxel() {
        let mut b = VoxelBody::new(Metadata::new("id", "name"));
        b.palette_mut().add(0, 0, 0, ColorType::Solid).unwrap();
        // Bypass the normal setter's palette check to simulate a corrupted load.
        let key = VoxelCoord::new(0, 0, 0).encode().unwrap();
        b.voxels.insert(key, 5);
        let violations = b.validate();
        assert!(violations.contains(&Violation::VoxelOutOfPalette { key, index: 5 }));
    }

    #[test]
    fn expression_weight_zero_is_neutral() {
        let mut b = body_with_red_palette();
        b.set(0, 0, 0, 0).unwrap();
        let key = VoxelCoord::new(0, 0, 0).encode().unwrap();
        let mut delta = ExpressionDelta::new();
        delta.insert(key, 1);
        b.set_expression("smile", delta).unwrap();
        assert_eq!(b.applied_expression_voxel(key, "smile", 0.0), Some(0));
        assert_eq!(b.applied_expression_voxel(key, "smile", 1.0), Some(1));
    }
}
