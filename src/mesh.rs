//! Unified greedy voxel mesher: face culling, 2D greedy quad merging per
//! direction/material group, and a fast low-detail impostor path.

use crate::color::Color;
use crate::voxel::{VoxelCoord, DIM_X, DIM_Y, DIM_Z};

/// Anything the mesher can read voxel occupancy and material from. Keeping
/// this a trait (rather than meshing `VoxelBody` directly) lets the runtime
/// feed it posed, skinned voxel positions without a second copy of the grid.
pub trait MeshableVoxels {
    /// The surface material at `coord`, or `None` if empty.
    fn material_at(&self, coord: VoxelCoord) -> Option<FaceMaterial>;

    fn is_solid(&self, coord: VoxelCoord) -> bool {
        self.material_at(coord).is_some()
    }

    /// Inclusive voxel-space bounds the mesher should sweep. Defaults to the
    /// full fixed-size grid; a chunked implementor narrows this to its own
    /// extent so the mesher doesn't scan space it doesn't own.
    fn bounds(&self) -> (VoxelCoord, VoxelCoord) {
        (VoxelCoord::new(0, 0, 0), VoxelCoord::new(DIM_X - 1, DIM_Y - 1, DIM_Z - 1))
    }

    /// Occlusion override for a neighbor coordinate that falls outside
    /// `bounds()`. `Some(true)`/`Some(false)` forces occluded/exposed,
    /// typically backed by an adjacent chunk's edge; `None` (the default)
    /// falls back to treating out-of-bounds neighbors as empty.
    fn neighbor_solid(&self, _coord: VoxelCoord) -> Option<bool> {
        None
    }
}

/// What a merged quad is shaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceMaterial {
    pub color: [u8; 3],
    pub texture_id: Option<u16>,
}

impl FaceMaterial {
    pub fn from_color(c: Color) -> Self {
        Self {
            color: [c.r, c.g, c.b],
            texture_id: None,
        }
    }
}

/// The six axis-aligned face directions a cube can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

const DIRECTIONS: [Direction; 6] = [
    Direction::PosX,
    Direction::NegX,
    Direction::PosY,
    Direction::NegY,
    Direction::PosZ,
    Direction::NegZ,
];

impl Direction {
    fn normal(self) -> [f32; 3] {
        match self {
            Direction::PosX => [1.0, 0.0, 0.0],
            Direction::NegX => [-1.0, 0.0, 0.0],
            Direction::PosY => [0.0, 1.0, 0.0],
            Direction::NegY => [0.0, -1.0, 0.0],
            Direction::PosZ => [0.0, 0.0, 1.0],
            Direction::NegZ => [0.0, 0.0, -1.0],
        }
    }

    fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::PosX => (1, 0, 0),
            Direction::NegX => (-1, 0, 0),
            Direction::PosY => (0, 1, 0),
            Direction::NegY => (0, -1, 0),
            Direction::PosZ => (0, 0, 1),
            Direction::NegZ => (0, 0, -1),
        }
    }
}

/// One interleaved vertex, laid out for direct GPU buffer upload via `bytemuck`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

/// Indexed GPU-ready geometry: an interleaved vertex buffer and a triangle
/// index buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// The vertex buffer as raw bytes, ready for a GPU upload call.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    fn push_quad(&mut self, corners: [[f32; 3]; 4], normal: [f32; 3], color: [f32; 3]) {
        let base = self.vertices.len() as u32;
        for corner in corners {
            self.vertices.push(Vertex {
                position: corner,
                normal,
                color,
            });
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Two perpendicular in-plane axes for a sweep direction, used to walk the
/// 2D slice greedy merging operates over.
fn plane_axes(dir: Direction) -> (usize, usize, usize) {
    match dir {
        Direction::PosX | Direction::NegX => (0, 1, 2), // sweep x, plane (y,z)
        Direction::PosY | Direction::NegY => (1, 0, 2), // sweep y, plane (x,z)
        Direction::PosZ | Direction::NegZ => (2, 0, 1), // sweep z, plane (x,y)
    }
}

fn coord_from_axes(sweep_axis: usize, sweep: i32, u_axis: usize, u: i32, v_axis: usize, v: i32) -> VoxelCoord {
    let mut c = [0i32; 3];
    c[sweep_axis] = sweep;
    c[u_axis] = u;
    c[v_axis] = v;
    VoxelCoord::new(c[0], c[1], c[2])
}

/// O(n) face culling followed by O(f+q) greedy quad merging, grouped by
/// `(direction, material)` so adjoining voxels of different colors never
/// merge into one quad.
pub fn mesh(voxels: &impl MeshableVoxels) -> MeshData {
    let mut mesh = MeshData::default();
    for dir in DIRECTIONS {
        mesh_direction(voxels, dir, &mut mesh);
    }
    mesh
}

/// Whether `neighbor` is solid from the mesher's point of view: a direct
/// lookup when it falls inside `voxels`' own bounds, otherwise whatever the
/// implementor reports for its boundary (an adjacent chunk's edge, or empty
/// by default).
fn occludes(voxels: &impl MeshableVoxels, neighbor: VoxelCoord, min: [i32; 3], max: [i32; 3]) -> bool {
    let inside = neighbor.x >= min[0]
        && neighbor.x <= max[0]
        && neighbor.y >= min[1]
        && neighbor.y <= max[1]
        && neighbor.z >= min[2]
        && neighbor.z <= max[2];
    if inside {
        voxels.is_solid(neighbor)
    } else {
        voxels.neighbor_solid(neighbor).unwrap_or(false)
    }
}

fn mesh_direction(voxels: &impl MeshableVoxels, dir: Direction, mesh: &mut MeshData) {
    let (sweep_axis, u_axis, v_axis) = plane_axes(dir);
    let (bound_min, bound_max) = voxels.bounds();
    let min = [bound_min.x, bound_min.y, bound_min.z];
    let max = [bound_max.x, bound_max.y, bound_max.z];
    let du = max[u_axis] - min[u_axis] + 1;
    let dv = max[v_axis] - min[v_axis] + 1;
    let (ox, oy, oz) = dir.offset();
    let offset = [ox, oy, oz];
    let normal = dir.normal();

    for sweep in min[sweep_axis]..=max[sweep_axis] {
        // mask[u][v] = exposed face material at this plane cell, if any,
        // indexed relative to the bounds' own origin.
        let mut mask: Vec<Option<FaceMaterial>> = vec![None; (du * dv) as usize];
        for u in 0..du {
            for v in 0..dv {
                let coord = coord_from_axes(sweep_axis, sweep, u_axis, u + min[u_axis], v_axis, v + min[v_axis]);
                let Some(material) = voxels.material_at(coord) else {
                    continue;
                };
                let neighbor = VoxelCoord::new(coord.x + offset[0], coord.y + offset[1], coord.z + offset[2]);
                if !occludes(voxels, neighbor, min, max) {
                    mask[(u * dv + v) as usize] = Some(material);
                }
            }
        }

        greedy_merge_plane(
            &mut mask,
            du,
            dv,
            min[u_axis],
            min[v_axis],
            sweep,
            sweep_axis,
            u_axis,
            v_axis,
            dir,
            normal,
            mesh,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn greedy_merge_plane(
    mask: &mut [Option<FaceMaterial>],
    du: i32,
    dv: i32,
    u_origin: i32,
    v_origin: i32,
    sweep: i32,
    sweep_axis: usize,
    u_axis: usize,
    v_axis: usize,
    dir: Direction,
    normal: [f32; 3],
    mesh: &mut MeshData,
) {
    for u in 0..du {
        let mut v = 0;
        while v < dv {
            let idx = (u * dv + v) as usize;
            let Some(material) = mask[idx] else {
                v += 1;
                continue;
            };

            // Extend along v as far as the same material repeats.
            let mut height = 1;
            while v + height < dv && mask[(u * dv + v + height) as usize] == Some(material) {
                height += 1;
            }

            // Extend along u as far as every cell in the row matches too.
            let mut width = 1;
            'width: while u + width < du {
                for dv_ in 0..height {
                    if mask[((u + width) * dv + v + dv_) as usize] != Some(material) {
                        break 'width;
                    }
                }
                width += 1;
            }

            for wu in 0..width {
                for wv in 0..height {
                    mask[((u + wu) * dv + v + wv) as usize] = None;
                }
            }

            emit_quad(
                sweep,
                sweep_axis,
                u_axis,
                u + u_origin,
                width,
                v_axis,
                v + v_origin,
                height,
                dir,
                normal,
                material,
                mesh,
            );
            v += height;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_quad(
    sweep: i32,
    sweep_axis: usize,
    u_axis: usize,
    u0: i32,
    width: i32,
    v_axis: usize,
    v0: i32,
    height: i32,
    dir: Direction,
    normal: [f32; 3],
    material: FaceMaterial,
    mesh: &mut MeshData,
) {
    // Faces sit on the positive-offset side of their voxel on the cube's
    // boundary for positive directions, at the voxel's own coordinate for
    // negative ones.
    let face_sweep = match dir {
        Direction::PosX | Direction::PosY | Direction::PosZ => sweep as f32 + 1.0,
        _ => sweep as f32,
    };

    let corner = |u: f32, v: f32| -> [f32; 3] {
        let mut p = [0.0f32; 3];
        p[sweep_axis] = face_sweep;
        p[u_axis] = u;
        p[v_axis] = v;
        p
    };

    let (u0f, v0f) = (u0 as f32, v0 as f32);
    let (u1f, v1f) = ((u0 + width) as f32, (v0 + height) as f32);

    // Winding differs between +/- directions so every quad faces outward.
    let corners = match dir {
        Direction::PosX | Direction::PosY | Direction::PosZ => {
            [corner(u0f, v0f), corner(u1f, v0f), corner(u1f, v1f), corner(u0f, v1f)]
        }
        Direction::NegX | Direction::NegY | Direction::NegZ => {
            [corner(u0f, v0f), corner(u0f, v1f), corner(u1f, v1f), corner(u1f, v0f)]
        }
    };

    let color = [
        material.color[0] as f32 / 255.0,
        material.color[1] as f32 / 255.0,
        material.color[2] as f32 / 255.0,
    ];
    mesh.push_quad(corners, normal, color);
}

/// A single textured cube standing in for the whole body, for distant LOD.
/// Uses the dominant palette color and the body's tight bounds as the cube
/// extents.
pub fn impostor_mesh(dominant_color: Color, min: VoxelCoord, max: VoxelCoord) -> MeshData {
    struct Box3 {
        min: VoxelCoord,
        max: VoxelCoord,
        material: FaceMaterial,
    }
    impl MeshableVoxels for Box3 {
        fn material_at(&self, coord: VoxelCoord) -> Option<FaceMaterial> {
            let inside = (self.min.x..=self.max.x).contains(&coord.x)
                && (self.min.y..=self.max.y).contains(&coord.y)
                && (self.min.z..=self.max.z).contains(&coord.z);
            inside.then_some(self.material)
        }
    }
    mesh(&Box3 {
        min,
        max,
        material: FaceMaterial::from_color(dominant_color),
    })
}

/// Picks the palette slot with the highest voxel count, for the impostor path.
pub fn dominant_palette_index(counts: &[u32; 16]) -> Option<u8> {
    counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .max_by_key(|(_, &c)| c)
        .map(|(i, _)| i as u8)
}
