//! PVAV binary container: header, metadata, palette, RLE voxel runs, and
//! optional expression/spring-region sections, with an optional gzip wrap.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::color::Palette;
use crate::error::CodecError;
use crate::voxel::{
    ExpressionDelta, Metadata, PositionKey, RenderMode, SpringParams, SpringRegion, VoxelBody,
};

const MAGIC: [u8; 4] = *b"PVAV";
const CURRENT_VERSION: u8 = 1;
const HEADER_LEN: usize = 16;

const FLAG_HAS_EXPRESSIONS: u8 = 0x1;
const FLAG_HAS_SPRING_REGIONS: u8 = 0x2;

struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u64_as_hi_lo(&mut self, v: u64) {
        self.u32((v >> 32) as u32);
        self.u32((v & 0xFFFF_FFFF) as u32);
    }
    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
    fn short_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.u8(bytes.len().min(255) as u8);
        self.bytes(&bytes[..bytes.len().min(255)]);
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64_from_hi_lo(&mut self) -> Result<u64, CodecError> {
        let hi = self.u32()? as u64;
        let lo = self.u32()? as u64;
        Ok((hi << 32) | lo)
    }
    fn short_string(&mut self) -> Result<String, CodecError> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// One contiguous run of identically-indexed, key-adjacent voxels.
///
/// `length` is a `u8`, so a run never grows past 254 voxels; a longer
/// stretch of identical, contiguous voxels is simply split into more runs.
struct Run {
    start_key: u16,
    length: u8,
    palette_index: u8,
}

const MAX_RUN_LENGTH: u8 = 254;

fn encode_runs(body: &VoxelBody) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;
    body.for_each_sorted(|key, index| {
        match &mut current {
            Some(run)
                if run.palette_index == index
                    && run.length < MAX_RUN_LENGTH
                    && run.start_key as u32 + run.length as u32 == key.0 as u32 =>
            {
                run.length += 1;
            }
            _ => {
                if let Some(run) = current.take() {
                    runs.push(run);
                }
                current = Some(Run {
                    start_key: key.0,
                    length: 1,
                    palette_index: index,
                });
            }
        }
    });
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

fn encode_inner(body: &VoxelBody) -> Result<Vec<u8>, CodecError> {
    let runs = encode_runs(body);
    let expressions = body.expressions();
    let spring_regions = body.spring_regions();
    let voxel_count: u32 = runs.iter().map(|r| r.length as u32).sum();

    let mut flags = 0u8;
    if !expressions.is_empty() {
        flags |= FLAG_HAS_EXPRESSIONS;
    }
    if !spring_regions.is_empty() {
        flags |= FLAG_HAS_SPRING_REGIONS;
    }

    let mut w = ByteWriter::new();
    w.bytes(&MAGIC);
    w.u8(CURRENT_VERSION);
    w.u8(flags);
    w.u16(voxel_count.min(u16::MAX as u32) as u16);
    w.u8(body.palette().len() as u8);
    w.u8(expressions.len().min(255) as u8);
    w.u8(spring_regions.len().min(255) as u8);
    w.u8(body.render_mode().as_u8());
    w.bytes(&[0u8; 4]); // reserved
    debug_assert_eq!(w.buf.len(), HEADER_LEN);

    let metadata = body.metadata();
    w.short_string(&metadata.name);
    w.short_string(metadata.creator_id.as_deref().unwrap_or(""));
    w.u64_as_hi_lo(metadata.created_at);
    w.u64_as_hi_lo(metadata.modified_at);

    w.bytes(&body.palette().to_binary());

    w.u16(runs.len().min(u16::MAX as usize) as u16);
    for run in &runs {
        w.u16(run.start_key);
        w.u8(run.palette_index);
        w.u8(run.length);
    }

    if flags & FLAG_HAS_EXPRESSIONS != 0 {
        for (name, delta) in expressions {
            w.short_string(name.as_str());
            w.u16(delta.len().min(u16::MAX as usize) as u16);
            for (&key, &index) in delta {
                w.u16(key.0);
                w.u8(index);
            }
        }
    }

    if flags & FLAG_HAS_SPRING_REGIONS != 0 {
        for region in spring_regions {
            w.short_string(region.name.as_str());
            w.f32(region.params.stiffness);
            w.f32(region.params.damping);
            w.f32(region.params.gravity_factor);
            w.f32(region.params.wind_influence);
            w.u16(region.voxel_keys.len().min(u16::MAX as usize) as u16);
            for &key in &region.voxel_keys {
                w.u16(key.0);
            }
        }
    }

    Ok(w.buf)
}

/// Serialize `body` to the PVAV wire format. `gzip` controls the leading
/// wrap byte: `1` means the remainder is gzip-compressed, `0` raw.
pub fn encode(body: &VoxelBody, gzip: bool) -> Result<Vec<u8>, CodecError> {
    let inner = encode_inner(body)?;
    let mut out = Vec::with_capacity(inner.len() + 1);
    if gzip {
        out.push(1);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&inner)?;
        out.extend(encoder.finish()?);
    } else {
        out.push(0);
        out.extend(inner);
    }
    Ok(out)
}

fn decode_inner(bytes: &[u8]) -> Result<VoxelBody, CodecError> {
    let mut r = ByteReader::new(bytes);
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = r.u8()?;
    if version > CURRENT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            max: CURRENT_VERSION,
        });
    }
    let flags = r.u8()?;
    let _voxel_count = r.u16()?;
    let palette_count = r.u8()?;
    let expression_count = r.u8()?;
    let spring_region_count = r.u8()?;
    let render_mode_byte = r.u8()?;
    let render_mode = RenderMode::from_u8(render_mode_byte).unwrap_or_default();
    let _reserved = r.take(4)?;
    debug_assert_eq!(r.pos, HEADER_LEN);

    let name = r.short_string()?;
    let creator = r.short_string()?;
    let created_at = r.u64_from_hi_lo()?;
    let modified_at = r.u64_from_hi_lo()?;
    let metadata = Metadata {
        id: String::new(),
        name,
        creator_id: if creator.is_empty() { None } else { Some(creator) },
        created_at,
        modified_at,
    };

    let palette_bytes = r.take(palette_count as usize * 4)?;
    let palette = Palette::from_binary(palette_bytes).ok_or(CodecError::Truncated)?;

    let mut body = VoxelBody::new(metadata);
    *body.palette_mut() = palette;
    body.set_render_mode(render_mode);

    let run_count = r.u16()?;
    for _ in 0..run_count {
        let start_key = r.u16()?;
        let index = r.u8()?;
        let length = r.u8()?;
        if index as usize >= body.palette().len() {
            return Err(CodecError::InvalidPaletteIndex(index));
        }
        for offset in 0..length as u16 {
            let key = start_key
                .checked_add(offset)
                .ok_or(CodecError::InvalidPositionKey(start_key))?;
            let coord = PositionKey(key).decode();
            if !coord.in_bounds() {
                return Err(CodecError::InvalidPositionKey(key));
            }
            body.set(coord.x, coord.y, coord.z, index)
                .map_err(|_| CodecError::InvalidPositionKey(key))?;
        }
    }

    if flags & FLAG_HAS_EXPRESSIONS != 0 {
        for _ in 0..expression_count {
            let name = r.short_string()?;
            let delta_count = r.u16()?;
            let mut delta = ExpressionDelta::new();
            for _ in 0..delta_count {
                let key = r.u16()?;
                let index = r.u8()?;
                delta.insert(PositionKey(key), index);
            }
            body.set_expression(&name, delta).map_err(|_| CodecError::Truncated)?;
        }
    }

    if flags & FLAG_HAS_SPRING_REGIONS != 0 {
        for _ in 0..spring_region_count {
            let name = r.short_string()?;
            let stiffness = r.f32()?;
            let damping = r.f32()?;
            let gravity_factor = r.f32()?;
            let wind_influence = r.f32()?;
            let key_count = r.u16()?;
            let mut keys = hashbrown::HashSet::new();
            for _ in 0..key_count {
                keys.insert(PositionKey(r.u16()?));
            }
            let region = SpringRegion {
                name: crate::voxel::BoundedName::new(name).map_err(|_| CodecError::Truncated)?,
                voxel_keys: keys,
                params: SpringParams {
                    stiffness,
                    damping,
                    gravity_factor,
                    wind_influence,
                },
            };
            body.add_spring_region(region).map_err(|_| CodecError::Truncated)?;
        }
    }

    Ok(body)
}

/// Parse a PVAV byte stream, transparently gunzipping if the leading wrap
/// byte asks for it.
pub fn decode(bytes: &[u8]) -> Result<VoxelBody, CodecError> {
    let &wrap = bytes.first().ok_or(CodecError::Truncated)?;
    let rest = &bytes[1..];
    if wrap == 1 {
        let mut decoder = GzDecoder::new(rest);
        let mut inner = Vec::new();
        decoder.read_to_end(&mut inner)?;
        decode_inner(&inner)
    } else {
        decode_inner(rest)
    }
}

/// The JSON-friendly shadow of [`Metadata`] used by the debug/editor JSON
/// variant below. Unlike the packed binary metadata section, this carries
/// `id` too, since the JSON variant is a full dump rather than the wire
/// format's fixed fields.
#[derive(serde::Serialize)]
struct MetadataWire {
    id: String,
    name: String,
    creator_id: Option<String>,
    created_at: u64,
    modified_at: u64,
}

impl From<&Metadata> for MetadataWire {
    fn from(m: &Metadata) -> Self {
        Self {
            id: m.id.clone(),
            name: m.name.clone(),
            creator_id: m.creator_id.clone(),
            created_at: m.created_at,
            modified_at: m.modified_at,
        }
    }
}

/// Serialize a body to the human-readable JSON variant instead of the
/// binary wire format, for editor/debug tooling.
pub fn encode_json(body: &VoxelBody) -> Result<String, CodecError> {
    #[derive(serde::Serialize)]
    struct JsonVoxel {
        key: u16,
        index: u8,
    }
    #[derive(serde::Serialize)]
    struct JsonBody {
        metadata: MetadataWire,
        render_mode: u8,
        palette: Vec<(u8, u8, u8, u8)>,
        voxels: Vec<JsonVoxel>,
    }
    let mut voxels = Vec::new();
    body.for_each_sorted(|key, index| voxels.push(JsonVoxel { key: key.0, index }));
    let palette = (0..body.palette().len() as u8)
        .map(|i| {
            let c = body.palette().get(i).unwrap();
            (c.r, c.g, c.b, c.ty as u8)
        })
        .collect();
    let wire = JsonBody {
        metadata: MetadataWire::from(body.metadata()),
        render_mode: body.render_mode().as_u8(),
        palette,
        voxels,
    };
    Ok(serde_json::to_string(&wire)?)
}
