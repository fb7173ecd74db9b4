//! Error types for the voxel body and its binary container.
//!
//! Mutating operations on [`crate::voxel::VoxelBody`] and [`crate::color::Palette`]
//! return [`VoxelError`]; loading a PVAV container returns [`CodecError`]. Neither
//! type is used for conditions treated as silent no-ops (unknown bone names,
//! physics instability) -- those are total functions, not fallible ones.

use thiserror::Error;

/// Failures from mutating a [`crate::voxel::VoxelBody`] or [`crate::color::Palette`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoxelError {
    #[error("position ({x}, {y}, {z}) is outside the 32x64x32 box")]
    InvalidPosition { x: i32, y: i32, z: i32 },

    #[error("palette index {0} is out of range")]
    InvalidPaletteIndex(u8),

    #[error("palette already holds 16 colors")]
    PaletteFull,

    #[error("name exceeds {max} bytes")]
    NameTooLong { max: usize },

    #[error("voxel key {0:?} already belongs to another spring region")]
    VoxelAlreadyInSpringRegion(crate::voxel::PositionKey),
}

/// Failures from decoding a PVAV container.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing or incorrect PVAV magic bytes")]
    BadMagic,

    #[error("container version {found} is newer than the supported version {max}")]
    UnsupportedVersion { found: u8, max: u8 },

    #[error("container data ended unexpectedly")]
    Truncated,

    #[error("palette index {0} referenced by the container is out of range")]
    InvalidPaletteIndex(u8),

    #[error("position key {0} referenced by the container is out of range")]
    InvalidPositionKey(u16),

    #[error("gzip I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}
