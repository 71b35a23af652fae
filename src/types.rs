//! Core data types for volume projects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Voxel sample kinds a project can store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8 = 0,
    /// Unsigned 16-bit integer
    U16 = 1,
    /// IEEE 754 half precision float
    F16 = 2,
    /// Unsigned 32-bit integer
    U32 = 3,
    /// 32-bit floating point
    F32 = 4,
}

impl DataType {
    /// Size in bytes of one sample of this type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 | DataType::F16 => 2,
            DataType::U32 | DataType::F32 => 4,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::U8 => "uint8",
            DataType::U16 => "uint16",
            DataType::F16 => "half-float",
            DataType::U32 => "uint32",
            DataType::F32 => "float32",
        };
        f.write_str(name)
    }
}

/// Volume axis. Storage order is z-major: `(z, y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    Z = 0,
    Y = 1,
    X = 2,
}

/// Size of a 3D region in voxels (or blocks), stored `(z, y, x)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent3 {
    pub z: u64,
    pub y: u64,
    pub x: u64,
}

impl Extent3 {
    pub fn new(z: u64, y: u64, x: u64) -> Self {
        Self { z, y, x }
    }

    /// Same size along every axis
    pub fn cube(edge: u64) -> Self {
        Self::new(edge, edge, edge)
    }

    pub fn get(&self, axis: Axis) -> u64 {
        match axis {
            Axis::Z => self.z,
            Axis::Y => self.y,
            Axis::X => self.x,
        }
    }

    /// Copy with one axis replaced
    pub fn with(mut self, axis: Axis, value: u64) -> Self {
        match axis {
            Axis::Z => self.z = value,
            Axis::Y => self.y = value,
            Axis::X => self.x = value,
        }
        self
    }

    /// Scale every axis by the matching axis of `other`, `None` on overflow
    pub fn checked_mul(&self, other: &Extent3) -> Option<Extent3> {
        Some(Extent3::new(
            self.z.checked_mul(other.z)?,
            self.y.checked_mul(other.y)?,
            self.x.checked_mul(other.x)?,
        ))
    }

    /// Number of voxels covered, `None` on overflow
    pub fn voxel_count(&self) -> Option<u64> {
        self.z.checked_mul(self.y)?.checked_mul(self.x)
    }

    pub fn is_empty(&self) -> bool {
        self.z == 0 || self.y == 0 || self.x == 0
    }

    /// Human-facing order `[x, y, z]`
    pub fn to_xyz(&self) -> [u64; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for Extent3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {}", self.x, self.y, self.z)
    }
}

/// Lower corner of a region inside a resolution level, stored `(z, y, x)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceOffset {
    pub z: u64,
    pub y: u64,
    pub x: u64,
}

impl SliceOffset {
    pub fn new(z: u64, y: u64, x: u64) -> Self {
        Self { z, y, x }
    }

    /// Offset with `axis` at `position` and the other two axes at zero
    pub fn along(axis: Axis, position: u64) -> Self {
        let mut offset = Self::default();
        match axis {
            Axis::Z => offset.z = position,
            Axis::Y => offset.y = position,
            Axis::X => offset.x = position,
        }
        offset
    }

    /// Exclusive upper corner of a region of `shape` starting here
    pub fn end(&self, shape: &Extent3) -> Option<Extent3> {
        Some(Extent3::new(
            self.z.checked_add(shape.z)?,
            self.y.checked_add(shape.y)?,
            self.x.checked_add(shape.x)?,
        ))
    }
}

impl fmt::Display for SliceOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(z={}, y={}, x={})", self.z, self.y, self.x)
    }
}
