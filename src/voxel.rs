//! Static voxel volume uploaded once at startup
//!
//! Layout on the GPU: a `[size_x, size_y, size_z, 0]` u32 header followed by
//! one packed RGBA8 cell per voxel, x fastest then y then z. A cell value of
//! zero is empty space.

use glam::{UVec3, Vec3};
use thiserror::Error;

/// Largest accepted edge length of a generated volume
pub const MAX_EDGE: u32 = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoxelError {
    #[error("Voxel volume {0} exceeds the maximum edge length of {max}", max = MAX_EDGE)]
    TooLarge(UVec3),
}

/// Pack an opaque color into a non-zero cell value
pub fn pack_color(r: u8, g: u8, b: u8) -> u32 {
    u32::from(r) | (u32::from(g) << 8) | (u32::from(b) << 16) | (0xFF << 24)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelVolume {
    size: UVec3,
    cells: Vec<u32>,
}

impl VoxelVolume {
    /// Empty volume of the given size
    pub fn empty(size: UVec3) -> Result<Self, VoxelError> {
        if size.max_element() > MAX_EDGE {
            return Err(VoxelError::TooLarge(size));
        }
        let count = (size.x as usize)
            .checked_mul(size.y as usize)
            .and_then(|count| count.checked_mul(size.z as usize))
            .ok_or(VoxelError::TooLarge(size))?;
        Ok(Self {
            size,
            cells: vec![0; count],
        })
    }

    /// Deterministic test scene: rolling ground, a sphere and a ring of pillars
    pub fn generate(size: UVec3) -> Result<Self, VoxelError> {
        let mut volume = Self::empty(size)?;
        let extent = size.as_vec3();
        let center = Vec3::new(extent.x * 0.5, extent.y * 0.45, extent.z * 0.5);
        let radius = extent.x.min(extent.z) * 0.18;

        for z in 0..size.z {
            for x in 0..size.x {
                let (fx, fz) = (x as f32, z as f32);
                let ground = (extent.y * 0.12
                    + (fx * 0.21).sin() * 2.0
                    + (fz * 0.17).cos() * 2.0)
                    .max(1.0) as u32;
                for y in 0..ground.min(size.y) {
                    let shade = 90 + ((y * 97 / ground.max(1)) as u8 / 2);
                    volume.set(UVec3::new(x, y, z), pack_color(60, shade, 50));
                }
            }
        }

        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let p = Vec3::new(x as f32, y as f32, z as f32) + 0.5;
                    if p.distance(center) <= radius {
                        let r = (200.0 * (p.y / extent.y)).min(255.0) as u8 + 40;
                        volume.set(UVec3::new(x, y, z), pack_color(r, 80, 160));
                    }
                }
            }
        }

        let pillars = 8;
        let ring = extent.x.min(extent.z) * 0.38;
        for i in 0..pillars {
            let angle = i as f32 / pillars as f32 * std::f32::consts::TAU;
            let px = (center.x + angle.cos() * ring) as u32;
            let pz = (center.z + angle.sin() * ring) as u32;
            let top = (extent.y * 0.6) as u32;
            for y in 0..top.min(size.y) {
                for (dx, dz) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let at = UVec3::new(px + dx, y, pz + dz);
                    if at.cmplt(size).all() {
                        volume.set(at, pack_color(180, 170, 150));
                    }
                }
            }
        }

        Ok(volume)
    }

    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    fn index(&self, at: UVec3) -> usize {
        let (x, y, z) = (at.x as usize, at.y as usize, at.z as usize);
        x + self.size.x as usize * (y + self.size.y as usize * z)
    }

    pub fn get(&self, at: UVec3) -> Option<u32> {
        at.cmplt(self.size)
            .all()
            .then(|| self.cells[self.index(at)])
    }

    pub fn set(&mut self, at: UVec3, cell: u32) {
        if at.cmplt(self.size).all() {
            let index = self.index(at);
            self.cells[index] = cell;
        }
    }

    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|cell| **cell != 0).count()
    }

    /// Header plus cells, as uploaded to the device
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = [self.size.x, self.size.y, self.size.z, 0];
        let mut bytes = Vec::with_capacity(self.byte_size() as usize);
        bytes.extend_from_slice(bytemuck::cast_slice(&header));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.cells));
        bytes
    }

    pub fn byte_size(&self) -> u64 {
        (16 + self.cells.len() * 4) as u64
    }
}
