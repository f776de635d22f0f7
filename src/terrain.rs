//! Terrain collaborator interface - ground height, surface type and water.
//!
//! The terrain itself is external; the core only consumes a query handle
//! injected at construction. `GridTerrain` is a ready-made heightfield
//! implementation for hosts and tests; `FlatTerrain` is the trivial case.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ground query handle. Implementations must be cheap to call: these run per
/// contacting node per sub-step.
pub trait Terrain: Send + Sync {
    /// Terrain height (Y) at a world X/Z position.
    fn height_at(&self, x: f32, z: f32) -> f32;

    /// Surface normal at a world X/Z position. The default central-difference
    /// estimate is adequate for smooth heightfields.
    fn normal_at(&self, x: f32, z: f32) -> Vec3 {
        let e = 0.1;
        let hx0 = self.height_at(x - e, z);
        let hx1 = self.height_at(x + e, z);
        let hz0 = self.height_at(x, z - e);
        let hz1 = self.height_at(x, z + e);
        Vec3::new(hx0 - hx1, 2.0 * e, hz0 - hz1).normalize_or_zero()
    }

    /// Ground-model name at a world X/Z position (traction map lookup).
    /// `None` means "use the registry default".
    fn ground_model_at(&self, x: f32, z: f32) -> Option<&str>;

    /// Water surface height at a world X/Z position, if there is water.
    fn water_level(&self, x: f32, z: f32) -> Option<f32>;
}

/// Resource wrapper handing the injected terrain to ECS systems.
#[derive(Resource, Clone)]
pub struct TerrainResource(pub Arc<dyn Terrain>);

/// Infinite flat ground at a fixed height. Mostly for tests and demos.
#[derive(Debug, Clone)]
pub struct FlatTerrain {
    pub height: f32,
    pub surface: String,
    pub water: Option<f32>,
}

impl FlatTerrain {
    pub fn new(height: f32) -> Self {
        Self {
            height,
            surface: "default".to_string(),
            water: None,
        }
    }

    pub fn with_surface(mut self, surface: &str) -> Self {
        self.surface = surface.to_string();
        self
    }

    pub fn with_water(mut self, level: f32) -> Self {
        self.water = Some(level);
        self
    }
}

impl Terrain for FlatTerrain {
    fn height_at(&self, _x: f32, _z: f32) -> f32 {
        self.height
    }

    fn normal_at(&self, _x: f32, _z: f32) -> Vec3 {
        Vec3::Y
    }

    fn ground_model_at(&self, _x: f32, _z: f32) -> Option<&str> {
        Some(&self.surface)
    }

    fn water_level(&self, _x: f32, _z: f32) -> Option<f32> {
        self.water
    }
}

/// Grid-based heightfield with bilinear interpolation and a per-cell
/// surface index into a host-provided name table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTerrain {
    /// Width of the grid in cells.
    pub width: usize,
    /// Depth of the grid in cells.
    pub depth: usize,
    /// Size of each cell in world units.
    pub cell_size: f32,
    /// World position of cell (0, 0).
    pub origin_x: f32,
    pub origin_z: f32,
    /// Heights at cell corners, row-major, `(width + 1) * (depth + 1)`.
    pub heights: Vec<f32>,
    /// Surface index per cell, row-major.
    pub surfaces: Vec<u8>,
    /// Ground-model name per surface index.
    pub surface_names: Vec<String>,
    /// Uniform water level, if any.
    pub water: Option<f32>,
}

impl GridTerrain {
    /// Create a flat grid centred on the world origin.
    pub fn new(width: usize, depth: usize, cell_size: f32) -> Self {
        Self {
            width,
            depth,
            cell_size,
            origin_x: -(width as f32 * cell_size) / 2.0,
            origin_z: -(depth as f32 * cell_size) / 2.0,
            heights: vec![0.0; (width + 1) * (depth + 1)],
            surfaces: vec![0; width * depth],
            surface_names: vec!["default".to_string()],
            water: None,
        }
    }

    fn corner(&self, gx: usize, gz: usize) -> f32 {
        let gx = gx.min(self.width);
        let gz = gz.min(self.depth);
        self.heights[gz * (self.width + 1) + gx]
    }

    pub fn set_corner(&mut self, gx: usize, gz: usize, height: f32) {
        if gx <= self.width && gz <= self.depth {
            self.heights[gz * (self.width + 1) + gx] = height;
        }
    }

    pub fn set_surface(&mut self, gx: usize, gz: usize, surface: u8) {
        if gx < self.width && gz < self.depth {
            self.surfaces[gz * self.width + gx] = surface;
        }
    }

    fn cell_of(&self, x: f32, z: f32) -> (usize, usize, f32, f32) {
        let fx = ((x - self.origin_x) / self.cell_size).clamp(0.0, self.width as f32 - 1e-4);
        let fz = ((z - self.origin_z) / self.cell_size).clamp(0.0, self.depth as f32 - 1e-4);
        let gx = fx.floor() as usize;
        let gz = fz.floor() as usize;
        (gx, gz, fx - gx as f32, fz - gz as f32)
    }
}

impl Terrain for GridTerrain {
    fn height_at(&self, x: f32, z: f32) -> f32 {
        let (gx, gz, tx, tz) = self.cell_of(x, z);
        let h00 = self.corner(gx, gz);
        let h10 = self.corner(gx + 1, gz);
        let h01 = self.corner(gx, gz + 1);
        let h11 = self.corner(gx + 1, gz + 1);
        let a = h00 + (h10 - h00) * tx;
        let b = h01 + (h11 - h01) * tx;
        a + (b - a) * tz
    }

    fn ground_model_at(&self, x: f32, z: f32) -> Option<&str> {
        let (gx, gz, _, _) = self.cell_of(x, z);
        let idx = self.surfaces[gz * self.width + gx] as usize;
        self.surface_names.get(idx).map(|s| s.as_str())
    }

    fn water_level(&self, _x: f32, _z: f32) -> Option<f32> {
        self.water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_terrain() {
        let terrain = FlatTerrain::new(5.0);
        assert_eq!(terrain.height_at(100.0, -30.0), 5.0);
        assert_eq!(terrain.normal_at(0.0, 0.0), Vec3::Y);
    }

    #[test]
    fn test_grid_interpolation() {
        let mut grid = GridTerrain::new(4, 4, 1.0);
        // Raise one corner and probe between it and a flat neighbour.
        grid.set_corner(2, 2, 2.0);
        let (cx, cz) = (grid.origin_x + 2.0, grid.origin_z + 2.0);
        assert!((grid.height_at(cx, cz) - 2.0).abs() < 1e-5);
        let mid = grid.height_at(cx + 0.5, cz);
        assert!(mid > 0.0 && mid < 2.0);
    }

    #[test]
    fn test_grid_normal_tilts_uphill() {
        let mut grid = GridTerrain::new(8, 8, 1.0);
        for gz in 0..=8 {
            for gx in 0..=8 {
                grid.set_corner(gx, gz, gx as f32 * 0.5);
            }
        }
        let n = grid.normal_at(0.0, 0.0);
        assert!(n.x < 0.0, "normal should lean against the slope");
        assert!(n.y > 0.0);
    }

    #[test]
    fn test_surface_lookup() {
        let mut grid = GridTerrain::new(2, 2, 1.0);
        grid.surface_names.push("mud".to_string());
        grid.set_surface(0, 0, 1);
        let x = grid.origin_x + 0.5;
        let z = grid.origin_z + 0.5;
        assert_eq!(grid.ground_model_at(x, z), Some("mud"));
    }
}
