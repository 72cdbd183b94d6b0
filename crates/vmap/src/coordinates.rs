// Conversion between world coordinates and the internal vmap convention

use glam::Vec3;

/// Edge length of one map tile.
pub const TILE_SIZE: f32 = 533.333_33;

/// Tiles per map axis.
pub const MAX_NUMBER_OF_GRIDS: u32 = 64;

/// Offset between world and internal X/Y.
pub const MID: f32 = 0.5 * MAX_NUMBER_OF_GRIDS as f32 * TILE_SIZE;

/// World -> internal. The mapping mirrors X/Y around `MID`, so applying it
/// twice yields the input again; Z is untouched.
pub fn convert_position_to_internal_rep(x: f32, y: f32, z: f32) -> Vec3 {
    Vec3::new(MID - x, MID - y, z)
}

/// Internal -> world. Same mapping as the forward direction.
pub fn convert_position_to_world(pos: Vec3) -> Vec3 {
    convert_position_to_internal_rep(pos.x, pos.y, pos.z)
}

/// Grid cell of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(x: u32, y: u32) -> Option<Self> {
        if x < MAX_NUMBER_OF_GRIDS && y < MAX_NUMBER_OF_GRIDS {
            Some(Self { x, y })
        } else {
            None
        }
    }

    /// Tile containing the given world position.
    pub fn from_world(x: f32, y: f32) -> Option<Self> {
        let internal = convert_position_to_internal_rep(x, y, 0.0);
        Self::from_internal(internal)
    }

    pub fn from_internal(pos: Vec3) -> Option<Self> {
        let tx = (pos.x / TILE_SIZE).floor();
        let ty = (pos.y / TILE_SIZE).floor();
        if !tx.is_finite() || !ty.is_finite() || tx < 0.0 || ty < 0.0 {
            return None;
        }
        Self::new(tx as u32, ty as u32)
    }

    pub fn packed(self) -> u32 {
        pack_tile_id(self.x, self.y)
    }
}

pub fn pack_tile_id(tile_x: u32, tile_y: u32) -> u32 {
    (tile_x << 16) | tile_y
}

pub fn unpack_tile_id(tile_id: u32) -> (u32, u32) {
    (tile_id >> 16, tile_id & 0xFFFF)
}
