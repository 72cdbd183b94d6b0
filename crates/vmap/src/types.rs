// Shared constants, flag sets and query result types

use bitflags::bitflags;

/// Magic header carried by every vmap file.
pub const VMAP_MAGIC: &[u8; 8] = b"VMAP_4.B";

/// Registry of collision bounds for spawnable objects.
pub const GAMEOBJECT_MODELS: &str = "GameObjectModels.dtree";

/// Ground height reported when nothing was found below a point.
pub const VMAP_INVALID_HEIGHT: f32 = -100000.0;

/// Value returned by height queries that have no answer.
pub const VMAP_INVALID_HEIGHT_VALUE: f32 = -200000.0;

bitflags! {
    /// Per-spawn / per-model flags stored in the map files.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModelFlags: u32 {
        const M2 = 1;
        const WORLD_SPAWN = 1 << 1;
        const HAS_BOUND = 1 << 2;
    }
}

bitflags! {
    /// Geometry categories a ray cast may skip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModelIgnoreFlags: u32 {
        const M2 = 1;
    }
}

bitflags! {
    /// Features that can be switched off per map.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DisableFlags: u32 {
        const AREA_FLAG = 0x1;
        const HEIGHT = 0x2;
        const LOS = 0x4;
        const LIQUID_STATUS = 0x8;
    }
}

/// Result of a spatial query, keeping "switched off" apart from "no data".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryResult<T> {
    /// The feature is turned off globally or for this map.
    Disabled,
    /// No map tree is loaded for the map.
    NotLoaded,
    /// Geometry was searched but nothing qualified.
    NotFound,
    Found(T),
}

impl<T> QueryResult<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, QueryResult::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            QueryResult::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryResult<U> {
        match self {
            QueryResult::Disabled => QueryResult::Disabled,
            QueryResult::NotLoaded => QueryResult::NotLoaded,
            QueryResult::NotFound => QueryResult::NotFound,
            QueryResult::Found(value) => QueryResult::Found(f(value)),
        }
    }
}

impl<T> From<Option<T>> for QueryResult<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => QueryResult::Found(value),
            None => QueryResult::NotFound,
        }
    }
}

/// Answer of a line of sight check against loaded geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Clear,
    Blocked,
}

/// WMO identification of the structure a point is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AreaInfo {
    pub adt_id: i32,
    pub root_id: i32,
    pub group_id: i32,
    pub mogp_flags: u32,
}

/// Area info together with the floor it was found on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaHit {
    pub floor_z: f32,
    pub info: AreaInfo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidInfo {
    pub liquid_type: u32,
    pub level: f32,
}

/// Liquid surface above the floor a point stands on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidHit {
    pub level: f32,
    pub floor_z: f32,
    pub liquid_type: u32,
    pub mogp_flags: u32,
}

/// Combined floor, area and liquid lookup produced by a single walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaAndLiquidData {
    pub floor_z: f32,
    pub area_info: Option<AreaInfo>,
    pub liquid_info: Option<LiquidInfo>,
}

impl Default for AreaAndLiquidData {
    fn default() -> Self {
        Self {
            floor_z: VMAP_INVALID_HEIGHT,
            area_info: None,
            liquid_info: None,
        }
    }
}

/// Owned summary of the nearest ground hit below a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationInfo {
    pub ground_z: f32,
    pub root_id: i32,
    pub adt_id: i32,
    pub group_id: i32,
    pub mogp_flags: u32,
    pub liquid_type: u32,
    /// Liquid surface of the hit group at the query point, if any.
    pub liquid_level: Option<f32>,
}

impl LocationInfo {
    pub fn area_info(&self) -> AreaInfo {
        AreaInfo {
            adt_id: self.adt_id,
            root_id: self.root_id,
            group_id: self.group_id,
            mogp_flags: self.mogp_flags,
        }
    }
}
