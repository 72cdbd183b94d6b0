// Synthetic vmap data sets shared by the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use mangos_vmap::assembler::{write_map_files, write_model_file, MapSpawns};
use mangos_vmap::coordinates::convert_position_to_internal_rep;
use mangos_vmap::geometry::{AaBox, MeshTriangle};
use mangos_vmap::model::{GroupModel, WmoLiquid};
use mangos_vmap::model_instance::ModelSpawn;
use mangos_vmap::{ModelFlags, TileCoord, VMapConfig, VMapManager, Vec3, WorldModel};
use tempfile::TempDir;

pub const MAP_ID: u32 = 0;
pub const FLOOR_MODEL: &str = "floor.wmo";
pub const WATER_MODEL: &str = "pool.wmo";
pub const WALL_MODEL: &str = "wall.wmo";

pub const FLOOR_ROOT_ID: i32 = 1234;
pub const FLOOR_GROUP_ID: i32 = 77;
pub const FLOOR_MOGP_FLAGS: u32 = 0x8;
pub const FLOOR_ADT_ID: u16 = 5;
pub const WATER_LIQUID_TYPE: u32 = 2;

/// Floor spawn at z = 100 around world (100, 200).
pub const FLOOR_POS: Vec3 = Vec3::new(100.0, 200.0, 100.0);
/// Wall across the x axis at world x = 150.
pub const WALL_POS: Vec3 = Vec3::new(150.0, 200.0, 100.0);
/// Pool with a liquid surface 5 units above its floor at z = 50.
pub const POOL_POS: Vec3 = Vec3::new(300.0, 200.0, 50.0);

/// 40x40 horizontal square centered on the origin, bound reaching 30 up.
pub fn floor_model(liquid: Option<WmoLiquid>) -> WorldModel {
    let vertices = vec![
        Vec3::new(-20.0, -20.0, 0.0),
        Vec3::new(20.0, -20.0, 0.0),
        Vec3::new(20.0, 20.0, 0.0),
        Vec3::new(-20.0, 20.0, 0.0),
    ];
    let triangles = vec![MeshTriangle::new(0, 1, 2), MeshTriangle::new(0, 2, 3)];
    let bound = AaBox::new(Vec3::new(-20.0, -20.0, -1.0), Vec3::new(20.0, 20.0, 30.0));
    let group = GroupModel::new(
        FLOOR_MOGP_FLAGS,
        FLOOR_GROUP_ID as u32,
        bound,
        vertices,
        triangles,
        liquid,
    );
    WorldModel::new(FLOOR_ROOT_ID as u32, ModelFlags::empty(), vec![group])
}

/// Vertical quad in the local x = 0 plane, 40 wide and 20 high.
pub fn wall_model() -> WorldModel {
    let vertices = vec![
        Vec3::new(0.0, -20.0, 0.0),
        Vec3::new(0.0, 20.0, 0.0),
        Vec3::new(0.0, 20.0, 20.0),
        Vec3::new(0.0, -20.0, 20.0),
    ];
    let triangles = vec![MeshTriangle::new(0, 1, 2), MeshTriangle::new(0, 2, 3)];
    let bound = AaBox::new(Vec3::new(-1.0, -20.0, 0.0), Vec3::new(1.0, 20.0, 20.0));
    let group = GroupModel::new(0, 1, bound, vertices, triangles, None);
    WorldModel::new(99, ModelFlags::empty(), vec![group])
}

pub fn internal(world: Vec3) -> Vec3 {
    convert_position_to_internal_rep(world.x, world.y, world.z)
}

pub fn tile_of(world: Vec3) -> TileCoord {
    TileCoord::from_world(world.x, world.y).expect("position inside the map grid")
}

pub fn spawn_at(id: u32, name: &str, world: Vec3) -> ModelSpawn {
    let mut spawn = ModelSpawn::new(id, name, internal(world), Vec3::ZERO, 1.0);
    spawn.adt_id = FLOOR_ADT_ID;
    spawn
}

pub struct TestData {
    pub dir: TempDir,
}

impl TestData {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(dir.path().join("vmaps")).expect("vmaps dir");
        let data = Self { dir };
        write_model_file(&data.vmaps_dir(), FLOOR_MODEL, &floor_model(None)).expect("floor model");
        write_model_file(
            &data.vmaps_dir(),
            WATER_MODEL,
            &floor_model(Some(WmoLiquid::flat(WATER_LIQUID_TYPE, 5.0))),
        )
        .expect("pool model");
        write_model_file(&data.vmaps_dir(), WALL_MODEL, &wall_model()).expect("wall model");
        data
    }

    pub fn vmaps_dir(&self) -> PathBuf {
        self.dir.path().join("vmaps")
    }

    pub fn config(&self) -> VMapConfig {
        VMapConfig::new(self.dir.path())
    }

    pub fn manager(&self) -> VMapManager {
        VMapManager::new(&self.config())
    }

    pub fn write_map(&self, map_id: u32, mut spawns: MapSpawns) {
        spawns.compute_bounds(&self.vmaps_dir());
        write_map_files(&self.vmaps_dir(), map_id, &spawns).expect("map files");
    }

    /// Floor, wall and pool, all on the tile of `FLOOR_POS`.
    pub fn with_standard_map(self) -> Self {
        let tile = tile_of(FLOOR_POS);
        let mut spawns = MapSpawns::new();
        spawns.add_tile_spawn(tile.x, tile.y, spawn_at(1, FLOOR_MODEL, FLOOR_POS));
        spawns.add_tile_spawn(tile.x, tile.y, spawn_at(2, WALL_MODEL, WALL_POS));
        spawns.add_tile_spawn(tile.x, tile.y, spawn_at(3, WATER_MODEL, POOL_POS));
        self.write_map(MAP_ID, spawns);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
