// Writer side of the vmap files: map trees, tiles, models and the
// game object registry

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;

use byteorder::WriteBytesExt;

use crate::bih::Bih;
use crate::coordinates::{pack_tile_id, unpack_tile_id};
use crate::error::VmapError;
use crate::game_object_model::GameObjectModelData;
use crate::io::{create_file, write_aabox, write_magic, write_name, write_u32};
use crate::map_tree::{map_file_name, tile_file_name};
use crate::model::WorldModel;
use crate::model_instance::ModelSpawn;
use crate::types::ModelFlags;

/// Spawns of one map, grouped by the tiles they touch.
#[derive(Debug, Default, Clone)]
pub struct MapSpawns {
    unique_entries: BTreeMap<u32, ModelSpawn>,
    tile_entries: Vec<(u32, u32)>,
    global_entries: BTreeSet<u32>,
}

impl MapSpawns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `spawn` to tile (x, y). A spawn crossing several tiles is added
    /// once per tile with the same id.
    pub fn add_tile_spawn(&mut self, tile_x: u32, tile_y: u32, spawn: ModelSpawn) {
        let spawn_id = spawn.id;
        self.unique_entries.entry(spawn_id).or_insert(spawn);
        self.tile_entries.push((pack_tile_id(tile_x, tile_y), spawn_id));
    }

    /// Adds a spawn that is loaded with the map rather than with a tile.
    pub fn add_global_spawn(&mut self, mut spawn: ModelSpawn) {
        spawn.flags |= ModelFlags::WORLD_SPAWN;
        let spawn_id = spawn.id;
        self.unique_entries.entry(spawn_id).or_insert(spawn);
        self.global_entries.insert(spawn_id);
    }

    pub fn spawns(&self) -> impl Iterator<Item = &ModelSpawn> {
        self.unique_entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.unique_entries.is_empty()
    }

    /// Fills in missing spawn bounds from the models in `models_dir`.
    /// Spawns whose model cannot be read are dropped.
    pub fn compute_bounds(&mut self, models_dir: &Path) {
        let mut missing = Vec::new();
        for (spawn_id, spawn) in self.unique_entries.iter_mut() {
            if spawn.bound.is_some() {
                continue;
            }
            let path = models_dir.join(format!("{}.vmo", spawn.name));
            let bound = WorldModel::read_file(&path)
                .map_err(|e| e.to_string())
                .and_then(|model| {
                    spawn
                        .compute_bound(&model)
                        .ok_or_else(|| "model has no groups".to_string())
                });
            if let Err(e) = bound {
                tracing::warn!("Failed to calculate bounds for spawn {} ({}): {}", spawn_id, spawn.name, e);
                missing.push(*spawn_id);
            }
        }

        for spawn_id in missing {
            self.unique_entries.remove(&spawn_id);
            self.global_entries.remove(&spawn_id);
            self.tile_entries.retain(|(_, id)| *id != spawn_id);
        }
    }
}

/// Writes `<dir>/<name>.vmo`.
pub fn write_model_file(dir: &Path, name: &str, model: &WorldModel) -> Result<(), VmapError> {
    model.write_file(&dir.join(format!("{}.vmo", name)))
}

/// Writes the `.vmtree` of `map_id` and one `.vmtile` per tile with
/// spawns. Every spawn needs a bound.
pub fn write_map_files(output_dir: &Path, map_id: u32, spawns: &MapSpawns) -> Result<(), VmapError> {
    let mut prim_bounds = Vec::with_capacity(spawns.unique_entries.len());
    let mut node_index = HashMap::new();
    for (idx, spawn) in spawns.unique_entries.values().enumerate() {
        let Some(bound) = spawn.bound else {
            return Err(VmapError::format(format!("spawn {} ({}) has no bounds", spawn.id, spawn.name)));
        };
        prim_bounds.push(bound);
        node_index.insert(spawn.id, idx as u32);
    }
    let bih = Bih::build(&prim_bounds, 3);

    // world spawns are loaded with the tree, never with a tile
    let mut tiles: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for (tile_id, spawn_id) in &spawns.tile_entries {
        let is_world_spawn = spawns
            .unique_entries
            .get(spawn_id)
            .is_none_or(|s| s.flags.contains(ModelFlags::WORLD_SPAWN));
        if !is_world_spawn {
            tiles.entry(*tile_id).or_default().insert(*spawn_id);
        }
    }

    let mut out = create_file(&output_dir.join(map_file_name(map_id)))?;
    write_magic(&mut out)?;
    out.write_all(b"NODE")?;
    bih.write_to(&mut out)?;
    out.write_all(b"TIDX")?;
    write_u32(&mut out, tiles.len() as u32)?;
    for tile_id in tiles.keys() {
        write_u32(&mut out, *tile_id)?;
    }
    out.write_all(b"GOBJ")?;
    write_u32(&mut out, spawns.global_entries.len() as u32)?;
    for spawn_id in &spawns.global_entries {
        write_spawn_entry(&mut out, spawns, &node_index, *spawn_id)?;
    }
    out.flush()?;

    for (tile_id, spawn_ids) in &tiles {
        let (tile_x, tile_y) = unpack_tile_id(*tile_id);
        let mut tile_out = create_file(&output_dir.join(tile_file_name(map_id, tile_x, tile_y)))?;
        write_magic(&mut tile_out)?;
        write_u32(&mut tile_out, spawn_ids.len() as u32)?;
        for spawn_id in spawn_ids {
            write_spawn_entry(&mut tile_out, spawns, &node_index, *spawn_id)?;
        }
        tile_out.flush()?;
    }

    tracing::debug!("Wrote map {} with {} spawns in {} tiles", map_id, prim_bounds.len(), tiles.len());
    Ok(())
}

fn write_spawn_entry<W: Write>(
    writer: &mut W,
    spawns: &MapSpawns,
    node_index: &HashMap<u32, u32>,
    spawn_id: u32,
) -> Result<(), VmapError> {
    let (Some(spawn), Some(node)) = (spawns.unique_entries.get(&spawn_id), node_index.get(&spawn_id)) else {
        return Err(VmapError::format(format!("missing spawn {}", spawn_id)));
    };
    spawn.write_to(writer)?;
    write_u32(writer, *node)
}

/// Writes `GameObjectModels.dtree` from (display id, model) records.
pub fn write_gameobject_models(path: &Path, records: &[(u32, GameObjectModelData)]) -> Result<(), VmapError> {
    let mut out = create_file(path)?;
    write_magic(&mut out)?;
    for (display_id, data) in records {
        write_u32(&mut out, *display_id)?;
        out.write_u8(u8::from(data.is_wmo))?;
        write_name(&mut out, &data.name)?;
        write_aabox(&mut out, &data.bound)?;
    }
    out.flush()?;
    Ok(())
}
