// StaticMapTree - per map spatial index of spawned models

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;

use crate::bih::Bih;
use crate::coordinates::{pack_tile_id, unpack_tile_id};
use crate::error::{LoadResult, VmapError};
use crate::geometry::Ray;
use crate::io::{open_file, read_chunk, read_magic, read_u32};
use crate::model::WorldModel;
use crate::model_cache::ModelCache;
use crate::model_instance::{ModelInstance, ModelSpawn};
use crate::types::{AreaHit, LocationInfo, ModelIgnoreFlags};

const MAX_SPAWN_RECORDS: u32 = 1 << 20;

pub fn map_file_name(map_id: u32) -> String {
    format!("{:04}.vmtree", map_id)
}

pub fn tile_file_name(map_id: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{:04}_{:02}_{:02}.vmtile", map_id, tile_x, tile_y)
}

/// Decoded contents of a `.vmtree` file.
pub(crate) struct TreeFile {
    pub tree: Bih,
    pub tile_ids: Vec<u32>,
    pub globals: Vec<(ModelSpawn, u32)>,
}

impl TreeFile {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        read_magic(reader)?;
        read_chunk(reader, b"NODE")?;
        let tree = Bih::read_from(reader)?;

        read_chunk(reader, b"TIDX")?;
        let count = read_u32(reader)?;
        if count > MAX_SPAWN_RECORDS {
            return Err(VmapError::format(format!("too many tiles: {}", count)));
        }
        let mut tile_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tile_ids.push(read_u32(reader)?);
        }

        read_chunk(reader, b"GOBJ")?;
        let globals = read_spawn_list(reader)?;

        Ok(Self {
            tree,
            tile_ids,
            globals,
        })
    }
}

/// Reads `u32 n` followed by n (spawn, referenced node) records.
pub(crate) fn read_spawn_list<R: Read>(reader: &mut R) -> Result<Vec<(ModelSpawn, u32)>, VmapError> {
    let count = read_u32(reader)?;
    if count > MAX_SPAWN_RECORDS {
        return Err(VmapError::format(format!("too many spawns: {}", count)));
    }
    let mut spawns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let spawn = ModelSpawn::read_from(reader)?;
        let node = read_u32(reader)?;
        spawns.push((spawn, node));
    }
    Ok(spawns)
}

/// Opens the first existing file produced by `name` for `map_chain`
/// (the map itself followed by its ancestors).
fn open_with_fallback(
    base_path: &Path,
    map_chain: &[u32],
    name: impl Fn(u32) -> String,
) -> Result<(BufReader<File>, u32), VmapError> {
    for &map_id in map_chain {
        match open_file(&base_path.join(name(map_id))) {
            Ok(reader) => return Ok((reader, map_id)),
            Err(VmapError::FileNotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    let own = map_chain.first().copied().unwrap_or_default();
    Err(VmapError::FileNotFound(base_path.join(name(own))))
}

/// Dry run of a tile load: checks the tree and tile headers without
/// touching any loaded state.
pub fn can_load_map(base_path: &Path, map_chain: &[u32], tile_x: u32, tile_y: u32) -> LoadResult {
    let tree_file = open_with_fallback(base_path, map_chain, map_file_name)
        .and_then(|(mut reader, _)| TreeFile::read_from(&mut reader));
    let tree_file = match tree_file {
        Ok(tree_file) => tree_file,
        Err(e) => return e.load_result(),
    };
    if tree_file.tile_ids.is_empty() {
        return LoadResult::Success;
    }

    match open_with_fallback(base_path, map_chain, |map_id| tile_file_name(map_id, tile_x, tile_y)) {
        Ok((mut reader, _)) => match read_magic(&mut reader) {
            Ok(()) => LoadResult::Success,
            Err(e) => e.load_result(),
        },
        Err(e) => e.load_result(),
    }
}

/// A model acquired from the cache on behalf of a tile or of the map.
#[derive(Clone, Debug)]
struct SpawnReference {
    name: String,
    referenced_node: u32,
}

#[derive(Debug, Default)]
struct LoadedTile {
    has_file: bool,
    spawns: Vec<SpawnReference>,
}

#[derive(Default)]
struct TreeState {
    tree_values: Vec<Option<ModelInstance>>,
    /// Node index -> number of tiles (or the map) referencing it.
    loaded_spawns: HashMap<u32, u32>,
    loaded_tiles: HashMap<u32, LoadedTile>,
    global_spawns: Vec<SpawnReference>,
}

impl TreeState {
    /// Registers `spawn` at `node`, returning false when the node index is
    /// outside the tree.
    fn add_spawn(&mut self, spawn: ModelSpawn, model: Arc<WorldModel>, node: u32) -> bool {
        let Some(slot) = self.tree_values.get_mut(node as usize) else {
            return false;
        };
        let count = self.loaded_spawns.entry(node).or_insert(0);
        if *count == 0 {
            *slot = Some(ModelInstance::new(spawn, model));
        }
        *count += 1;
        true
    }

    fn remove_spawn(&mut self, node: u32) {
        let Some(count) = self.loaded_spawns.get_mut(&node) else {
            tracing::error!("StaticMapTree: trying to unload non-referenced model node {}", node);
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.loaded_spawns.remove(&node);
            if let Some(slot) = self.tree_values.get_mut(node as usize) {
                *slot = None;
            }
        }
    }
}

/// Collision data of one map: the spawn BIH from the `.vmtree` file plus the
/// models of every loaded tile.
pub struct StaticMapTree {
    map_id: u32,
    base_path: PathBuf,
    map_chain: Vec<u32>,
    tree: Bih,
    is_tiled: bool,
    state: RwLock<TreeState>,
}

impl StaticMapTree {
    /// Reads the tree file of `map_chain[0]` (or its nearest ancestor that
    /// has one) and acquires the map wide spawns.
    pub fn init_map(base_path: &Path, map_chain: &[u32], cache: &ModelCache) -> Result<Self, LoadResult> {
        let map_id = map_chain.first().copied().unwrap_or_default();
        let (tree_file, used_map) = open_with_fallback(base_path, map_chain, map_file_name)
            .and_then(|(mut reader, used_map)| Ok((TreeFile::read_from(&mut reader)?, used_map)))
            .map_err(|e| {
                tracing::error!("StaticMapTree::init_map: map {} could not be loaded: {}", map_id, e);
                e.load_result()
            })?;

        let mut state = TreeState {
            tree_values: vec![None; tree_file.tree.prim_count()],
            ..TreeState::default()
        };
        for (spawn, node) in tree_file.globals {
            let name = spawn.name.clone();
            let Some(model) = cache.acquire_model_instance(&name, spawn.flags) else {
                tracing::error!("StaticMapTree::init_map: could not acquire WorldModel for '{}'", name);
                continue;
            };
            if !state.add_spawn(spawn, model, node) {
                tracing::error!("StaticMapTree::init_map: invalid tree element {} for '{}'", node, name);
                cache.release_model_instance(&name);
                continue;
            }
            state.global_spawns.push(SpawnReference {
                name,
                referenced_node: node,
            });
        }

        tracing::info!(
            "StaticMapTree: map {} initialised from {} ({} tree elements, {} global spawns)",
            map_id,
            map_file_name(used_map),
            state.tree_values.len(),
            state.global_spawns.len()
        );

        Ok(Self {
            map_id,
            base_path: base_path.to_path_buf(),
            map_chain: map_chain.to_vec(),
            tree: tree_file.tree,
            is_tiled: !tree_file.tile_ids.is_empty(),
            state: RwLock::new(state),
        })
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn is_tiled(&self) -> bool {
        self.is_tiled
    }

    pub fn num_loaded_tiles(&self) -> usize {
        self.state.read().loaded_tiles.len()
    }

    pub fn has_loaded_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        self.state.read().loaded_tiles.contains_key(&pack_tile_id(tile_x, tile_y))
    }

    pub fn load_map_tile(&self, tile_x: u32, tile_y: u32, cache: &ModelCache) -> LoadResult {
        let tile_id = pack_tile_id(tile_x, tile_y);
        let mut state = self.state.write();
        if state.loaded_tiles.contains_key(&tile_id) {
            return LoadResult::Success;
        }

        if !self.is_tiled {
            // untiled maps only carry global spawns, track the tile for unloading
            state.loaded_tiles.insert(tile_id, LoadedTile::default());
            return LoadResult::Success;
        }

        let (mut reader, used_map) = match open_with_fallback(&self.base_path, &self.map_chain, |map_id| {
            tile_file_name(map_id, tile_x, tile_y)
        }) {
            Ok(found) => found,
            Err(VmapError::FileNotFound(_)) => {
                state.loaded_tiles.insert(tile_id, LoadedTile::default());
                return LoadResult::FileNotFound;
            }
            Err(e) => {
                tracing::error!(
                    "StaticMapTree::load_map_tile: cannot open tile {},{} of map {}: {}",
                    tile_x,
                    tile_y,
                    self.map_id,
                    e
                );
                return e.load_result();
            }
        };

        let spawns = match read_magic(&mut reader).and_then(|_| read_spawn_list(&mut reader)) {
            Ok(spawns) => spawns,
            Err(e) => {
                tracing::error!(
                    "StaticMapTree::load_map_tile: corrupt tile file {}: {}",
                    tile_file_name(used_map, tile_x, tile_y),
                    e
                );
                return match e.load_result() {
                    LoadResult::VersionMismatch => LoadResult::VersionMismatch,
                    _ => LoadResult::ReadFromFileFailed,
                };
            }
        };

        let mut tile = LoadedTile {
            has_file: true,
            spawns: Vec::with_capacity(spawns.len()),
        };
        for (spawn, node) in spawns {
            let name = spawn.name.clone();
            let Some(model) = cache.acquire_model_instance(&name, spawn.flags) else {
                tracing::error!(
                    "StaticMapTree::load_map_tile: could not acquire WorldModel for '{}'",
                    name
                );
                continue;
            };
            if !state.add_spawn(spawn, model, node) {
                tracing::error!(
                    "StaticMapTree::load_map_tile: invalid tree element {}/{} referenced in tile {}",
                    node,
                    self.tree.prim_count(),
                    tile_file_name(used_map, tile_x, tile_y)
                );
                cache.release_model_instance(&name);
                continue;
            }
            tile.spawns.push(SpawnReference {
                name,
                referenced_node: node,
            });
        }

        tracing::debug!(
            "StaticMapTree: loaded tile {},{} of map {} with {} spawns",
            tile_x,
            tile_y,
            self.map_id,
            tile.spawns.len()
        );
        state.loaded_tiles.insert(tile_id, tile);
        LoadResult::Success
    }

    pub fn unload_map_tile(&self, tile_x: u32, tile_y: u32, cache: &ModelCache) {
        let tile_id = pack_tile_id(tile_x, tile_y);
        let mut state = self.state.write();
        let Some(tile) = state.loaded_tiles.remove(&tile_id) else {
            tracing::error!(
                "StaticMapTree::unload_map_tile: trying to unload non-loaded tile {},{} of map {}",
                tile_x,
                tile_y,
                self.map_id
            );
            return;
        };

        for spawn in &tile.spawns {
            cache.release_model_instance(&spawn.name);
            state.remove_spawn(spawn.referenced_node);
        }
        tracing::debug!(
            "StaticMapTree: unloaded tile {},{} of map {} (file: {})",
            tile_x,
            tile_y,
            self.map_id,
            tile.has_file
        );
    }

    /// Releases every tile and the global spawns.
    pub fn unload_all(&self, cache: &ModelCache) {
        let mut state = self.state.write();
        let tiles: Vec<u32> = state.loaded_tiles.keys().copied().collect();
        for tile_id in tiles {
            if let Some(tile) = state.loaded_tiles.remove(&tile_id) {
                let (x, y) = unpack_tile_id(tile_id);
                tracing::debug!("StaticMapTree: unloading tile {},{} of map {}", x, y, self.map_id);
                for spawn in &tile.spawns {
                    cache.release_model_instance(&spawn.name);
                    state.remove_spawn(spawn.referenced_node);
                }
            }
        }
        let globals = std::mem::take(&mut state.global_spawns);
        for spawn in &globals {
            cache.release_model_instance(&spawn.name);
            state.remove_spawn(spawn.referenced_node);
        }
    }

    /// Nearest hit of `ray` within `max_dist` among the loaded spawns;
    /// `max_dist` is shrunk to the hit distance.
    pub fn get_intersection_time(
        &self,
        ray: &Ray,
        max_dist: &mut f32,
        stop_at_first: bool,
        ignore_flags: ModelIgnoreFlags,
    ) -> bool {
        let state = self.state.read();
        let mut hit = false;
        self.tree.intersect_ray(
            ray,
            |ray, entry, dist, stop| {
                if let Some(Some(instance)) = state.tree_values.get(entry as usize) {
                    if instance.intersect_ray(ray, dist, stop, ignore_flags) {
                        hit = true;
                    }
                }
                hit
            },
            max_dist,
            stop_at_first,
        );
        hit
    }

    /// Positions are in internal coordinates.
    pub fn is_in_line_of_sight(&self, pos1: Vec3, pos2: Vec3, ignore_flags: ModelIgnoreFlags) -> bool {
        let mut max_dist = (pos2 - pos1).length();
        // an endpoint at infinity or NaN can never be seen
        if !max_dist.is_finite() {
            return false;
        }
        // zero length rays are always clear
        if max_dist < 1e-10 {
            return true;
        }
        let ray = Ray::new(pos1, (pos2 - pos1) / max_dist);
        !self.get_intersection_time(&ray, &mut max_dist, true, ignore_flags)
    }

    /// First hit on the way from `pos1` to `pos2`, moved by `modify_dist`
    /// along the ray. A negative distance never moves past `pos1`.
    pub fn get_object_hit_pos(&self, pos1: Vec3, pos2: Vec3, modify_dist: f32) -> Option<Vec3> {
        let max_dist = (pos2 - pos1).length();
        if !max_dist.is_finite() || max_dist < 1e-10 {
            return None;
        }
        let dir = (pos2 - pos1) / max_dist;
        let ray = Ray::new(pos1, dir);
        let mut dist = max_dist;
        if !self.get_intersection_time(&ray, &mut dist, false, ModelIgnoreFlags::empty()) {
            return None;
        }

        let hit = pos1 + dir * dist;
        if modify_dist < 0.0 && (hit - pos1).length() <= -modify_dist {
            return Some(pos1);
        }
        Some(hit + dir * modify_dist)
    }

    /// Height of the first surface below `pos` within `max_search_dist`.
    pub fn get_height(&self, pos: Vec3, max_search_dist: f32) -> Option<f32> {
        let ray = Ray::new(pos, Vec3::NEG_Z);
        let mut max_dist = max_search_dist;
        if self.get_intersection_time(&ray, &mut max_dist, false, ModelIgnoreFlags::empty()) {
            Some(pos.z - max_dist)
        } else {
            None
        }
    }

    /// Highest floor below `pos` among the spawns containing it.
    pub fn get_area_info(&self, pos: Vec3) -> Option<AreaHit> {
        let state = self.state.read();
        let mut best: Option<AreaHit> = None;
        self.tree.intersect_point(pos, |point, entry| {
            let Some(Some(instance)) = state.tree_values.get(entry as usize) else {
                return;
            };
            if let Some(hit) = instance.intersect_point(point) {
                if best.is_none_or(|current| current.floor_z < hit.floor_z) {
                    best = Some(hit);
                }
            }
        });
        best
    }

    pub fn get_location_info(&self, pos: Vec3) -> Option<LocationInfo> {
        let state = self.state.read();
        let mut best: Option<LocationInfo> = None;
        self.tree.intersect_point(pos, |point, entry| {
            let Some(Some(instance)) = state.tree_values.get(entry as usize) else {
                return;
            };
            if let Some(info) = instance.get_location_info(point) {
                if best.is_none_or(|current| current.ground_z < info.ground_z) {
                    best = Some(info);
                }
            }
        });
        best
    }
}
