// VMapManager - public entry point of the collision engine

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::{Mutex, RwLock};

use crate::config::VMapConfig;
use crate::coordinates::{convert_position_to_internal_rep, convert_position_to_world};
use crate::error::LoadResult;
use crate::map_tree::{can_load_map, StaticMapTree};
use crate::model::WorldModel;
use crate::model_cache::ModelCache;
use crate::types::{
    AreaAndLiquidData, AreaHit, DisableFlags, LiquidHit, LiquidInfo, ModelFlags,
    ModelIgnoreFlags, QueryResult, Visibility, VMAP_INVALID_HEIGHT_VALUE,
};

/// Server side collaborators consulted by the manager.
pub trait VMapHooks: Send + Sync {
    /// Whether `flags` features are switched off for `map_id`.
    fn is_vmap_disabled_for(&self, _map_id: u32, _flags: DisableFlags) -> bool {
        false
    }

    /// Liquid type -> flag bits matched against a requested liquid mask.
    fn liquid_flags(&self, liquid_type: u32) -> u32 {
        1u32.checked_shl(liquid_type).unwrap_or(0)
    }
}

/// Hooks that disable nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultVMapHooks;

impl VMapHooks for DefaultVMapHooks {}

/// Owns every loaded map tree and the shared model cache. Positions taken
/// and returned by the public queries are world coordinates.
///
/// The tree registry lock is only held to look up, insert or remove a tree.
/// File reads run under a per map lock, so loading one map never stalls
/// queries or loads on another.
pub struct VMapManager {
    base_path: PathBuf,
    enable_line_of_sight_calc: AtomicBool,
    enable_height_calc: AtomicBool,
    cache: Arc<ModelCache>,
    instance_map_trees: RwLock<HashMap<u32, Arc<StaticMapTree>>>,
    /// Serializes load/unload of a single map.
    map_load_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
    parent_map_data: RwLock<HashMap<u32, u32>>,
    hooks: Arc<dyn VMapHooks>,
}

impl VMapManager {
    pub fn new(config: &VMapConfig) -> Self {
        Self::with_hooks(config, Arc::new(DefaultVMapHooks))
    }

    pub fn with_hooks(config: &VMapConfig, hooks: Arc<dyn VMapHooks>) -> Self {
        let base_path = config.vmaps_dir();
        Self {
            cache: Arc::new(ModelCache::new(base_path.clone())),
            base_path,
            enable_line_of_sight_calc: AtomicBool::new(config.enable_line_of_sight),
            enable_height_calc: AtomicBool::new(config.enable_height),
            instance_map_trees: RwLock::new(HashMap::new()),
            map_load_locks: Mutex::new(HashMap::new()),
            parent_map_data: RwLock::new(HashMap::new()),
            hooks,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn model_cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn set_enable_line_of_sight_calc(&self, enabled: bool) {
        self.enable_line_of_sight_calc.store(enabled, Ordering::Relaxed);
    }

    pub fn set_enable_height_calc(&self, enabled: bool) {
        self.enable_height_calc.store(enabled, Ordering::Relaxed);
    }

    pub fn is_line_of_sight_calc_enabled(&self) -> bool {
        self.enable_line_of_sight_calc.load(Ordering::Relaxed)
    }

    pub fn is_height_calc_enabled(&self) -> bool {
        self.enable_height_calc.load(Ordering::Relaxed)
    }

    pub fn is_map_loading_enabled(&self) -> bool {
        self.is_line_of_sight_calc_enabled() || self.is_height_calc_enabled()
    }

    /// Records `parent` as the fallback map of every id in `children`.
    pub fn set_map_hierarchy(&self, parent: u32, children: &[u32]) {
        let mut parents = self.parent_map_data.write();
        for &child in children {
            if child != parent {
                parents.insert(child, parent);
            }
        }
    }

    pub fn get_parent_map_id(&self, map_id: u32) -> Option<u32> {
        self.parent_map_data.read().get(&map_id).copied()
    }

    /// `map_id` followed by its ancestors, nearest first.
    fn map_chain(&self, map_id: u32) -> Vec<u32> {
        let parents = self.parent_map_data.read();
        let mut chain = vec![map_id];
        let mut seen = HashSet::from([map_id]);
        let mut current = map_id;
        while let Some(&parent) = parents.get(&current) {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    fn is_disabled(&self, map_id: u32, flags: DisableFlags) -> bool {
        self.hooks.is_vmap_disabled_for(map_id, flags)
    }

    fn map_tree(&self, map_id: u32) -> Option<Arc<StaticMapTree>> {
        self.instance_map_trees.read().get(&map_id).cloned()
    }

    fn map_load_lock(&self, map_id: u32) -> Arc<Mutex<()>> {
        Arc::clone(self.map_load_locks.lock().entry(map_id).or_default())
    }

    /// Drops the tree of `map_id` once its last tile is gone. The caller
    /// holds the map's load lock, so the count cannot grow meanwhile.
    fn remove_if_empty(&self, map_id: u32, tree: &Arc<StaticMapTree>) {
        if tree.num_loaded_tiles() != 0 {
            return;
        }
        {
            let mut trees = self.instance_map_trees.write();
            if trees.get(&map_id).is_some_and(|current| Arc::ptr_eq(current, tree)) {
                trees.remove(&map_id);
            }
        }
        tree.unload_all(&self.cache);
    }

    pub fn load_map(&self, map_id: u32, x: u32, y: u32) -> LoadResult {
        if !self.is_map_loading_enabled() {
            return LoadResult::DisabledInConfig;
        }

        let load_lock = self.map_load_lock(map_id);
        let _guard = load_lock.lock();

        let tree = match self.map_tree(map_id) {
            Some(tree) => tree,
            None => {
                let chain = self.map_chain(map_id);
                match StaticMapTree::init_map(&self.base_path, &chain, &self.cache) {
                    Ok(tree) => {
                        let tree = Arc::new(tree);
                        self.instance_map_trees.write().insert(map_id, Arc::clone(&tree));
                        tree
                    }
                    Err(result) => return result,
                }
            }
        };

        let result = tree.load_map_tile(x, y, &self.cache);
        self.remove_if_empty(map_id, &tree);
        result
    }

    pub fn unload_map_tile(&self, map_id: u32, x: u32, y: u32) {
        let load_lock = self.map_load_lock(map_id);
        let _guard = load_lock.lock();

        let Some(tree) = self.map_tree(map_id) else {
            return;
        };
        tree.unload_map_tile(x, y, &self.cache);
        self.remove_if_empty(map_id, &tree);
    }

    pub fn unload_map(&self, map_id: u32) {
        let load_lock = self.map_load_lock(map_id);
        let _guard = load_lock.lock();

        let Some(tree) = self.instance_map_trees.write().remove(&map_id) else {
            return;
        };
        tree.unload_all(&self.cache);
    }

    /// Checks that the tile of `map_id` could be loaded, without loading it.
    pub fn exists_map(&self, map_id: u32, x: u32, y: u32) -> LoadResult {
        can_load_map(&self.base_path, &self.map_chain(map_id), x, y)
    }

    pub fn has_map_tree(&self, map_id: u32) -> bool {
        self.instance_map_trees.read().contains_key(&map_id)
    }

    pub fn num_loaded_tiles(&self, map_id: u32) -> usize {
        self.map_tree(map_id).map_or(0, |tree| tree.num_loaded_tiles())
    }

    pub fn acquire_model_instance(&self, filename: &str, flags: ModelFlags) -> Option<Arc<WorldModel>> {
        self.cache.acquire_model_instance(filename, flags)
    }

    pub fn release_model_instance(&self, filename: &str) {
        self.cache.release_model_instance(filename);
    }

    pub fn query_line_of_sight(
        &self,
        map_id: u32,
        from: Vec3,
        to: Vec3,
        ignore_flags: ModelIgnoreFlags,
    ) -> QueryResult<Visibility> {
        if !self.is_line_of_sight_calc_enabled() || self.is_disabled(map_id, DisableFlags::LOS) {
            return QueryResult::Disabled;
        }
        let Some(tree) = self.map_tree(map_id) else {
            return QueryResult::NotLoaded;
        };
        let pos1 = convert_position_to_internal_rep(from.x, from.y, from.z);
        let pos2 = convert_position_to_internal_rep(to.x, to.y, to.z);
        if pos1 == pos2 || tree.is_in_line_of_sight(pos1, pos2, ignore_flags) {
            QueryResult::Found(Visibility::Clear)
        } else {
            QueryResult::Found(Visibility::Blocked)
        }
    }

    /// `false` only when loaded geometry blocks the segment.
    pub fn is_in_line_of_sight(&self, map_id: u32, from: Vec3, to: Vec3, ignore_flags: ModelIgnoreFlags) -> bool {
        self.query_line_of_sight(map_id, from, to, ignore_flags) != QueryResult::Found(Visibility::Blocked)
    }

    pub fn query_object_hit_pos(&self, map_id: u32, from: Vec3, to: Vec3, modify_dist: f32) -> QueryResult<Vec3> {
        if !self.is_line_of_sight_calc_enabled() || self.is_disabled(map_id, DisableFlags::LOS) {
            return QueryResult::Disabled;
        }
        let Some(tree) = self.map_tree(map_id) else {
            return QueryResult::NotLoaded;
        };
        let pos1 = convert_position_to_internal_rep(from.x, from.y, from.z);
        let pos2 = convert_position_to_internal_rep(to.x, to.y, to.z);
        tree.get_object_hit_pos(pos1, pos2, modify_dist)
            .map(convert_position_to_world)
            .into()
    }

    /// Collision point between `from` and `to`, `None` when the way is free.
    pub fn get_object_hit_pos(&self, map_id: u32, from: Vec3, to: Vec3, modify_dist: f32) -> Option<Vec3> {
        self.query_object_hit_pos(map_id, from, to, modify_dist).found()
    }

    pub fn query_height(&self, map_id: u32, pos: Vec3, max_search_dist: f32) -> QueryResult<f32> {
        if !self.is_height_calc_enabled() || self.is_disabled(map_id, DisableFlags::HEIGHT) {
            return QueryResult::Disabled;
        }
        let Some(tree) = self.map_tree(map_id) else {
            return QueryResult::NotLoaded;
        };
        let pos = convert_position_to_internal_rep(pos.x, pos.y, pos.z);
        tree.get_height(pos, max_search_dist)
            .filter(|height| height.is_finite())
            .into()
    }

    /// Height of the surface below `pos`, `VMAP_INVALID_HEIGHT_VALUE` when
    /// there is none.
    pub fn get_height(&self, map_id: u32, pos: Vec3, max_search_dist: f32) -> f32 {
        self.query_height(map_id, pos, max_search_dist)
            .found()
            .unwrap_or(VMAP_INVALID_HEIGHT_VALUE)
    }

    pub fn query_area_info(&self, map_id: u32, pos: Vec3) -> QueryResult<AreaHit> {
        if self.is_disabled(map_id, DisableFlags::AREA_FLAG) {
            return QueryResult::Disabled;
        }
        let Some(tree) = self.map_tree(map_id) else {
            return QueryResult::NotLoaded;
        };
        let pos = convert_position_to_internal_rep(pos.x, pos.y, pos.z);
        tree.get_area_info(pos).into()
    }

    pub fn get_area_info(&self, map_id: u32, pos: Vec3) -> Option<AreaHit> {
        self.query_area_info(map_id, pos).found()
    }

    /// Liquid above the floor at `pos`. A non-zero `req_liquid_type` mask
    /// only accepts liquids whose flags intersect it.
    pub fn query_liquid_level(&self, map_id: u32, pos: Vec3, req_liquid_type: u32) -> QueryResult<LiquidHit> {
        if self.is_disabled(map_id, DisableFlags::LIQUID_STATUS) {
            return QueryResult::Disabled;
        }
        let Some(tree) = self.map_tree(map_id) else {
            return QueryResult::NotLoaded;
        };
        let pos = convert_position_to_internal_rep(pos.x, pos.y, pos.z);
        let Some(info) = tree.get_location_info(pos) else {
            return QueryResult::NotFound;
        };
        if req_liquid_type != 0 && self.hooks.liquid_flags(info.liquid_type) & req_liquid_type == 0 {
            return QueryResult::NotFound;
        }
        match info.liquid_level {
            Some(level) => QueryResult::Found(LiquidHit {
                level,
                floor_z: info.ground_z,
                liquid_type: info.liquid_type,
                mogp_flags: info.mogp_flags,
            }),
            None => QueryResult::NotFound,
        }
    }

    pub fn get_liquid_level(&self, map_id: u32, pos: Vec3, req_liquid_type: u32) -> Option<LiquidHit> {
        self.query_liquid_level(map_id, pos, req_liquid_type).found()
    }

    /// Floor, area and liquid of `pos` from a single ground lookup.
    pub fn query_area_and_liquid_data(
        &self,
        map_id: u32,
        pos: Vec3,
        req_liquid_type: u32,
    ) -> QueryResult<AreaAndLiquidData> {
        if self.is_disabled(map_id, DisableFlags::LIQUID_STATUS) {
            // area only, floor stays at the query height when nothing is found
            return match self.query_area_info(map_id, pos) {
                QueryResult::Found(hit) => QueryResult::Found(AreaAndLiquidData {
                    floor_z: hit.floor_z,
                    area_info: Some(hit.info),
                    liquid_info: None,
                }),
                QueryResult::NotFound | QueryResult::Disabled | QueryResult::NotLoaded => {
                    QueryResult::Found(AreaAndLiquidData {
                        floor_z: pos.z,
                        ..AreaAndLiquidData::default()
                    })
                }
            };
        }

        let Some(tree) = self.map_tree(map_id) else {
            return QueryResult::NotLoaded;
        };
        let internal = convert_position_to_internal_rep(pos.x, pos.y, pos.z);
        let Some(info) = tree.get_location_info(internal) else {
            return QueryResult::NotFound;
        };

        let mut data = AreaAndLiquidData {
            floor_z: info.ground_z,
            ..AreaAndLiquidData::default()
        };
        if req_liquid_type == 0 || self.hooks.liquid_flags(info.liquid_type) & req_liquid_type != 0 {
            data.liquid_info = info.liquid_level.map(|level| LiquidInfo {
                liquid_type: info.liquid_type,
                level,
            });
        }
        if !self.is_disabled(map_id, DisableFlags::AREA_FLAG) {
            data.area_info = Some(info.area_info());
        }
        QueryResult::Found(data)
    }

    /// Combined lookup; nothing found leaves the floor at
    /// `VMAP_INVALID_HEIGHT` with neither area nor liquid set.
    pub fn get_area_and_liquid_data(&self, map_id: u32, pos: Vec3, req_liquid_type: u32) -> AreaAndLiquidData {
        self.query_area_and_liquid_data(map_id, pos, req_liquid_type)
            .found()
            .unwrap_or_default()
    }
}

impl Drop for VMapManager {
    fn drop(&mut self) {
        let trees = std::mem::take(self.instance_map_trees.get_mut());
        for tree in trees.into_values() {
            tree.unload_all(&self.cache);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> VMapManager {
        VMapManager::new(&VMapConfig::new(dir.path()))
    }

    #[test]
    fn test_map_loading_needs_a_feature() {
        let dir = TempDir::new().unwrap();
        let vmaps = manager(&dir);
        vmaps.set_enable_line_of_sight_calc(false);
        vmaps.set_enable_height_calc(false);
        assert_eq!(vmaps.load_map(0, 32, 32), LoadResult::DisabledInConfig);

        vmaps.set_enable_height_calc(true);
        assert_eq!(vmaps.load_map(0, 32, 32), LoadResult::FileNotFound);
        assert!(!vmaps.has_map_tree(0));
    }

    #[test]
    fn test_parent_chain() {
        let dir = TempDir::new().unwrap();
        let vmaps = manager(&dir);
        vmaps.set_map_hierarchy(1, &[10, 11]);
        vmaps.set_map_hierarchy(0, &[1]);
        assert_eq!(vmaps.get_parent_map_id(10), Some(1));
        assert_eq!(vmaps.get_parent_map_id(1), Some(0));
        assert_eq!(vmaps.get_parent_map_id(0), None);
        assert_eq!(vmaps.map_chain(11), vec![11, 1, 0]);

        // cycles end the chain
        vmaps.set_map_hierarchy(11, &[0]);
        assert_eq!(vmaps.map_chain(11), vec![11, 1, 0]);
    }

    #[test]
    fn test_unloaded_map_sentinels() {
        let dir = TempDir::new().unwrap();
        let vmaps = manager(&dir);
        let pos = Vec3::new(100.0, 200.0, 50.0);
        assert!(vmaps.is_in_line_of_sight(5, pos, pos + Vec3::X, ModelIgnoreFlags::empty()));
        assert_eq!(vmaps.query_height(5, pos, 100.0), QueryResult::NotLoaded);
        assert_eq!(vmaps.get_height(5, pos, 100.0), VMAP_INVALID_HEIGHT_VALUE);
        assert!(vmaps.get_area_info(5, pos).is_none());
        assert!(vmaps.get_liquid_level(5, pos, 0).is_none());
        assert!(vmaps.get_object_hit_pos(5, pos, pos + Vec3::X, 0.0).is_none());

        let data = vmaps.get_area_and_liquid_data(5, pos, 0);
        assert_eq!(data, AreaAndLiquidData::default());
    }

    #[test]
    fn test_disabled_by_hooks() {
        struct NoHeight;
        impl VMapHooks for NoHeight {
            fn is_vmap_disabled_for(&self, map_id: u32, flags: DisableFlags) -> bool {
                map_id == 3 && flags.contains(DisableFlags::HEIGHT)
            }
        }
        let dir = TempDir::new().unwrap();
        let vmaps = VMapManager::with_hooks(&VMapConfig::new(dir.path()), Arc::new(NoHeight));
        let pos = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(vmaps.query_height(3, pos, 10.0), QueryResult::Disabled);
        assert_eq!(vmaps.query_height(4, pos, 10.0), QueryResult::NotLoaded);
    }

    #[test]
    fn test_default_liquid_flags() {
        let hooks = DefaultVMapHooks;
        assert_eq!(hooks.liquid_flags(0), 1);
        assert_eq!(hooks.liquid_flags(3), 8);
        assert_eq!(hooks.liquid_flags(40), 0);
    }
}
