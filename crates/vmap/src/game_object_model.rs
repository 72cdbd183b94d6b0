// GameObjectModel - collision proxy of a spawned game object

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use byteorder::ReadBytesExt;
use glam::{Mat3, Quat, Vec3};

use crate::error::VmapError;
use crate::geometry::{AaBox, Ray};
use crate::io::{open_file, read_aabox, read_magic, read_name, read_u32_or_eof};
use crate::manager::VMapManager;
use crate::model::WorldModel;
use crate::model_cache::ModelCache;
use crate::types::{AreaHit, AreaInfo, LocationInfo, ModelFlags, ModelIgnoreFlags, GAMEOBJECT_MODELS};

/// Static collision data of one display id.
#[derive(Clone, Debug, PartialEq)]
pub struct GameObjectModelData {
    pub name: String,
    pub bound: AaBox,
    pub is_wmo: bool,
}

/// Display id -> model registry read from `GameObjectModels.dtree`.
#[derive(Debug, Default)]
pub struct GameObjectModelList {
    models: HashMap<u32, GameObjectModelData>,
}

impl GameObjectModelList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<vmaps_dir>/GameObjectModels.dtree`. Problems are logged; an
    /// unreadable file gives an empty list and a corrupt tail keeps every
    /// record read before it.
    pub fn load(vmaps_dir: &Path) -> Self {
        let path = vmaps_dir.join(GAMEOBJECT_MODELS);
        let mut list = Self::new();
        let mut reader = match open_file(&path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!("Unable to open '{}' file: {}", path.display(), e);
                return list;
            }
        };
        if let Err(e) = read_magic(&mut reader) {
            tracing::error!("File '{}' has wrong header: {}", path.display(), e);
            return list;
        }

        loop {
            match Self::read_record(&mut reader) {
                Ok(Some((display_id, data))) => {
                    if data.bound.is_nan() {
                        tracing::error!(
                            "File '{}' Model '{}' has invalid bounds {:?}",
                            path.display(),
                            data.name,
                            data.bound
                        );
                        continue;
                    }
                    list.models.insert(display_id, data);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("File '{}' seems to be corrupted: {}", path.display(), e);
                    break;
                }
            }
        }

        tracing::info!(">> Loaded {} GameObject models", list.models.len());
        list
    }

    fn read_record<R: std::io::Read>(reader: &mut R) -> Result<Option<(u32, GameObjectModelData)>, VmapError> {
        let Some(display_id) = read_u32_or_eof(reader)? else {
            return Ok(None);
        };
        let is_wmo = reader.read_u8()? != 0;
        let name = read_name(reader)?;
        let bound = read_aabox(reader)?;
        Ok(Some((display_id, GameObjectModelData { name, bound, is_wmo })))
    }

    pub fn insert(&mut self, display_id: u32, data: GameObjectModelData) {
        self.models.insert(display_id, data);
    }

    pub fn get(&self, display_id: u32) -> Option<&GameObjectModelData> {
        self.models.get(&display_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &GameObjectModelData)> {
        self.models.iter().map(|(id, data)| (*id, data))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// State a game object exposes to its collision model.
pub trait GameObjectModelOwner: Send + Sync {
    fn display_id(&self) -> u32;
    /// Reported as the adt id of area lookups.
    fn name_set_id(&self) -> u8 {
        0
    }
    fn is_spawned(&self) -> bool;
    fn is_in_phase(&self, phase_mask: u32) -> bool;
    fn position(&self) -> Vec3;
    fn rotation(&self) -> Quat;
    fn scale(&self) -> f32;
}

/// World placed instance of a shared model, positioned by its owner.
/// Queries run in world coordinates. Dropping it releases the model.
pub struct GameObjectModel {
    owner: Box<dyn GameObjectModelOwner>,
    cache: Arc<ModelCache>,
    name: String,
    local_bound: AaBox,
    bound: AaBox,
    inv_rot: Mat3,
    pos: Vec3,
    scale: f32,
    inv_scale: f32,
    model: Arc<WorldModel>,
    collision_enabled: bool,
    is_wmo: bool,
}

impl GameObjectModel {
    /// `None` when the display id has no usable model; the object then
    /// simply has no collision.
    pub fn create(
        owner: Box<dyn GameObjectModelOwner>,
        models: &GameObjectModelList,
        manager: &VMapManager,
    ) -> Option<Self> {
        let data = models.get(owner.display_id())?;
        // ignore models with no bounds
        if data.bound == AaBox::ZERO {
            tracing::error!("GameObject model {} has zero bounds, loading skipped", data.name);
            return None;
        }

        let scale = owner.scale();
        if !scale.is_finite() || scale <= 0.0 {
            tracing::error!(
                "GameObject model {} has invalid scale {}, loading skipped",
                data.name,
                scale
            );
            return None;
        }

        let flags = if data.is_wmo {
            ModelFlags::WORLD_SPAWN
        } else {
            ModelFlags::M2
        };
        let model = manager.acquire_model_instance(&data.name, flags)?;

        let mut object = Self {
            cache: Arc::clone(manager.model_cache()),
            name: data.name.clone(),
            local_bound: data.bound,
            bound: AaBox::ZERO,
            inv_rot: Mat3::IDENTITY,
            pos: Vec3::ZERO,
            scale,
            inv_scale: 1.0 / scale,
            model,
            collision_enabled: true,
            is_wmo: data.is_wmo,
            owner,
        };
        object.update_position();
        Some(object)
    }

    /// Recomputes the world transform and bound after the owner moved.
    pub fn update_position(&mut self) {
        let rotation = Mat3::from_quat(self.owner.rotation());
        self.pos = self.owner.position();
        self.inv_rot = rotation.transpose();
        self.bound = self
            .local_bound
            .scaled(self.scale)
            .rotated(rotation)
            .translated(self.pos);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bound(&self) -> &AaBox {
        &self.bound
    }

    pub fn position(&self) -> Vec3 {
        self.pos
    }

    pub fn model(&self) -> &Arc<WorldModel> {
        &self.model
    }

    pub fn owner(&self) -> &dyn GameObjectModelOwner {
        self.owner.as_ref()
    }

    pub fn is_map_object(&self) -> bool {
        self.is_wmo
    }

    pub fn is_collision_enabled(&self) -> bool {
        self.collision_enabled
    }

    pub fn enable_collision(&mut self, enabled: bool) {
        self.collision_enabled = enabled;
    }

    fn participates(&self, phase_mask: u32) -> bool {
        self.collision_enabled && self.owner.is_spawned() && self.owner.is_in_phase(phase_mask)
    }

    fn to_model_space(&self, p: Vec3) -> Vec3 {
        self.inv_rot * (p - self.pos) * self.inv_scale
    }

    fn ground_to_world_z(&self, model_ground: Vec3) -> f32 {
        (self.inv_rot.transpose() * model_ground * self.scale + self.pos).z
    }

    pub fn intersect_ray(
        &self,
        ray: &Ray,
        max_dist: &mut f32,
        stop_at_first: bool,
        phase_mask: u32,
        ignore_flags: ModelIgnoreFlags,
    ) -> bool {
        if !self.participates(phase_mask) {
            return false;
        }
        if ray.intersection_time(&self.bound).is_none() {
            return false;
        }

        let model_ray = Ray::new(self.to_model_space(ray.origin), self.inv_rot * ray.direction);
        let mut distance = *max_dist * self.inv_scale;
        let hit = self
            .model
            .intersect_ray(&model_ray, &mut distance, stop_at_first, ignore_flags);
        if hit {
            *max_dist = distance * self.scale;
        }
        hit
    }

    /// Floor and area identification below `point`, WMOs only.
    pub fn intersect_point(&self, point: Vec3, phase_mask: u32) -> Option<AreaHit> {
        if !self.is_wmo || !self.participates(phase_mask) || !self.bound.contains(point) {
            return None;
        }
        let p_model = self.to_model_space(point);
        let z_dir_model = self.inv_rot * Vec3::NEG_Z;
        let (z_dist, info) = self.model.intersect_point(p_model, z_dir_model)?;
        Some(AreaHit {
            floor_z: self.ground_to_world_z(p_model + z_dist * z_dir_model),
            info: AreaInfo {
                adt_id: self.owner.name_set_id() as i32,
                ..info
            },
        })
    }

    pub fn get_location_info(&self, point: Vec3, phase_mask: u32) -> Option<LocationInfo> {
        if !self.is_wmo || !self.participates(phase_mask) || !self.bound.contains(point) {
            return None;
        }
        let p_model = self.to_model_space(point);
        let z_dir_model = self.inv_rot * Vec3::NEG_Z;
        let (z_dist, location) = self.model.get_location_info(p_model, z_dir_model)?;
        let group = location.hit_model;
        Some(LocationInfo {
            ground_z: self.ground_to_world_z(p_model + z_dist * z_dir_model),
            root_id: location.root_id,
            adt_id: self.owner.name_set_id() as i32,
            group_id: group.wmo_id() as i32,
            mogp_flags: group.mogp_flags(),
            liquid_type: group.liquid_type(),
            liquid_level: group
                .get_liquid_level(p_model)
                .map(|level| level * self.scale + self.pos.z),
        })
    }

    pub fn get_liquid_level(&self, point: Vec3, phase_mask: u32) -> Option<f32> {
        if !self.participates(phase_mask) || !self.bound.contains(point) {
            return None;
        }
        let p_model = self.to_model_space(point);
        let z_dir_model = self.inv_rot * Vec3::NEG_Z;
        let level = self.model.get_liquid_level(p_model, z_dir_model)?;
        Some(level * self.scale + self.pos.z)
    }
}

impl Drop for GameObjectModel {
    fn drop(&mut self) {
        self.cache.release_model_instance(&self.name);
    }
}

impl std::fmt::Debug for GameObjectModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameObjectModel")
            .field("name", &self.name)
            .field("display_id", &self.owner.display_id())
            .field("bound", &self.bound)
            .field("collision_enabled", &self.collision_enabled)
            .finish()
    }
}
