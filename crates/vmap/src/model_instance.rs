// ModelSpawn / ModelInstance - placement of a shared model in a map

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{EulerRot, Mat3, Vec3};

use crate::error::VmapError;
use crate::geometry::{AaBox, Ray};
use crate::io::{read_aabox, read_name, read_vec3, write_aabox, write_name, write_vec3};
use crate::model::WorldModel;
use crate::types::{AreaHit, AreaInfo, LocationInfo, ModelFlags, ModelIgnoreFlags};

/// Placement record as stored in tree and tile files.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpawn {
    pub flags: ModelFlags,
    pub adt_id: u16,
    pub id: u32,
    pub pos: Vec3,
    /// Euler angles in degrees.
    pub rot: Vec3,
    pub scale: f32,
    pub bound: Option<AaBox>,
    pub name: String,
}

impl ModelSpawn {
    pub fn new(id: u32, name: impl Into<String>, pos: Vec3, rot: Vec3, scale: f32) -> Self {
        Self {
            flags: ModelFlags::empty(),
            adt_id: 0,
            id,
            pos,
            rot,
            scale,
            bound: None,
            name: name.into(),
        }
    }

    /// Rotation from model to world space.
    pub fn rotation(&self) -> Mat3 {
        Mat3::from_euler(
            EulerRot::ZYX,
            self.rot.y.to_radians(),
            self.rot.x.to_radians(),
            self.rot.z.to_radians(),
        )
    }

    /// World bound of this spawn for `model`, taken from its group bounds.
    pub fn compute_bound(&mut self, model: &WorldModel) -> Option<AaBox> {
        let local = model.bounds()?;
        let bound = local
            .scaled(self.scale)
            .rotated(self.rotation())
            .translated(self.pos);
        self.bound = Some(bound);
        self.flags |= ModelFlags::HAS_BOUND;
        self.bound
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let flags = ModelFlags::from_bits_truncate(reader.read_u32::<LittleEndian>()?);
        let adt_id = reader.read_u16::<LittleEndian>()?;
        let id = reader.read_u32::<LittleEndian>()?;
        let pos = read_vec3(reader)?;
        let rot = read_vec3(reader)?;
        let scale = reader.read_f32::<LittleEndian>()?;

        let bound = if flags.contains(ModelFlags::HAS_BOUND) {
            Some(read_aabox(reader)?)
        } else {
            None
        };
        let name = read_name(reader)?;

        Ok(Self {
            flags,
            adt_id,
            id,
            pos,
            rot,
            scale,
            bound,
            name,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VmapError> {
        let mut flags = self.flags;
        flags.set(ModelFlags::HAS_BOUND, self.bound.is_some());
        writer.write_u32::<LittleEndian>(flags.bits())?;
        writer.write_u16::<LittleEndian>(self.adt_id)?;
        writer.write_u32::<LittleEndian>(self.id)?;
        write_vec3(writer, self.pos)?;
        write_vec3(writer, self.rot)?;
        writer.write_f32::<LittleEndian>(self.scale)?;
        if let Some(bound) = &self.bound {
            write_aabox(writer, bound)?;
        }
        write_name(writer, &self.name)
    }
}

/// A spawn bound to its loaded geometry.
#[derive(Clone, Debug)]
pub struct ModelInstance {
    spawn: ModelSpawn,
    model: Arc<WorldModel>,
    inv_rot: Mat3,
    inv_scale: f32,
}

impl ModelInstance {
    pub fn new(spawn: ModelSpawn, model: Arc<WorldModel>) -> Self {
        let inv_rot = spawn.rotation().inverse();
        let inv_scale = 1.0 / spawn.scale;
        Self {
            spawn,
            model,
            inv_rot,
            inv_scale,
        }
    }

    pub fn spawn(&self) -> &ModelSpawn {
        &self.spawn
    }

    pub fn name(&self) -> &str {
        &self.spawn.name
    }

    pub fn model(&self) -> &Arc<WorldModel> {
        &self.model
    }

    fn to_model_space(&self, p: Vec3) -> Vec3 {
        self.inv_rot * (p - self.spawn.pos) * self.inv_scale
    }

    fn ground_to_world_z(&self, model_ground: Vec3) -> f32 {
        (self.inv_rot.transpose() * model_ground * self.spawn.scale + self.spawn.pos).z
    }

    pub fn intersect_ray(
        &self,
        ray: &Ray,
        max_dist: &mut f32,
        stop_at_first: bool,
        ignore_flags: ModelIgnoreFlags,
    ) -> bool {
        let Some(bound) = &self.spawn.bound else {
            return false;
        };
        match ray.intersection_time(bound) {
            Some(time) if time <= *max_dist => {}
            _ => return false,
        }

        let model_ray = Ray::new(
            self.to_model_space(ray.origin),
            self.inv_rot * ray.direction,
        );
        let mut distance = *max_dist * self.inv_scale;
        let hit = self
            .model
            .intersect_ray(&model_ray, &mut distance, stop_at_first, ignore_flags);
        if hit {
            *max_dist = distance * self.spawn.scale;
        }
        hit
    }

    /// Ground and area identification below `p`. M2 models carry no area
    /// data and never answer.
    pub fn intersect_point(&self, p: Vec3) -> Option<AreaHit> {
        if self.spawn.flags.contains(ModelFlags::M2) || !self.contains(p) {
            return None;
        }
        let p_model = self.to_model_space(p);
        let z_dir_model = self.inv_rot * Vec3::NEG_Z;
        let (z_dist, info) = self.model.intersect_point(p_model, z_dir_model)?;
        let model_ground = p_model + z_dist * z_dir_model;
        Some(AreaHit {
            floor_z: self.ground_to_world_z(model_ground),
            info: AreaInfo {
                adt_id: self.spawn.adt_id as i32,
                ..info
            },
        })
    }

    /// Nearest ground below `p` with the hit group's area and liquid data.
    pub fn get_location_info(&self, p: Vec3) -> Option<LocationInfo> {
        if self.spawn.flags.contains(ModelFlags::M2) || !self.contains(p) {
            return None;
        }
        let p_model = self.to_model_space(p);
        let z_dir_model = self.inv_rot * Vec3::NEG_Z;
        let (z_dist, location) = self.model.get_location_info(p_model, z_dir_model)?;
        let model_ground = p_model + z_dist * z_dir_model;
        let group = location.hit_model;
        Some(LocationInfo {
            ground_z: self.ground_to_world_z(model_ground),
            root_id: location.root_id,
            adt_id: self.spawn.adt_id as i32,
            group_id: group.wmo_id() as i32,
            mogp_flags: group.mogp_flags(),
            liquid_type: group.liquid_type(),
            liquid_level: group
                .get_liquid_level(p_model)
                .map(|level| level * self.spawn.scale + self.spawn.pos.z),
        })
    }

    /// World height of the liquid surface in the group below `p`.
    pub fn get_liquid_level(&self, p: Vec3) -> Option<f32> {
        if !self.contains(p) {
            return None;
        }
        let p_model = self.to_model_space(p);
        let z_dir_model = self.inv_rot * Vec3::NEG_Z;
        let level = self.model.get_liquid_level(p_model, z_dir_model)?;
        Some(level * self.spawn.scale + self.spawn.pos.z)
    }

    fn contains(&self, p: Vec3) -> bool {
        self.spawn.bound.is_some_and(|bound| bound.contains(p))
    }
}
