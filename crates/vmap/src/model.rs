// WorldModel - immutable collision geometry loaded from a .vmo file

use std::io::{Read, Write};
use std::path::Path;

use byteorder::{ReadBytesExt, WriteBytesExt};
use glam::Vec3;

use crate::bih::Bih;
use crate::coordinates::TILE_SIZE;
use crate::error::VmapError;
use crate::geometry::{intersect_triangle, AaBox, MeshTriangle, Ray};
use crate::io::{
    create_file, open_file, read_aabox, read_chunk, read_magic, read_u32, read_vec3, write_aabox,
    write_magic, write_u32, write_vec3,
};
use crate::types::{ModelFlags, ModelIgnoreFlags};

/// Edge length of one liquid cell.
pub const LIQUID_TILE_SIZE: f32 = TILE_SIZE / 128.0;

const MAX_GROUP_ELEMENTS: u32 = 1 << 24;

/// Height field of the liquid inside a WMO group.
#[derive(Clone, Debug, PartialEq)]
pub struct WmoLiquid {
    tiles_x: u32,
    tiles_y: u32,
    corner: Vec3,
    liquid_type: u32,
    heights: Vec<f32>,
    flags: Vec<u8>,
}

impl WmoLiquid {
    /// `heights` holds `(tiles_x + 1) * (tiles_y + 1)` values and `flags`
    /// `tiles_x * tiles_y` values, both row major by y.
    pub fn new(
        tiles_x: u32,
        tiles_y: u32,
        corner: Vec3,
        liquid_type: u32,
        mut heights: Vec<f32>,
        mut flags: Vec<u8>,
    ) -> Self {
        heights.resize(((tiles_x + 1) * (tiles_y + 1)) as usize, corner.z);
        flags.resize((tiles_x * tiles_y) as usize, 0);
        Self {
            tiles_x,
            tiles_y,
            corner,
            liquid_type,
            heights,
            flags,
        }
    }

    /// Flat surface without per-cell data.
    pub fn flat(liquid_type: u32, level: f32) -> Self {
        Self::new(0, 0, Vec3::new(0.0, 0.0, level), liquid_type, vec![level], Vec::new())
    }

    pub fn liquid_type(&self) -> u32 {
        self.liquid_type
    }

    /// Surface height above `pos` (model space), interpolated on the
    /// triangle of the cell that contains it.
    pub fn get_liquid_height(&self, pos: Vec3) -> Option<f32> {
        if self.flags.is_empty() {
            return self.heights.first().copied();
        }

        let tx_f = (pos.x - self.corner.x) / LIQUID_TILE_SIZE;
        let ty_f = (pos.y - self.corner.y) / LIQUID_TILE_SIZE;
        if tx_f < 0.0 || ty_f < 0.0 {
            return None;
        }
        let tx = tx_f as u32;
        let ty = ty_f as u32;
        if tx >= self.tiles_x || ty >= self.tiles_y {
            return None;
        }

        // cells flagged 0x0F carry no liquid
        if (self.flags[(tx + ty * self.tiles_x) as usize] & 0x0F) == 0x0F {
            return None;
        }

        let dx = tx_f - tx as f32;
        let dy = ty_f - ty as f32;
        let row = self.tiles_x + 1;
        let h = |x: u32, y: u32| self.heights[(x + y * row) as usize];

        let level = if dx > dy {
            let sx = h(tx + 1, ty) - h(tx, ty);
            let sy = h(tx + 1, ty + 1) - h(tx + 1, ty);
            h(tx, ty) + dx * sx + dy * sy
        } else {
            let sx = h(tx + 1, ty + 1) - h(tx, ty + 1);
            let sy = h(tx, ty + 1) - h(tx, ty);
            h(tx, ty) + dx * sx + dy * sy
        };
        Some(level)
    }

    fn file_size(&self) -> u32 {
        let height_size = (self.tiles_x + 1) * (self.tiles_y + 1);
        2 * 4 + 12 + 4 + height_size * 4 + self.tiles_x * self.tiles_y
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let tiles_x = read_u32(reader)?;
        let tiles_y = read_u32(reader)?;
        let corner = read_vec3(reader)?;
        let liquid_type = read_u32(reader)?;

        let height_count = (tiles_x as u64 + 1) * (tiles_y as u64 + 1);
        if height_count > MAX_GROUP_ELEMENTS as u64 {
            return Err(VmapError::format(format!(
                "liquid too large: {}x{}",
                tiles_x, tiles_y
            )));
        }
        let mut heights = Vec::with_capacity(height_count as usize);
        for _ in 0..height_count {
            heights.push(reader.read_f32::<byteorder::LittleEndian>()?);
        }
        let mut flags = vec![0u8; (tiles_x * tiles_y) as usize];
        reader.read_exact(&mut flags)?;

        Ok(Self {
            tiles_x,
            tiles_y,
            corner,
            liquid_type,
            heights,
            flags,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VmapError> {
        write_u32(writer, self.tiles_x)?;
        write_u32(writer, self.tiles_y)?;
        write_vec3(writer, self.corner)?;
        write_u32(writer, self.liquid_type)?;
        for value in &self.heights {
            writer.write_f32::<byteorder::LittleEndian>(*value)?;
        }
        writer.write_all(&self.flags)?;
        Ok(())
    }
}

/// One WMO group (or the single group of an M2): triangles plus an
/// optional liquid surface.
#[derive(Clone, Debug)]
pub struct GroupModel {
    bound: AaBox,
    mogp_flags: u32,
    group_wmo_id: u32,
    vertices: Vec<Vec3>,
    triangles: Vec<MeshTriangle>,
    mesh_tree: Bih,
    liquid: Option<WmoLiquid>,
}

impl GroupModel {
    pub fn new(
        mogp_flags: u32,
        group_wmo_id: u32,
        bound: AaBox,
        vertices: Vec<Vec3>,
        triangles: Vec<MeshTriangle>,
        liquid: Option<WmoLiquid>,
    ) -> Self {
        let prim_bounds: Vec<AaBox> = triangles.iter().map(|tri| tri.bound(&vertices)).collect();
        let mesh_tree = Bih::build(&prim_bounds, 3);
        Self {
            bound,
            mogp_flags,
            group_wmo_id,
            vertices,
            triangles,
            mesh_tree,
            liquid,
        }
    }

    pub fn bound(&self) -> &AaBox {
        &self.bound
    }

    pub fn mogp_flags(&self) -> u32 {
        self.mogp_flags
    }

    pub fn wmo_id(&self) -> u32 {
        self.group_wmo_id
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn liquid_type(&self) -> u32 {
        self.liquid.as_ref().map_or(0, WmoLiquid::liquid_type)
    }

    pub fn get_liquid_level(&self, pos: Vec3) -> Option<f32> {
        self.liquid.as_ref()?.get_liquid_height(pos)
    }

    pub fn intersect_ray(&self, ray: &Ray, distance: &mut f32, stop_at_first: bool) -> bool {
        if self.triangles.is_empty() {
            return false;
        }
        let mut hit = false;
        self.mesh_tree.intersect_ray(
            ray,
            |ray, entry, dist, _| {
                let Some(tri) = self.triangles.get(entry as usize) else {
                    return false;
                };
                if intersect_triangle(tri, &self.vertices, ray, dist) {
                    hit = true;
                }
                hit
            },
            distance,
            stop_at_first,
        );
        hit
    }

    /// Distance from `pos` to the geometry below it along `down`, when
    /// `pos` lies inside this group's bound.
    pub fn is_inside_object(&self, pos: Vec3, down: Vec3) -> Option<f32> {
        if self.triangles.is_empty() || !self.bound.contains(pos) {
            return None;
        }
        let start = pos - 0.1 * down;
        let ray = Ray::new(start, down);
        let mut dist = f32::INFINITY;
        if self.intersect_ray(&ray, &mut dist, false) {
            Some(dist - 0.1)
        } else {
            None
        }
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let bound = read_aabox(reader)?;
        let mogp_flags = read_u32(reader)?;
        let group_wmo_id = read_u32(reader)?;

        read_chunk(reader, b"VERT")?;
        let _chunk_size = read_u32(reader)?;
        let count = read_u32(reader)?;
        if count > MAX_GROUP_ELEMENTS {
            return Err(VmapError::format(format!("too many vertices: {}", count)));
        }
        let mut group = Self {
            bound,
            mogp_flags,
            group_wmo_id,
            vertices: Vec::with_capacity(count as usize),
            triangles: Vec::new(),
            mesh_tree: Bih::new_empty(),
            liquid: None,
        };
        if count == 0 {
            // groups without collision geometry end here
            return Ok(group);
        }
        for _ in 0..count {
            group.vertices.push(read_vec3(reader)?);
        }

        read_chunk(reader, b"TRIM")?;
        let _chunk_size = read_u32(reader)?;
        let count = read_u32(reader)?;
        if count > MAX_GROUP_ELEMENTS {
            return Err(VmapError::format(format!("too many triangles: {}", count)));
        }
        group.triangles.reserve(count as usize);
        for _ in 0..count {
            let idx0 = read_u32(reader)?;
            let idx1 = read_u32(reader)?;
            let idx2 = read_u32(reader)?;
            group.triangles.push(MeshTriangle::new(idx0, idx1, idx2));
        }

        read_chunk(reader, b"MBIH")?;
        group.mesh_tree = Bih::read_from(reader)?;

        read_chunk(reader, b"LIQU")?;
        let liquid_size = read_u32(reader)?;
        if liquid_size > 0 {
            group.liquid = Some(WmoLiquid::read_from(reader)?);
        }

        Ok(group)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VmapError> {
        write_aabox(writer, &self.bound)?;
        write_u32(writer, self.mogp_flags)?;
        write_u32(writer, self.group_wmo_id)?;

        writer.write_all(b"VERT")?;
        let count = self.vertices.len() as u32;
        write_u32(writer, 4 + count * 12)?;
        write_u32(writer, count)?;
        if count == 0 {
            return Ok(());
        }
        for v in &self.vertices {
            write_vec3(writer, *v)?;
        }

        writer.write_all(b"TRIM")?;
        let count = self.triangles.len() as u32;
        write_u32(writer, 4 + count * 12)?;
        write_u32(writer, count)?;
        for tri in &self.triangles {
            write_u32(writer, tri.idx0)?;
            write_u32(writer, tri.idx1)?;
            write_u32(writer, tri.idx2)?;
        }

        writer.write_all(b"MBIH")?;
        self.mesh_tree.write_to(writer)?;

        writer.write_all(b"LIQU")?;
        match &self.liquid {
            Some(liquid) => {
                write_u32(writer, liquid.file_size())?;
                liquid.write_to(writer)?;
            }
            None => write_u32(writer, 0)?,
        }
        Ok(())
    }
}

/// Group reached by a point query, with its model's root id.
#[derive(Clone, Copy, Debug)]
pub struct GroupLocationInfo<'a> {
    pub root_id: i32,
    pub hit_model: &'a GroupModel,
}

/// Model geometry shared between all spawns of the same file.
#[derive(Debug)]
pub struct WorldModel {
    root_wmo_id: u32,
    flags: ModelFlags,
    groups: Vec<GroupModel>,
    group_tree: Bih,
}

impl WorldModel {
    pub fn new(root_wmo_id: u32, flags: ModelFlags, groups: Vec<GroupModel>) -> Self {
        let prim_bounds: Vec<AaBox> = groups.iter().map(|g| g.bound).collect();
        let group_tree = Bih::build(&prim_bounds, 1);
        Self {
            root_wmo_id,
            flags,
            groups,
            group_tree,
        }
    }

    pub fn root_wmo_id(&self) -> u32 {
        self.root_wmo_id
    }

    pub fn flags(&self) -> ModelFlags {
        self.flags
    }

    pub fn groups(&self) -> &[GroupModel] {
        &self.groups
    }

    /// Union of all group bounds, `None` for a model without groups.
    pub fn bounds(&self) -> Option<AaBox> {
        let (first, rest) = self.groups.split_first()?;
        let mut bound = first.bound;
        for group in rest {
            bound.merge_box(&group.bound);
        }
        Some(bound)
    }

    pub fn intersect_ray(
        &self,
        ray: &Ray,
        distance: &mut f32,
        stop_at_first: bool,
        ignore_flags: ModelIgnoreFlags,
    ) -> bool {
        if ignore_flags.contains(ModelIgnoreFlags::M2) && self.flags.contains(ModelFlags::M2) {
            return false;
        }

        // no need for the group tree with a single group
        if let [group] = self.groups.as_slice() {
            return group.intersect_ray(ray, distance, stop_at_first);
        }

        let mut hit = false;
        self.group_tree.intersect_ray(
            ray,
            |ray, entry, dist, stop| {
                if let Some(group) = self.groups.get(entry as usize) {
                    if group.intersect_ray(ray, dist, stop) {
                        hit = true;
                    }
                }
                hit
            },
            distance,
            stop_at_first,
        );
        hit
    }

    /// Nearest group below `p` whose bound contains it.
    fn find_group_below(&self, p: Vec3, down: Vec3) -> Option<(f32, &GroupModel)> {
        let mut best: Option<(f32, &GroupModel)> = None;
        self.group_tree.intersect_point(p, |point, entry| {
            let Some(group) = self.groups.get(entry as usize) else {
                return;
            };
            if let Some(z_dist) = group.is_inside_object(point, down) {
                if best.is_none_or(|(current, _)| z_dist < current) {
                    best = Some((z_dist, group));
                }
            }
        });
        best
    }

    /// Ground distance below `p` together with the area identification of
    /// the group it was found in.
    pub fn intersect_point(&self, p: Vec3, down: Vec3) -> Option<(f32, crate::types::AreaInfo)> {
        let (z_dist, group) = self.find_group_below(p, down)?;
        Some((
            z_dist,
            crate::types::AreaInfo {
                adt_id: 0,
                root_id: self.root_wmo_id as i32,
                group_id: group.group_wmo_id as i32,
                mogp_flags: group.mogp_flags,
            },
        ))
    }

    pub fn get_location_info(&self, p: Vec3, down: Vec3) -> Option<(f32, GroupLocationInfo<'_>)> {
        let (z_dist, group) = self.find_group_below(p, down)?;
        Some((
            z_dist,
            GroupLocationInfo {
                root_id: self.root_wmo_id as i32,
                hit_model: group,
            },
        ))
    }

    /// Liquid surface of the group found below `p` (model space).
    pub fn get_liquid_level(&self, p: Vec3, down: Vec3) -> Option<f32> {
        let (_, group) = self.find_group_below(p, down)?;
        group.get_liquid_level(p)
    }

    pub fn read_file(path: &Path) -> Result<Self, VmapError> {
        let mut reader = open_file(path)?;
        Self::read_from(&mut reader)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        read_magic(reader)?;

        read_chunk(reader, b"WMOD")?;
        let chunk_size = read_u32(reader)?;
        let root_wmo_id = read_u32(reader)?;
        let flags = if chunk_size >= 8 {
            ModelFlags::from_bits_truncate(read_u32(reader)?)
        } else {
            ModelFlags::empty()
        };

        read_chunk(reader, b"GMOD")?;
        let count = read_u32(reader)?;
        if count > MAX_GROUP_ELEMENTS {
            return Err(VmapError::format(format!("too many groups: {}", count)));
        }
        let mut groups = Vec::with_capacity(count as usize);
        for _ in 0..count {
            groups.push(GroupModel::read_from(reader)?);
        }

        read_chunk(reader, b"GBIH")?;
        let group_tree = Bih::read_from(reader)?;

        Ok(Self {
            root_wmo_id,
            flags,
            groups,
            group_tree,
        })
    }

    /// Copy of this model carrying additional flags.
    pub(crate) fn with_flags(mut self, flags: ModelFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn write_file(&self, path: &Path) -> Result<(), VmapError> {
        let mut writer = create_file(path)?;
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VmapError> {
        write_magic(writer)?;

        writer.write_all(b"WMOD")?;
        write_u32(writer, 8)?;
        write_u32(writer, self.root_wmo_id)?;
        write_u32(writer, self.flags.bits())?;

        writer.write_all(b"GMOD")?;
        write_u32(writer, self.groups.len() as u32)?;
        for group in &self.groups {
            group.write_to(writer)?;
        }

        writer.write_all(b"GBIH")?;
        self.group_tree.write_to(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Square room: floor at `floor_z`, group bound reaching 30 units up.
    fn room_group(group_id: u32, floor_z: f32, liquid: Option<WmoLiquid>) -> GroupModel {
        let vertices = vec![
            Vec3::new(-20.0, -20.0, floor_z),
            Vec3::new(20.0, -20.0, floor_z),
            Vec3::new(20.0, 20.0, floor_z),
            Vec3::new(-20.0, 20.0, floor_z),
        ];
        let triangles = vec![MeshTriangle::new(0, 1, 2), MeshTriangle::new(0, 2, 3)];
        let bound = AaBox::new(
            Vec3::new(-20.0, -20.0, floor_z - 1.0),
            Vec3::new(20.0, 20.0, floor_z + 30.0),
        );
        GroupModel::new(0x8, group_id, bound, vertices, triangles, liquid)
    }

    #[test]
    fn test_ray_hits_floor() {
        let model = WorldModel::new(7, ModelFlags::empty(), vec![room_group(1, 0.0, None)]);
        let ray = Ray::new(Vec3::new(1.0, 3.0, 10.0), Vec3::NEG_Z);
        let mut dist = 100.0;
        assert!(model.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
        assert!((dist - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_ignore_m2() {
        let model = WorldModel::new(7, ModelFlags::M2, vec![room_group(1, 0.0, None)]);
        let ray = Ray::new(Vec3::new(1.0, 3.0, 10.0), Vec3::NEG_Z);
        let mut dist = 100.0;
        assert!(!model.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::M2));
        assert!(model.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
    }

    #[test]
    fn test_point_query_picks_group_below() {
        // two stacked floors, the point stands on the upper one
        let model = WorldModel::new(
            42,
            ModelFlags::empty(),
            vec![room_group(1, 0.0, None), room_group(2, 35.0, None)],
        );
        let (z_dist, info) = model
            .intersect_point(Vec3::new(0.0, 5.0, 40.0), Vec3::NEG_Z)
            .unwrap();
        assert!((z_dist - 5.0).abs() < 1e-3);
        assert_eq!(info.root_id, 42);
        assert_eq!(info.group_id, 2);
        assert_eq!(info.mogp_flags, 0x8);

        assert!(model.intersect_point(Vec3::new(100.0, 0.0, 5.0), Vec3::NEG_Z).is_none());
    }

    #[test]
    fn test_liquid_level_of_group() {
        let model = WorldModel::new(
            3,
            ModelFlags::empty(),
            vec![room_group(1, 0.0, Some(WmoLiquid::flat(2, 12.5)))],
        );
        let level = model.get_liquid_level(Vec3::new(2.0, -3.0, 5.0), Vec3::NEG_Z);
        assert_eq!(level, Some(12.5));
        let (_, location) = model.get_location_info(Vec3::new(2.0, -3.0, 5.0), Vec3::NEG_Z).unwrap();
        assert_eq!(location.hit_model.liquid_type(), 2);
    }

    #[test]
    fn test_liquid_height_interpolation() {
        // one cell rising along x from 0 to 8
        let liquid = WmoLiquid::new(
            1,
            1,
            Vec3::ZERO,
            1,
            vec![0.0, 8.0, 0.0, 8.0],
            vec![0],
        );
        let half = LIQUID_TILE_SIZE * 0.5;
        let level = liquid.get_liquid_height(Vec3::new(half, LIQUID_TILE_SIZE * 0.25, 0.0)).unwrap();
        assert!((level - 4.0).abs() < 1e-3);
        assert!(liquid.get_liquid_height(Vec3::new(-1.0, 0.5, 0.0)).is_none());

        let dry = WmoLiquid::new(1, 1, Vec3::ZERO, 1, vec![0.0; 4], vec![0x0F]);
        assert!(dry.get_liquid_height(Vec3::new(half, half, 0.0)).is_none());
    }

    #[test]
    fn test_file_layout_survives_reload() {
        let model = WorldModel::new(
            99,
            ModelFlags::WORLD_SPAWN,
            vec![
                room_group(1, 0.0, Some(WmoLiquid::flat(4, 3.0))),
                room_group(2, 35.0, None),
                GroupModel::new(0, 3, AaBox::ZERO, Vec::new(), Vec::new(), None),
            ],
        );
        let mut buf = Vec::new();
        model.write_to(&mut buf).unwrap();
        let loaded = WorldModel::read_from(&mut Cursor::new(buf)).unwrap();

        assert_eq!(loaded.root_wmo_id(), 99);
        assert_eq!(loaded.flags(), ModelFlags::WORLD_SPAWN);
        assert_eq!(loaded.groups().len(), 3);
        assert_eq!(loaded.groups()[0].liquid_type(), 4);
        assert_eq!(loaded.groups()[2].triangle_count(), 0);

        let ray = Ray::new(Vec3::new(3.0, -4.0, 50.0), Vec3::NEG_Z);
        let mut dist = 100.0;
        assert!(loaded.intersect_ray(&ray, &mut dist, false, ModelIgnoreFlags::empty()));
        assert!((dist - 15.0).abs() < 1e-3);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let model = WorldModel::new(1, ModelFlags::empty(), vec![room_group(1, 0.0, None)]);
        let mut buf = Vec::new();
        model.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(WorldModel::read_from(&mut Cursor::new(buf)).is_err());
    }
}
