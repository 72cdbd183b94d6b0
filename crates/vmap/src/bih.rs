// BIH - bounding interval hierarchy
//
// Flat node array: word 0 holds the axis in bits 30-31 (3 = leaf), the
// BVH2 flag in bit 29 and the child offset (or first object index for
// leaves) in the low bits. Words 1 and 2 hold the left/right clip planes as
// raw float bits, or the object count for leaves.

use std::io::{Read, Write};

use glam::Vec3;

use crate::error::VmapError;
use crate::geometry::{AaBox, Ray};
use crate::io::{read_aabox, read_u32, write_aabox, write_u32};

const MAX_STACK_SIZE: usize = 64;
const LEAF_AXIS: u32 = 3;
const BVH2_FLAG: u32 = 1 << 29;
const OFFSET_MASK: u32 = !(7 << 29);

/// Upper bound on node words / objects accepted from a file.
const MAX_ELEMENTS: u32 = 1 << 26;

#[derive(Clone, Debug)]
pub struct Bih {
    bounds: AaBox,
    tree: Vec<u32>,
    objects: Vec<u32>,
}

impl Default for Bih {
    fn default() -> Self {
        Self::new_empty()
    }
}

struct BuildData<'a> {
    prim_bounds: &'a [AaBox],
    indices: Vec<u32>,
    max_prims: i32,
}

struct StackNode {
    node: usize,
    tnear: f32,
    tfar: f32,
}

impl Bih {
    pub fn new_empty() -> Self {
        Self {
            bounds: AaBox::ZERO,
            // dummy leaf without objects
            tree: vec![LEAF_AXIS << 30, 0, 0],
            objects: Vec::new(),
        }
    }

    pub fn build(prim_bounds: &[AaBox], leaf_size: u32) -> Self {
        let Some(first) = prim_bounds.first() else {
            return Self::new_empty();
        };

        let mut bounds = *first;
        for pb in &prim_bounds[1..] {
            bounds.merge_box(pb);
        }

        let mut data = BuildData {
            prim_bounds,
            indices: (0..prim_bounds.len() as u32).collect(),
            max_prims: leaf_size.max(1) as i32,
        };

        let mut tree = vec![LEAF_AXIS << 30, 0, 0];
        Self::subdivide(
            0,
            prim_bounds.len() as i32 - 1,
            &mut tree,
            &mut data,
            bounds,
            bounds,
            0,
            1,
        );

        Self {
            bounds,
            tree,
            objects: data.indices,
        }
    }

    pub fn bounds(&self) -> &AaBox {
        &self.bounds
    }

    pub fn prim_count(&self) -> usize {
        self.objects.len()
    }

    fn create_leaf(tree: &mut [u32], node_index: usize, left: i32, right: i32) {
        tree[node_index] = (LEAF_AXIS << 30) | left as u32;
        tree[node_index + 1] = (right - left + 1) as u32;
    }

    fn alloc_node(tree: &mut Vec<u32>) -> usize {
        let index = tree.len();
        tree.extend_from_slice(&[0, 0, 0]);
        index
    }

    #[allow(clippy::too_many_arguments)]
    fn subdivide(
        left: i32,
        mut right: i32,
        tree: &mut Vec<u32>,
        data: &mut BuildData<'_>,
        mut grid_box: AaBox,
        mut node_box: AaBox,
        mut node_index: usize,
        depth: usize,
    ) {
        if (right - left + 1) <= data.max_prims || depth >= MAX_STACK_SIZE {
            Self::create_leaf(tree, node_index, left, right);
            return;
        }

        let right_orig = right;
        let mut axis: i32 = -1;
        let mut clip_l;
        let mut clip_r;
        let mut prev_clip = f32::NAN;
        let mut split = f32::NAN;
        let mut was_left = true;

        loop {
            let prev_axis = axis;
            let prev_split = split;

            let d = grid_box.hi - grid_box.lo;
            axis = if d.x >= d.y && d.x >= d.z {
                0
            } else if d.y >= d.z {
                1
            } else {
                2
            };
            let ax = axis as usize;
            split = 0.5 * (grid_box.lo[ax] + grid_box.hi[ax]);

            clip_l = f32::NEG_INFINITY;
            clip_r = f32::INFINITY;
            let mut node_l = f32::INFINITY;
            let mut node_r = f32::NEG_INFINITY;

            let mut i = left;
            while i <= right {
                let obj = data.indices[i as usize] as usize;
                let minb = data.prim_bounds[obj].lo[ax];
                let maxb = data.prim_bounds[obj].hi[ax];
                let center = (minb + maxb) * 0.5;
                if center <= split {
                    i += 1;
                    clip_l = clip_l.max(maxb);
                } else {
                    data.indices.swap(i as usize, right as usize);
                    right -= 1;
                    clip_r = clip_r.min(minb);
                }
                node_l = node_l.min(minb);
                node_r = node_r.max(maxb);
            }

            // cut off empty space around the primitives
            if node_l > node_box.lo[ax] && node_r < node_box.hi[ax] {
                let node_box_w = node_box.hi[ax] - node_box.lo[ax];
                let node_new_w = node_r - node_l;
                if 1.3 * node_new_w < node_box_w {
                    let next_index = Self::alloc_node(tree);
                    tree[node_index] = ((axis as u32) << 30) | BVH2_FLAG | next_index as u32;
                    tree[node_index + 1] = node_l.to_bits();
                    tree[node_index + 2] = node_r.to_bits();
                    node_box.lo[ax] = node_l;
                    node_box.hi[ax] = node_r;
                    Self::subdivide(
                        left, right_orig, tree, data, grid_box, node_box, next_index, depth + 1,
                    );
                    return;
                }
            }

            let stuck = prev_axis == axis && (prev_split - split).abs() < 1e-6;
            if right == right_orig {
                // everything went left
                if stuck {
                    Self::create_leaf(tree, node_index, left, right);
                    return;
                }
                grid_box.hi[ax] = split;
                if clip_l <= split {
                    prev_clip = clip_l;
                    was_left = true;
                    continue;
                }
                prev_clip = f32::NAN;
            } else if left > right {
                // everything went right
                right = right_orig;
                if stuck {
                    Self::create_leaf(tree, node_index, left, right);
                    return;
                }
                grid_box.lo[ax] = split;
                if clip_r >= split {
                    prev_clip = clip_r;
                    was_left = false;
                    continue;
                }
                prev_clip = f32::NAN;
            } else {
                // a real split; emit the empty-space node of the previous pass
                if prev_axis != -1 && !prev_clip.is_nan() {
                    let next_index = Self::alloc_node(tree);
                    if was_left {
                        tree[node_index] = ((prev_axis as u32) << 30) | next_index as u32;
                        tree[node_index + 1] = prev_clip.to_bits();
                        tree[node_index + 2] = f32::INFINITY.to_bits();
                    } else {
                        tree[node_index] =
                            ((prev_axis as u32) << 30) | (next_index as u32).wrapping_sub(3);
                        tree[node_index + 1] = f32::NEG_INFINITY.to_bits();
                        tree[node_index + 2] = prev_clip.to_bits();
                    }
                    node_index = next_index;
                }
                break;
            }
        }

        let mut next_index = tree.len();
        let nl = right - left + 1;
        let nr = right_orig - right;
        if nl > 0 {
            tree.extend_from_slice(&[0, 0, 0]);
        } else {
            next_index -= 3;
        }
        if nr > 0 {
            tree.extend_from_slice(&[0, 0, 0]);
        }

        tree[node_index] = ((axis as u32) << 30) | next_index as u32;
        tree[node_index + 1] = clip_l.to_bits();
        tree[node_index + 2] = clip_r.to_bits();

        let ax = axis as usize;
        let mut grid_box_l = grid_box;
        let mut grid_box_r = grid_box;
        let mut node_box_l = node_box;
        let mut node_box_r = node_box;
        grid_box_l.hi[ax] = split;
        grid_box_r.lo[ax] = split;
        node_box_l.hi[ax] = clip_l;
        node_box_r.lo[ax] = clip_r;

        if nl > 0 {
            Self::subdivide(
                left, right, tree, data, grid_box_l, node_box_l, next_index, depth + 1,
            );
        }
        if nr > 0 {
            Self::subdivide(
                right + 1,
                right_orig,
                tree,
                data,
                grid_box_r,
                node_box_r,
                next_index + 3,
                depth + 1,
            );
        }
    }

    /// Walks the nodes the ray passes front to back. The callback receives
    /// the ray, an object index and the current max distance, which it may
    /// shrink; it returns whether the object was hit.
    pub fn intersect_ray<F>(&self, ray: &Ray, mut callback: F, max_dist: &mut f32, stop_at_first: bool)
    where
        F: FnMut(&Ray, u32, &mut f32, bool) -> bool,
    {
        let org = ray.origin;
        let dir = ray.direction;
        let mut interval_min = -1.0f32;
        let mut interval_max = -1.0f32;
        let mut inv_dir = Vec3::ZERO;

        for i in 0..3 {
            inv_dir[i] = 1.0 / dir[i];
            if dir[i].abs() > f32::EPSILON {
                let mut t1 = (self.bounds.lo[i] - org[i]) * inv_dir[i];
                let mut t2 = (self.bounds.hi[i] - org[i]) * inv_dir[i];
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                if t1 > interval_min {
                    interval_min = t1;
                }
                if t2 < interval_max || interval_max < 0.0 {
                    interval_max = t2;
                }
                if interval_max <= 0.0 || interval_min >= *max_dist {
                    return;
                }
            } else if org[i] < self.bounds.lo[i] || org[i] > self.bounds.hi[i] {
                return;
            }
        }

        if interval_max < 0.0 {
            // direction was zero on every axis
            interval_max = *max_dist;
        }
        if interval_min > interval_max {
            return;
        }
        interval_min = interval_min.max(0.0);
        interval_max = interval_max.min(*max_dist);

        // node word offsets for the near/far clip plane depending on the sign
        let mut offset_front = [0usize; 3];
        let mut offset_back = [0usize; 3];
        let mut offset_front3 = [0u32; 3];
        let mut offset_back3 = [0u32; 3];
        for i in 0..3 {
            let front = (dir[i].to_bits() >> 31) as usize;
            let back = front ^ 1;
            offset_front3[i] = front as u32 * 3;
            offset_back3[i] = back as u32 * 3;
            offset_front[i] = front + 1;
            offset_back[i] = back + 1;
        }

        let mut stack: Vec<StackNode> = Vec::with_capacity(MAX_STACK_SIZE);
        let mut node = 0usize;

        loop {
            loop {
                let Some(&tn) = self.tree.get(node) else {
                    return;
                };
                let axis = ((tn >> 30) & 3) as usize;
                let bvh2 = tn & BVH2_FLAG != 0;
                let offset = tn & OFFSET_MASK;

                if !bvh2 {
                    if axis < 3 {
                        let tf = (self.clip(node + offset_front[axis]) - org[axis]) * inv_dir[axis];
                        let tb = (self.clip(node + offset_back[axis]) - org[axis]) * inv_dir[axis];
                        // ray passes between the clip zones
                        if tf < interval_min && tb > interval_max {
                            break;
                        }
                        let back = (offset + offset_back3[axis]) as usize;
                        node = back;
                        // far node only
                        if tf < interval_min {
                            interval_min = if tb >= interval_min { tb } else { interval_min };
                            continue;
                        }
                        node = (offset + offset_front3[axis]) as usize;
                        // near node only
                        if tb > interval_max {
                            interval_max = if tf <= interval_max { tf } else { interval_max };
                            continue;
                        }
                        // both: visit the near node now, the far one later
                        stack.push(StackNode {
                            node: back,
                            tnear: if tb >= interval_min { tb } else { interval_min },
                            tfar: interval_max,
                        });
                        interval_max = if tf <= interval_max { tf } else { interval_max };
                        continue;
                    }

                    // leaf
                    let count = self.tree.get(node + 1).copied().unwrap_or(0);
                    for idx in offset..offset.saturating_add(count) {
                        let Some(&object) = self.objects.get(idx as usize) else {
                            break;
                        };
                        let hit = callback(ray, object, max_dist, stop_at_first);
                        if stop_at_first && hit {
                            return;
                        }
                    }
                    break;
                }

                if axis > 2 {
                    return;
                }
                let tf = (self.clip(node + offset_front[axis]) - org[axis]) * inv_dir[axis];
                let tb = (self.clip(node + offset_back[axis]) - org[axis]) * inv_dir[axis];
                node = offset as usize;
                interval_min = if tf >= interval_min { tf } else { interval_min };
                interval_max = if tb <= interval_max { tb } else { interval_max };
                if interval_min > interval_max {
                    break;
                }
            }

            // pop the next far node still in reach
            loop {
                let Some(entry) = stack.pop() else {
                    return;
                };
                interval_min = entry.tnear;
                if *max_dist < interval_min {
                    continue;
                }
                node = entry.node;
                interval_max = entry.tfar;
                break;
            }
        }
    }

    /// Visits every object whose node intervals contain `point`.
    pub fn intersect_point<F>(&self, point: Vec3, mut callback: F)
    where
        F: FnMut(Vec3, u32),
    {
        if !self.bounds.contains(point) {
            return;
        }

        let mut stack: Vec<usize> = Vec::with_capacity(MAX_STACK_SIZE);
        let mut node = 0usize;

        loop {
            loop {
                let Some(&tn) = self.tree.get(node) else {
                    return;
                };
                let axis = ((tn >> 30) & 3) as usize;
                let bvh2 = tn & BVH2_FLAG != 0;
                let offset = tn & OFFSET_MASK;

                if !bvh2 {
                    if axis < 3 {
                        let tl = self.clip(node + 1);
                        let tr = self.clip(node + 2);
                        // point between the clip zones
                        if tl < point[axis] && tr > point[axis] {
                            break;
                        }
                        let right = offset as usize + 3;
                        node = right;
                        if tl < point[axis] {
                            continue;
                        }
                        node = offset as usize;
                        if tr > point[axis] {
                            continue;
                        }
                        stack.push(right);
                        continue;
                    }

                    let count = self.tree.get(node + 1).copied().unwrap_or(0);
                    for idx in offset..offset.saturating_add(count) {
                        let Some(&object) = self.objects.get(idx as usize) else {
                            break;
                        };
                        callback(point, object);
                    }
                    break;
                }

                if axis > 2 {
                    return;
                }
                let tl = self.clip(node + 1);
                let tr = self.clip(node + 2);
                node = offset as usize;
                if tl > point[axis] || tr < point[axis] {
                    break;
                }
            }

            match stack.pop() {
                Some(next) => node = next,
                None => return,
            }
        }
    }

    fn clip(&self, index: usize) -> f32 {
        self.tree
            .get(index)
            .map(|bits| f32::from_bits(*bits))
            .unwrap_or(f32::NAN)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VmapError> {
        let bounds = read_aabox(reader)?;

        let tree_size = read_u32(reader)?;
        if tree_size > MAX_ELEMENTS {
            return Err(VmapError::format(format!("BIH tree too large: {}", tree_size)));
        }
        let mut tree = Vec::with_capacity(tree_size as usize);
        for _ in 0..tree_size {
            tree.push(read_u32(reader)?);
        }

        let count = read_u32(reader)?;
        if count > MAX_ELEMENTS {
            return Err(VmapError::format(format!("BIH object count too large: {}", count)));
        }
        let mut objects = Vec::with_capacity(count as usize);
        for _ in 0..count {
            objects.push(read_u32(reader)?);
        }

        if tree.len() < 3 {
            return Err(VmapError::format("BIH without root node"));
        }

        Ok(Self {
            bounds,
            tree,
            objects,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VmapError> {
        write_aabox(writer, &self.bounds)?;
        write_u32(writer, self.tree.len() as u32)?;
        for value in &self.tree {
            write_u32(writer, *value)?;
        }
        write_u32(writer, self.objects.len() as u32)?;
        for value in &self.objects {
            write_u32(writer, *value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn unit_box_at(x: f32, y: f32, z: f32) -> AaBox {
        let c = Vec3::new(x, y, z);
        AaBox::new(c - Vec3::splat(0.5), c + Vec3::splat(0.5))
    }

    fn row_of_boxes(count: usize) -> Vec<AaBox> {
        (0..count).map(|i| unit_box_at(i as f32 * 4.0, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_empty_tree() {
        let bih = Bih::build(&[], 3);
        assert_eq!(bih.prim_count(), 0);
        let mut visited = 0;
        bih.intersect_point(Vec3::ZERO, |_, _| visited += 1);
        let mut dist = 100.0;
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::X);
        bih.intersect_ray(&ray, |_, _, _, _| {
            visited += 1;
            false
        }, &mut dist, false);
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_point_query_finds_containing_box() {
        let boxes = row_of_boxes(10);
        let bih = Bih::build(&boxes, 1);
        assert_eq!(bih.prim_count(), 10);

        let mut hits = Vec::new();
        bih.intersect_point(Vec3::new(12.2, 0.1, -0.1), |p, idx| {
            if boxes[idx as usize].contains(p) {
                hits.push(idx);
            }
        });
        assert_eq!(hits, vec![3]);
    }

    #[test]
    fn test_ray_visits_every_box_on_its_path() {
        let boxes = row_of_boxes(12);
        let bih = Bih::build(&boxes, 3);

        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X);
        let mut dist = 1000.0;
        let mut seen = Vec::new();
        bih.intersect_ray(&ray, |r, idx, _, _| {
            if r.intersection_time(&boxes[idx as usize]).is_some() {
                seen.push(idx);
            }
            false
        }, &mut dist, false);
        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_ray_shrinking_distance_finds_nearest() {
        let boxes = row_of_boxes(16);
        let bih = Bih::build(&boxes, 1);

        let ray = Ray::new(Vec3::new(100.0, 0.0, 0.0), Vec3::NEG_X);
        let mut dist = 1000.0;
        let mut nearest = None;
        bih.intersect_ray(&ray, |r, idx, max_dist, _| match r.intersection_time(&boxes[idx as usize]) {
            Some(t) if t < *max_dist => {
                *max_dist = t;
                nearest = Some(idx);
                true
            }
            _ => false,
        }, &mut dist, false);
        assert_eq!(nearest, Some(15));
        assert!((dist - (100.0 - 60.5)).abs() < 1e-3);
    }

    #[test]
    fn test_ray_out_of_range() {
        let boxes = row_of_boxes(4);
        let bih = Bih::build(&boxes, 3);
        let ray = Ray::new(Vec3::new(-50.0, 0.0, 0.0), Vec3::X);
        let mut dist = 10.0;
        let mut visited = false;
        bih.intersect_ray(&ray, |_, _, _, _| {
            visited = true;
            false
        }, &mut dist, false);
        assert!(!visited);
    }

    #[test]
    fn test_serialization_keeps_queries_working() {
        let boxes = row_of_boxes(7);
        let bih = Bih::build(&boxes, 1);
        let mut buf = Vec::new();
        bih.write_to(&mut buf).unwrap();
        let restored = Bih::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(restored.prim_count(), 7);

        let mut hits = Vec::new();
        restored.intersect_point(Vec3::new(24.0, 0.0, 0.0), |p, idx| {
            if boxes[idx as usize].contains(p) {
                hits.push(idx);
            }
        });
        assert_eq!(hits, vec![6]);
    }
}
