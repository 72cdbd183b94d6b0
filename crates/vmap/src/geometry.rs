// Geometry primitives: boxes, rays and triangle tests

use glam::{Mat3, Vec3};

/// Axis aligned bounding box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AaBox {
    pub lo: Vec3,
    pub hi: Vec3,
}

impl AaBox {
    pub const ZERO: AaBox = AaBox {
        lo: Vec3::ZERO,
        hi: Vec3::ZERO,
    };

    pub fn new(lo: Vec3, hi: Vec3) -> Self {
        Self { lo, hi }
    }

    pub fn from_point(p: Vec3) -> Self {
        Self { lo: p, hi: p }
    }

    pub fn merge(&mut self, p: Vec3) {
        self.lo = self.lo.min(p);
        self.hi = self.hi.max(p);
    }

    pub fn merge_box(&mut self, other: &AaBox) {
        self.merge(other.lo);
        self.merge(other.hi);
    }

    pub fn translated(self, offset: Vec3) -> Self {
        Self {
            lo: self.lo + offset,
            hi: self.hi + offset,
        }
    }

    pub fn scaled(self, scale: f32) -> Self {
        Self {
            lo: self.lo * scale,
            hi: self.hi * scale,
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.lo).all() && p.cmple(self.hi).all()
    }

    /// Corner `i` of 0..8, bit 0 selects x, bit 1 y, bit 2 z.
    pub fn corner(&self, i: usize) -> Vec3 {
        Vec3::new(
            if i & 1 == 0 { self.lo.x } else { self.hi.x },
            if i & 2 == 0 { self.lo.y } else { self.hi.y },
            if i & 4 == 0 { self.lo.z } else { self.hi.z },
        )
    }

    /// Bound of this box after rotating it, built from its eight corners.
    pub fn rotated(&self, rotation: Mat3) -> Self {
        let mut result = AaBox::from_point(rotation * self.corner(0));
        for i in 1..8 {
            result.merge(rotation * self.corner(i));
        }
        result
    }

    pub fn is_nan(&self) -> bool {
        self.lo.is_nan() || self.hi.is_nan()
    }
}

/// Half line with a unit direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn point_at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }

    /// Distance along the ray to the first point inside `bound`, zero when
    /// the origin already is inside, `None` when the ray misses.
    pub fn intersection_time(&self, bound: &AaBox) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = self.origin[axis];
            let dir = self.direction[axis];
            let lo = bound.lo[axis];
            let hi = bound.hi[axis];
            if dir == 0.0 {
                if origin < lo || origin > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t1 = (lo - origin) * inv;
            let mut t2 = (hi - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshTriangle {
    pub idx0: u32,
    pub idx1: u32,
    pub idx2: u32,
}

impl MeshTriangle {
    pub fn new(idx0: u32, idx1: u32, idx2: u32) -> Self {
        Self { idx0, idx1, idx2 }
    }

    pub fn bound(&self, vertices: &[Vec3]) -> AaBox {
        let mut bound: Option<AaBox> = None;
        for idx in [self.idx0, self.idx1, self.idx2] {
            if let Some(v) = vertices.get(idx as usize) {
                match bound.as_mut() {
                    Some(current) => current.merge(*v),
                    None => bound = Some(AaBox::from_point(*v)),
                }
            }
        }
        bound.unwrap_or_default()
    }
}

const TRIANGLE_EPS: f32 = 1e-5;

/// Two sided ray/triangle test; on a hit closer than `distance` the
/// distance is updated and `true` returned.
pub fn intersect_triangle(
    tri: &MeshTriangle,
    vertices: &[Vec3],
    ray: &Ray,
    distance: &mut f32,
) -> bool {
    let (Some(&p0), Some(&p1), Some(&p2)) = (
        vertices.get(tri.idx0 as usize),
        vertices.get(tri.idx1 as usize),
        vertices.get(tri.idx2 as usize),
    ) else {
        return false;
    };

    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let p = ray.direction.cross(e2);
    let a = e1.dot(p);
    if a.abs() < TRIANGLE_EPS {
        // ray parallel to the triangle plane
        return false;
    }

    let f = 1.0 / a;
    let s = ray.origin - p0;
    let u = f * s.dot(p);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }

    let q = s.cross(e1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }

    let t = f * e2.dot(q);
    if t > 0.0 && t < *distance {
        *distance = t;
        return true;
    }
    false
}
