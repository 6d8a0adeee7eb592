//! Collision Probing
//!
//! Static geometry for the movement sweep. Shapes are tested against a ray
//! after Minkowski-expanding them by the mover's radius: spheres grow by the
//! radius exactly, boxes grow into a larger box (slightly conservative at the
//! corners). Both sides of a predicted entity must hold identical geometry.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Layer bit for level geometry.
pub const LAYER_WORLD: u32 = 1 << 0;

/// Layer bit for props.
pub const LAYER_PROPS: u32 = 1 << 1;

/// Every layer.
pub const LAYER_ALL: u32 = u32::MAX;

/// Collider geometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Axis-aligned box
    Box {
        /// Minimum corner
        min: Vec3,
        /// Maximum corner
        max: Vec3,
    },
    /// Sphere
    Sphere {
        /// Centre
        center: Vec3,
        /// Radius
        radius: f32,
    },
}

/// A static collider with its layer bits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    /// Geometry
    pub shape: Shape,
    /// Layer membership
    pub layers: u32,
}

/// First obstruction along a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit {
    /// Distance along the direction
    pub distance: f32,
    /// Index of the collider hit
    pub collider: usize,
}

/// Static collision geometry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionWorld {
    colliders: Vec<Collider>,
}

impl CollisionWorld {
    /// Empty world; sweeps never hit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis-aligned box.
    pub fn add_box(&mut self, min: Vec3, max: Vec3, layers: u32) -> usize {
        self.push(Shape::Box {
            min: min.min(max),
            max: min.max(max),
        }, layers)
    }

    /// Add a sphere.
    pub fn add_sphere(&mut self, center: Vec3, radius: f32, layers: u32) -> usize {
        self.push(Shape::Sphere {
            center,
            radius: radius.abs(),
        }, layers)
    }

    fn push(&mut self, shape: Shape, layers: u32) -> usize {
        self.colliders.push(Collider { shape, layers });
        self.colliders.len() - 1
    }

    /// Collider count.
    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    /// True if there is nothing to hit.
    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    /// Sweep a sphere of `radius` from `origin` along unit `direction` for
    /// at most `max_distance`, considering colliders sharing a bit with
    /// `mask`. Returns the nearest hit; ties go to the lower index.
    pub fn sweep_sphere(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        radius: f32,
        mask: u32,
    ) -> Option<SweepHit> {
        if max_distance <= 0.0 || direction == Vec3::ZERO {
            return None;
        }

        let mut best: Option<SweepHit> = None;
        for (index, collider) in self.colliders.iter().enumerate() {
            if collider.layers & mask == 0 {
                continue;
            }
            let hit = match collider.shape {
                Shape::Sphere { center, radius: r } => ray_sphere(origin, direction, center, r + radius),
                Shape::Box { min, max } => {
                    ray_box(origin, direction, min - Vec3::splat(radius), max + Vec3::splat(radius))
                }
            };
            let Some(distance) = hit else {
                continue;
            };
            if distance > max_distance {
                continue;
            }
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(SweepHit {
                    distance,
                    collider: index,
                });
            }
        }
        best
    }
}

/// Entry distance of a ray into a sphere. Starting inside is a hit at 0.
fn ray_sphere(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let offset = origin - center;
    let c = offset.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let b = offset.dot(direction);
    if b > 0.0 {
        return None;
    }
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    Some((-b - discriminant.sqrt()).max(0.0))
}

/// Slab test. Starting inside is a hit at 0.
fn ray_box(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let mut t_min = 0.0_f32;
    let mut t_max = f32::INFINITY;

    for axis in 0..3 {
        let o = origin[axis];
        let d = direction[axis];
        if d.abs() < f32::EPSILON {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let (near, far) = {
            let a = (min[axis] - o) * inv;
            let b = (max[axis] - o) * inv;
            if a < b { (a, b) } else { (b, a) }
        };
        t_min = t_min.max(near);
        t_max = t_max.min(far);
        if t_min > t_max {
            return None;
        }
    }
    Some(t_min)
}
