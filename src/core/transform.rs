//! Parent-Local Transforms
//!
//! Position, rotation and scale of a replicated entity, expressed relative to
//! its parent (or the world when it has none). Change detection compares raw
//! float bits, so `-0.0` vs `0.0` and NaN payloads count as changes.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position, rotation and scale in parent-local space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Local position
    pub position: Vec3,
    /// Local rotation
    pub rotation: Quat,
    /// Local scale
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a transform from its parts.
    pub const fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Identity transform moved to `position`.
    pub const fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    /// Bit-for-bit equality of every component.
    pub fn bit_eq(&self, other: &Self) -> bool {
        let a = self.to_bits();
        let b = other.to_bits();
        a == b
    }

    fn to_bits(self) -> [u32; 10] {
        let p = self.position;
        let r = self.rotation;
        let s = self.scale;
        [
            p.x.to_bits(),
            p.y.to_bits(),
            p.z.to_bits(),
            r.x.to_bits(),
            r.y.to_bits(),
            r.z.to_bits(),
            r.w.to_bits(),
            s.x.to_bits(),
            s.y.to_bits(),
            s.z.to_bits(),
        ]
    }

    /// Lerp position and scale, slerp rotation.
    pub fn interpolate(&self, to: &Self, t: f32) -> Self {
        Self {
            position: self.position.lerp(to.position, t),
            rotation: self.rotation.slerp(to.rotation, t),
            scale: self.scale.lerp(to.scale, t),
        }
    }

    /// Compose a child's local transform under this one.
    pub fn mul_transform(&self, child: &Self) -> Self {
        Self {
            position: self.position + self.rotation * (self.scale * child.position),
            rotation: self.rotation * child.rotation,
            scale: self.scale * child.scale,
        }
    }

    /// Local +Z axis.
    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// Local +X axis.
    #[inline]
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

/// Measured divergence between two transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Desync {
    /// Euclidean position distance
    pub position: f32,
    /// Rotation angle between the two orientations, in degrees
    pub rotation_degrees: f32,
    /// Euclidean scale distance
    pub scale: f32,
}

impl Desync {
    /// Divergence of `actual` from `expected`.
    pub fn between(expected: &Transform, actual: &Transform) -> Self {
        Self {
            position: expected.position.distance(actual.position),
            rotation_degrees: angle_between_degrees(expected.rotation, actual.rotation),
            scale: expected.scale.distance(actual.scale),
        }
    }

    /// True if every component is at or below `epsilon`.
    pub fn within(&self, epsilon: f32) -> bool {
        self.position <= epsilon && self.rotation_degrees <= epsilon && self.scale <= epsilon
    }
}

/// Shortest angle between two orientations. Identical inputs give exactly zero.
pub fn angle_between_degrees(a: Quat, b: Quat) -> f32 {
    let delta = a.conjugate() * b;
    let sin_half = delta.xyz().length();
    (2.0 * sin_half.atan2(delta.w.abs())).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_eq_detects_signed_zero() {
        let a = Transform::from_position(Vec3::new(0.0, 1.0, 2.0));
        let mut b = a;
        assert!(a.bit_eq(&b));

        b.position.x = -0.0;
        assert_eq!(a, b);
        assert!(!a.bit_eq(&b));
    }

    #[test]
    fn test_interpolate_endpoints() {
        let a = Transform::from_position(Vec3::ZERO);
        let b = Transform::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_rotation_y(1.0),
            Vec3::splat(3.0),
        );

        let mid = a.interpolate(&b, 0.5);
        assert!((mid.position.x - 5.0).abs() < 1e-6);
        assert!((mid.scale.x - 2.0).abs() < 1e-6);
        assert!((angle_between_degrees(mid.rotation, Quat::from_rotation_y(0.5))) < 1e-2);
    }

    #[test]
    fn test_mul_transform_composes_parent() {
        let parent = Transform::new(
            Vec3::new(1.0, 0.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::splat(2.0),
        );
        let child = Transform::from_position(Vec3::new(0.0, 0.0, 1.0));
        let world = parent.mul_transform(&child);

        assert!((world.position - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(world.scale, Vec3::splat(2.0));
    }

    #[test]
    fn test_desync_between() {
        let a = Transform::IDENTITY;
        let b = Transform::new(
            Vec3::new(3.0, 4.0, 0.0),
            Quat::from_rotation_x(90f32.to_radians()),
            Vec3::ONE,
        );

        let d = Desync::between(&a, &b);
        assert!((d.position - 5.0).abs() < 1e-6);
        assert!((d.rotation_degrees - 90.0).abs() < 1e-3);
        assert_eq!(d.scale, 0.0);
        assert!(Desync::between(&a, &a).within(1e-6));
    }
}
