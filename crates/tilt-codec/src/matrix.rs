//! 3x3 homogeneous matrices for 2D affine transforms.

use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A 2D affine transform stored as a row-major 3x3 homogeneous matrix.
///
/// The last row is `[0, 0, 1]` for every matrix produced by this crate, but it
/// is kept explicitly so products stay plain matrix multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix3(pub [[f64; 3]; 3]);

impl Matrix3 {
    pub const IDENTITY: Matrix3 = Matrix3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self(rows)
    }

    /// Build a matrix from the six IMOD xf coefficients.
    pub fn from_affine(a11: f64, a12: f64, a21: f64, a22: f64, dx: f64, dy: f64) -> Self {
        Self([[a11, a12, dx], [a21, a22, dy], [0.0, 0.0, 1.0]])
    }

    /// Counter-clockwise rotation by `degrees` around the origin.
    pub fn rotation(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::from_affine(cos, -sin, sin, cos, 0.0, 0.0)
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self::from_affine(1.0, 0.0, 0.0, 1.0, dx, dy)
    }

    /// The six xf coefficients `a11 a12 a21 a22 dx dy`.
    pub fn to_affine(&self) -> [f64; 6] {
        let m = &self.0;
        [m[0][0], m[0][1], m[1][0], m[1][1], m[0][2], m[1][2]]
    }

    pub fn rows(&self) -> &[[f64; 3]; 3] {
        &self.0
    }

    /// Whether the bottom row is the homogeneous `[0, 0, 1]`.
    pub fn is_affine(&self) -> bool {
        self.0[2] == [0.0, 0.0, 1.0]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Element-wise comparison within `epsilon`.
    pub fn approx_eq(&self, other: &Matrix3, epsilon: f64) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Matrix3 {
    type Output = Matrix3;

    fn mul(self, rhs: Matrix3) -> Matrix3 {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Matrix3(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_neutral() {
        let r = Matrix3::rotation(30.0);
        assert_eq!(Matrix3::IDENTITY * r, r);
        assert_eq!(r * Matrix3::IDENTITY, r);
    }

    #[test]
    fn test_affine_round_trip() {
        let m = Matrix3::from_affine(0.9, -0.1, 0.1, 0.9, 12.5, -3.0);
        assert_eq!(m.to_affine(), [0.9, -0.1, 0.1, 0.9, 12.5, -3.0]);
        assert!(m.is_affine());
    }

    #[test]
    fn test_rotation_and_translation_do_not_commute() {
        let r = Matrix3::rotation(90.0);
        let t = Matrix3::translation(5.0, 0.0);
        assert!(!(r * t).approx_eq(&(t * r), 1e-9));
    }

    #[test]
    fn test_rotations_compose() {
        let composed = Matrix3::rotation(30.0) * Matrix3::rotation(60.0);
        assert!(composed.approx_eq(&Matrix3::rotation(90.0), 1e-12));
    }
}
