use crate::{Error, Result};
use nalgebra::{Matrix3, Point2, Vector3};

/// Smallest accepted ratio between the smallest and largest singular value.
const MIN_CONDITION_RATIO: f64 = 1e-12;

/// Planar projective transform mapping source pixels into a destination frame.
///
/// Always non-singular, and normalised so that `h22 == 1` whenever that entry
/// is not vanishingly small.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn new(matrix: Matrix3<f64>) -> Result<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput("homography has non-finite entries".into()));
        }

        let normalised = if matrix[(2, 2)].abs() > 1e-12 {
            matrix / matrix[(2, 2)]
        } else {
            let norm = matrix.norm();
            if norm <= f64::EPSILON {
                return Err(Error::SingularMatrix("zero homography".into()));
            }
            matrix / norm
        };

        let sv = normalised.singular_values();
        let (min, max) = (sv.min(), sv.max());
        if max <= 0.0 || min / max < MIN_CONDITION_RATIO {
            return Err(Error::SingularMatrix(format!(
                "condition ratio {:.3e} below {:.0e}",
                if max > 0.0 { min / max } else { 0.0 },
                MIN_CONDITION_RATIO
            )));
        }

        Ok(Self { matrix: normalised })
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Maps a point, or `None` when it lands on the line at infinity.
    pub fn transform_point(&self, x: f64, y: f64) -> Option<Point2<f64>> {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        if p[2].abs() > 1e-12 {
            Some(Point2::new(p[0] / p[2], p[1] / p[2]))
        } else {
            None
        }
    }

    pub fn inverse(&self) -> Result<Self> {
        let inv = self
            .matrix
            .try_inverse()
            .ok_or_else(|| Error::SingularMatrix("homography is not invertible".into()))?;
        Self::new(inv)
    }

    /// Shifts the destination frame by `(dx, dy)`.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        let shifted = Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0) * self.matrix;
        Self { matrix: shifted }
    }

    /// Images of the four corners of a `width x height` source, clockwise
    /// from the origin. `None` if any corner maps to infinity.
    pub fn project_corners(&self, width: u32, height: u32) -> Option<[Point2<f64>; 4]> {
        let (w, h) = (width as f64, height as f64);
        Some([
            self.transform_point(0.0, 0.0)?,
            self.transform_point(w, 0.0)?,
            self.transform_point(w, h)?,
            self.transform_point(0.0, h)?,
        ])
    }

    /// The translation part when the transform is a pure shift.
    pub fn as_translation(&self, tolerance: f64) -> Option<(f64, f64)> {
        let m = &self.matrix;
        let linear_is_identity = (m[(0, 0)] - 1.0).abs() <= tolerance
            && m[(0, 1)].abs() <= tolerance
            && m[(1, 0)].abs() <= tolerance
            && (m[(1, 1)] - 1.0).abs() <= tolerance
            && m[(2, 0)].abs() <= tolerance
            && m[(2, 1)].abs() <= tolerance;
        linear_is_identity.then(|| (m[(0, 2)], m[(1, 2)]))
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_scale() {
        let h = Homography::new(Matrix3::new(2.0, 0.0, 20.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0)).unwrap();
        assert_eq!(h.matrix()[(2, 2)], 1.0);
        let p = h.transform_point(1.0, 1.0).unwrap();
        assert!((p.x - 11.0).abs() < 1e-12);
        assert!((p.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_singular_matrices() {
        let rank_one = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 1.0, 2.0, 3.0);
        assert!(matches!(Homography::new(rank_one), Err(Error::SingularMatrix(_))));
        assert!(Homography::new(Matrix3::zeros()).is_err());
        let mut nan = Matrix3::identity();
        nan[(0, 1)] = f64::NAN;
        assert!(matches!(Homography::new(nan), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = Homography::new(Matrix3::new(
            1.02, 0.01, 14.0, -0.02, 0.98, -3.0, 1e-5, -2e-5, 1.0,
        ))
        .unwrap();
        let inv = h.inverse().unwrap();
        let p = h.transform_point(37.0, 81.0).unwrap();
        let back = inv.transform_point(p.x, p.y).unwrap();
        assert!((back.x - 37.0).abs() < 1e-9);
        assert!((back.y - 81.0).abs() < 1e-9);
    }

    #[test]
    fn translated_shifts_destination() {
        let h = Homography::translation(50.0, 0.0).translated(10.0, 5.0);
        assert_eq!(h.as_translation(1e-12), Some((60.0, 5.0)));
    }

    #[test]
    fn corners_of_translation() {
        let corners = Homography::translation(5.0, -2.0).project_corners(10, 4).unwrap();
        assert_eq!(corners[0], Point2::new(5.0, -2.0));
        assert_eq!(corners[2], Point2::new(15.0, 2.0));
    }
}
