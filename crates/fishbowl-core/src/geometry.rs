//! Toroidal geometry helpers shared by perception, movement, and feeding.
//!
//! All functions are pure; the world never stores derived geometry.

/// Axis-aligned 2D position in world units.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Smallest vector modulus used when normalizing near-zero vectors.
const MIN_MODULUS: f64 = 1e-5;

/// Normalize a coordinate into `[0, extent)` by modular wraparound.
#[must_use]
pub fn wrap_coordinate(value: f64, extent: f64) -> f64 {
    if extent <= 0.0 {
        return 0.0;
    }
    let mut v = value % extent;
    if v < 0.0 {
        v += extent;
    }
    v
}

/// Signed shortest offset from `from` to `to` on a wrapped axis of `extent`.
#[must_use]
pub fn torus_delta(from: f64, to: f64, extent: f64) -> f64 {
    let mut delta = to - from;
    let half = extent * 0.5;
    if delta > half {
        delta -= extent;
    } else if delta < -half {
        delta += extent;
    }
    delta
}

/// Squared shortest (wrapped) distance between two points.
#[must_use]
pub fn torus_distance_sq(a: Position, b: Position, width: f64, height: f64) -> f64 {
    let dx = torus_delta(a.x, b.x, width);
    let dy = torus_delta(a.y, b.y, height);
    dx * dx + dy * dy
}

/// Shortest (wrapped) distance between two points.
#[must_use]
pub fn torus_distance(a: Position, b: Position, width: f64, height: f64) -> f64 {
    torus_distance_sq(a, b, width, height).sqrt()
}

/// Unit direction vector for a heading angle (0 points along +x).
#[must_use]
pub fn heading_vector(angle: f64) -> (f64, f64) {
    (angle.cos(), angle.sin())
}

/// Euclidean modulus of a vector.
#[must_use]
pub fn modulus(vx: f64, vy: f64) -> f64 {
    (vx * vx + vy * vy).sqrt()
}

/// Cosine of the angle between two vectors. Near-zero moduli are floored
/// so degenerate vectors yield a finite result instead of NaN.
#[must_use]
pub fn cos_between(v1x: f64, v1y: f64, v2x: f64, v2y: f64) -> f64 {
    let m1 = modulus(v1x, v1y).max(MIN_MODULUS);
    let m2 = modulus(v2x, v2y).max(MIN_MODULUS);
    (v1x * v2x + v1y * v2y) / (m1 * m2)
}

/// Pseudo-scalar (cross) product; its sign discriminates left from right.
#[must_use]
pub fn cross(v1x: f64, v1y: f64, v2x: f64, v2y: f64) -> f64 {
    v1x * v2y - v1y * v2x
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-10;

    #[test]
    fn wrap_keeps_values_in_range() {
        assert!((wrap_coordinate(5.0, 10.0) - 5.0).abs() < EPS);
        assert!((wrap_coordinate(-1.0, 10.0) - 9.0).abs() < EPS);
        assert!((wrap_coordinate(10.0, 10.0) - 0.0).abs() < EPS);
        assert!((wrap_coordinate(23.5, 10.0) - 3.5).abs() < EPS);
        assert!(wrap_coordinate(f64::NAN, 10.0).is_nan());
    }

    #[test]
    fn torus_delta_crosses_the_seam() {
        assert!((torus_delta(1.0, 9.0, 10.0) - (-2.0)).abs() < EPS);
        assert!((torus_delta(9.0, 1.0, 10.0) - 2.0).abs() < EPS);
        assert!((torus_delta(2.0, 5.0, 10.0) - 3.0).abs() < EPS);
    }

    #[test]
    fn torus_distance_shorter_across_boundary() {
        let a = Position::new(199.0, 0.0);
        let b = Position::new(1.0, 0.0);
        assert!((torus_distance(a, b, 200.0, 200.0) - 2.0).abs() < EPS);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        let c = cos_between(0.0, 0.0, 1.0, 0.0);
        assert!(c.is_finite());
        assert!((cos_between(1.0, 0.0, 1.0, 0.0) - 1.0).abs() < EPS);
        assert!((cos_between(1.0, 0.0, 0.0, 1.0)).abs() < EPS);
    }

    #[test]
    fn cross_sign_discriminates_sides() {
        assert!(cross(1.0, 0.0, 0.0, 1.0) > 0.0);
        assert!(cross(1.0, 0.0, 0.0, -1.0) < 0.0);
    }
}
