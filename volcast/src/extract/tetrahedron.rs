//! Scan conversion of a single tetrahedron
use super::topology::Tet;
use crate::screen::Screen;
use nalgebra::{Matrix3, Point3, Vector3};
use std::ops::Range;

/// Slack on barycentric coordinates when testing whether a sample is inside
///
/// Samples lying exactly on a shared face are claimed by both neighbors (and
/// settled by arbitration) rather than dropped by both.
const INSIDE_EPSILON: f32 = 1e-5;

/// Relative volume below which a tetrahedron is considered flat
const DEGENERATE_VOLUME: f32 = 1e-7;

/// A non-degenerate tetrahedron in normalized screen space
pub(crate) struct Tetrahedron {
    verts: Tet,
    p0: Point3<f32>,
    inv: Matrix3<f32>,
    points: [Point3<f32>; 4],
}

impl Tetrahedron {
    /// Prepares a tetrahedron for scan conversion
    ///
    /// Returns `None` if the tetrahedron is degenerate (i.e. its volume is
    /// negligible relative to its size) or has non-finite vertices.
    pub(crate) fn new(points: &[Point3<f32>], verts: Tet) -> Option<Self> {
        let points = verts.map(|i| points[i]);
        let p0 = points[0];
        let m = Matrix3::from_columns(&[
            points[1] - p0,
            points[2] - p0,
            points[3] - p0,
        ]);
        let mut longest = 0f32;
        for i in 0..4 {
            for j in i + 1..4 {
                longest = longest.max((points[i] - points[j]).norm());
            }
        }
        let det = m.determinant();
        if !(det.abs() > DEGENERATE_VOLUME * longest.powi(3)) {
            return None;
        }
        let inv = m.try_inverse()?;
        Some(Self {
            verts,
            p0,
            inv,
            points,
        })
    }

    /// Returns the cell vertex indices of this tetrahedron
    pub(crate) fn verts(&self) -> &Tet {
        &self.verts
    }

    /// Calls `f(x, y, z, weights)` for every sample center inside the
    /// tetrahedron on the given scanlines
    ///
    /// `weights` are the sample's barycentric coordinates, which are clamped
    /// to be non-negative and sum to 1.  Samples are visited in row-major
    /// order, front to back along each ray.
    pub(crate) fn rasterize<F>(
        &self,
        screen: &Screen,
        rows: Range<usize>,
        mut f: F,
    ) where
        F: FnMut(usize, usize, usize, [f32; 4]),
    {
        let Some(bounds) = screen.bounds_of(&self.points) else {
            return;
        };
        let y_range = (bounds.y_min as usize).max(rows.start)
            ..(bounds.y_max as usize + 1).min(rows.end);

        // Along a ray, each barycentric coordinate is affine in z
        let dz = self.inv.column(2).into_owned();
        let slope = [-dz.sum(), dz.x, dz.y, dz.z];

        for y in y_range {
            let py = screen.y_center(y);
            for x in bounds.columns() {
                let px = screen.x_center(x);
                let q = self.inv
                    * Vector3::new(px - self.p0.x, py - self.p0.y, -self.p0.z);
                let offset = [1.0 - q.sum(), q.x, q.y, q.z];

                let mut lo = f32::NEG_INFINITY;
                let mut hi = f32::INFINITY;
                for (a, b) in offset.iter().zip(&slope) {
                    // Solve a + b * z >= -epsilon
                    if b.abs() <= f32::EPSILON {
                        if *a < -INSIDE_EPSILON {
                            lo = f32::INFINITY;
                        }
                    } else if *b > 0.0 {
                        lo = lo.max((-INSIDE_EPSILON - a) / b);
                    } else {
                        hi = hi.min((-INSIDE_EPSILON - a) / b);
                    }
                }
                let Some((z0, z1)) = screen.depth_range(lo, hi) else {
                    continue;
                };
                let z0 = z0.max(bounds.z_min) as usize;
                let z1 = z1.min(bounds.z_max) as usize;
                for z in z0..=z1 {
                    let pz = screen.z_center(z);
                    let mut w: [f32; 4] = std::array::from_fn(|i| {
                        (offset[i] + slope[i] * pz).max(0.0)
                    });
                    let sum: f32 = w.iter().sum();
                    if sum > 0.0 {
                        w.iter_mut().for_each(|w| *w /= sum);
                        f(x, y, z, w);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn corner_tet() -> [Point3<f32>; 4] {
        [
            Point3::new(-0.9, -0.9, -0.9),
            Point3::new(0.9, -0.9, -0.9),
            Point3::new(-0.9, 0.9, -0.9),
            Point3::new(-0.9, -0.9, 0.9),
        ]
    }

    #[test]
    fn degenerate() {
        let mut pts = corner_tet();
        pts[3] = Point3::new(0.0, 0.0, -0.9);
        assert!(Tetrahedron::new(&pts, [0, 1, 2, 3]).is_none());

        pts[3] = Point3::new(f32::NAN, 0.0, 0.0);
        assert!(Tetrahedron::new(&pts, [0, 1, 2, 3]).is_none());

        assert!(Tetrahedron::new(&corner_tet(), [0, 1, 2, 3]).is_some());
    }

    #[test]
    fn samples_are_inside() {
        let pts = corner_tet();
        let t = Tetrahedron::new(&pts, [0, 1, 2, 3]).unwrap();
        let screen = Screen::new(16, 16, 16);
        let mut count = 0;
        t.rasterize(&screen, 0..16, |x, y, z, w| {
            let (px, py, pz) =
                (screen.x_center(x), screen.y_center(y), screen.z_center(z));
            // Inside the corner tetrahedron, coordinates sum below a plane
            assert!(px + py + pz <= -0.9 + 1e-3, "{px} {py} {pz}");
            assert_relative_eq!(w.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
            let p = pts
                .iter()
                .zip(w)
                .fold(Vector3::zeros(), |acc, (p, w)| acc + p.coords * w);
            assert_relative_eq!(p, Vector3::new(px, py, pz), epsilon = 1e-4);
            count += 1;
        });
        // Tetrahedron volume divided by the volume of one sample bin
        let expected = 1.8f32.powi(3) / 6.0 / (2.0f32 / 16.0).powi(3);
        assert!(
            (count as f32 - expected).abs() < expected * 0.25,
            "{count} vs {expected}"
        );
    }

    #[test]
    fn rows_are_respected() {
        let t = Tetrahedron::new(&corner_tet(), [0, 1, 2, 3]).unwrap();
        let screen = Screen::new(16, 16, 16);
        t.rasterize(&screen, 13..15, |_x, y, _z, _w| {
            assert!((13..15).contains(&y));
        });
        let mut hit = false;
        t.rasterize(&screen, 14..16, |_, _, _, _| hit = true);
        assert!(hit);

        // The bottom scanline's center is below the tetrahedron
        hit = false;
        t.rasterize(&screen, 15..16, |_, _, _, _| hit = true);
        assert!(!hit);
        hit = false;
        t.rasterize(&screen, 0..0, |_, _, _, _| hit = true);
        assert!(!hit);
    }

    #[test]
    fn outside_cube_is_clipped() {
        // Inside satisfies x + y + z <= -1, with vertices far outside the cube
        let pts = [
            Point3::new(-3.0, -3.0, -3.0),
            Point3::new(5.0, -3.0, -3.0),
            Point3::new(-3.0, 5.0, -3.0),
            Point3::new(-3.0, -3.0, 5.0),
        ];
        let t = Tetrahedron::new(&pts, [0, 1, 2, 3]).unwrap();
        let screen = Screen::new(4, 4, 4);
        let mut count = 0;
        t.rasterize(&screen, 0..4, |x, y, z, _| {
            assert!(x < 4 && y < 4 && z < 4);
            let sum =
                screen.x_center(x) + screen.y_center(y) + screen.z_center(z);
            assert!(sum <= -1.0 + 1e-3, "{sum}");
            count += 1;
        });
        assert!(count > 0);
    }
}
