//! Per-topology strategy tables
//!
//! Each [`CellKind`] provides parametric corner coordinates, shape functions,
//! a parametric domain clamp, and a decomposition into tetrahedra.  The
//! extractor only ever rasterizes tetrahedra; these tables are what make a
//! hexahedron sample like a hexahedron.
use crate::cell::CellKind;
use arrayvec::ArrayVec;
use nalgebra::{Point3, Vector3};

/// A tetrahedron, as four indices into a cell's vertex list
pub(crate) type Tet = [usize; 4];

const TET_CORNERS: [[f32; 3]; 4] =
    [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

const HEX_CORNERS: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
];

const WEDGE_CORNERS: [[f32; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
];

const PYRAMID_CORNERS: [[f32; 3]; 5] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.5, 0.5, 1.0],
];

/// Main diagonals of a hexahedron, as `(from, to)` vertex pairs
const HEX_DIAGONALS: [(usize, usize); 4] = [(0, 6), (1, 7), (2, 4), (3, 5)];

/// Six tetrahedra fanned around each main diagonal
///
/// Row `d` splits the hexahedron around `HEX_DIAGONALS[d]`; every tetrahedron
/// contains both ends of the diagonal plus one edge of the hexagon of
/// remaining vertices.
const HEX_TETS: [[Tet; 6]; 4] = [
    [
        [0, 1, 2, 6],
        [0, 2, 3, 6],
        [0, 3, 7, 6],
        [0, 7, 4, 6],
        [0, 4, 5, 6],
        [0, 5, 1, 6],
    ],
    [
        [1, 2, 3, 7],
        [1, 3, 0, 7],
        [1, 0, 4, 7],
        [1, 4, 5, 7],
        [1, 5, 6, 7],
        [1, 6, 2, 7],
    ],
    [
        [2, 3, 0, 4],
        [2, 0, 1, 4],
        [2, 1, 5, 4],
        [2, 5, 6, 4],
        [2, 6, 7, 4],
        [2, 7, 3, 4],
    ],
    [
        [3, 0, 1, 5],
        [3, 1, 2, 5],
        [3, 2, 6, 5],
        [3, 6, 7, 5],
        [3, 7, 4, 5],
        [3, 4, 0, 5],
    ],
];

const WEDGE_TETS: [Tet; 3] = [[0, 1, 2, 3], [1, 2, 3, 4], [2, 3, 4, 5]];

/// Pyramid splits, indexed by which base diagonal (0-2 or 1-3) is used
const PYRAMID_TETS: [[Tet; 2]; 2] =
    [[[0, 1, 2, 4], [0, 2, 3, 4]], [[1, 2, 3, 4], [1, 3, 0, 4]]];

/// Squared screen-space (XY) distance between two points
fn screen_dist2(a: &Point3<f32>, b: &Point3<f32>) -> f32 {
    (a.xy() - b.xy()).norm_squared()
}

impl CellKind {
    /// Returns parametric coordinates of each vertex
    pub(crate) fn corners(self) -> &'static [[f32; 3]] {
        match self {
            CellKind::Tetrahedron => &TET_CORNERS,
            CellKind::Hexahedron => &HEX_CORNERS,
            CellKind::Wedge => &WEDGE_CORNERS,
            CellKind::Pyramid => &PYRAMID_CORNERS,
        }
    }

    /// Decomposes a cell into tetrahedra
    ///
    /// The split depends on the cell's screen-space shape: hexahedra fan
    /// around their shortest main diagonal and pyramids split along their
    /// shorter base diagonal, which keeps the tetrahedra well-shaped along the
    /// rays.  Ties pick the lowest-numbered diagonal, so the choice is
    /// deterministic.
    pub(crate) fn tetrahedra(
        self,
        points: &[Point3<f32>],
    ) -> ArrayVec<Tet, 6> {
        let mut out = ArrayVec::new();
        match self {
            CellKind::Tetrahedron => out.push([0, 1, 2, 3]),
            CellKind::Hexahedron => {
                let mut best = 0;
                let mut best_d = f32::INFINITY;
                for (i, (a, b)) in HEX_DIAGONALS.iter().enumerate() {
                    let d = screen_dist2(&points[*a], &points[*b]);
                    if d < best_d {
                        best = i;
                        best_d = d;
                    }
                }
                out.extend(HEX_TETS[best]);
            }
            CellKind::Wedge => out.extend(WEDGE_TETS),
            CellKind::Pyramid => {
                let d02 = screen_dist2(&points[0], &points[2]);
                let d13 = screen_dist2(&points[1], &points[3]);
                let i = if d13 < d02 { 1 } else { 0 };
                out.extend(PYRAMID_TETS[i]);
            }
        }
        out
    }

    /// Evaluates shape functions and their parametric derivatives
    ///
    /// Writes one weight per vertex into `n` and its gradient with respect to
    /// `(r, s, t)` into `dn`.
    pub(crate) fn shape_functions(
        self,
        xi: &Vector3<f32>,
        n: &mut [f32],
        dn: &mut [Vector3<f32>],
    ) {
        let (r, s, t) = (xi.x, xi.y, xi.z);
        match self {
            CellKind::Tetrahedron => {
                n[..4].copy_from_slice(&[1.0 - r - s - t, r, s, t]);
                dn[0] = Vector3::new(-1.0, -1.0, -1.0);
                dn[1] = Vector3::x();
                dn[2] = Vector3::y();
                dn[3] = Vector3::z();
            }
            CellKind::Hexahedron => {
                for (i, c) in HEX_CORNERS.iter().enumerate() {
                    // Each factor is either u or (1 - u), depending on corner
                    let f = |u: f32, c: f32| if c > 0.5 { u } else { 1.0 - u };
                    let d = |c: f32| if c > 0.5 { 1.0 } else { -1.0 };
                    let (fr, fs, ft) = (f(r, c[0]), f(s, c[1]), f(t, c[2]));
                    n[i] = fr * fs * ft;
                    dn[i] = Vector3::new(
                        d(c[0]) * fs * ft,
                        fr * d(c[1]) * ft,
                        fr * fs * d(c[2]),
                    );
                }
            }
            CellKind::Wedge => {
                let u = 1.0 - r - s;
                let tri = [u, r, s];
                let dtri = [(-1.0, -1.0), (1.0, 0.0), (0.0, 1.0)];
                for i in 0..3 {
                    let (dr, ds) = dtri[i];
                    n[i] = tri[i] * (1.0 - t);
                    n[i + 3] = tri[i] * t;
                    dn[i] =
                        Vector3::new(dr * (1.0 - t), ds * (1.0 - t), -tri[i]);
                    dn[i + 3] = Vector3::new(dr * t, ds * t, tri[i]);
                }
            }
            CellKind::Pyramid => {
                let base = [
                    (1.0 - r) * (1.0 - s),
                    r * (1.0 - s),
                    r * s,
                    (1.0 - r) * s,
                ];
                let dbase = [
                    (-(1.0 - s), -(1.0 - r)),
                    (1.0 - s, -r),
                    (s, r),
                    (-s, 1.0 - r),
                ];
                for i in 0..4 {
                    let (dr, ds) = dbase[i];
                    n[i] = base[i] * (1.0 - t);
                    dn[i] =
                        Vector3::new(dr * (1.0 - t), ds * (1.0 - t), -base[i]);
                }
                n[4] = t;
                dn[4] = Vector3::z();
            }
        }
    }

    /// Projects parametric coordinates back into the reference cell
    pub(crate) fn clamp_parametric(self, xi: Vector3<f32>) -> Vector3<f32> {
        let unit = |v: f32| v.clamp(0.0, 1.0);
        match self {
            CellKind::Hexahedron | CellKind::Pyramid => xi.map(unit),
            CellKind::Wedge => {
                let (mut r, mut s) = (xi.x.max(0.0), xi.y.max(0.0));
                if r + s > 1.0 {
                    let k = r + s;
                    r /= k;
                    s /= k;
                }
                Vector3::new(r, s, unit(xi.z))
            }
            CellKind::Tetrahedron => {
                let mut v = xi.map(|v| v.max(0.0));
                let k = v.sum();
                if k > 1.0 {
                    v /= k;
                }
                v
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cell::MAX_VERTICES;
    use approx::assert_relative_eq;
    use strum::IntoEnumIterator;

    /// Shape functions must be 1 at their own corner and 0 at the others
    #[test]
    fn shape_functions_interpolate_corners() {
        for kind in CellKind::iter() {
            let nv = kind.vertex_count();
            let mut n = [0.0; MAX_VERTICES];
            let mut dn = [Vector3::zeros(); MAX_VERTICES];
            for (i, c) in kind.corners().iter().enumerate() {
                kind.shape_functions(&Vector3::from(*c), &mut n, &mut dn);
                for (j, w) in n[..nv].iter().enumerate() {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_relative_eq!(*w, expected, epsilon = 1e-6);
                }
            }
        }
    }

    /// Shape functions form a partition of unity, so derivatives sum to zero
    #[test]
    fn shape_function_sums() {
        let xi = Vector3::new(0.2, 0.3, 0.4);
        for kind in CellKind::iter() {
            let nv = kind.vertex_count();
            let mut n = [0.0; MAX_VERTICES];
            let mut dn = [Vector3::zeros(); MAX_VERTICES];
            kind.shape_functions(&xi, &mut n, &mut dn);
            let sum: f32 = n[..nv].iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
            let dsum: Vector3<f32> = dn[..nv].iter().sum();
            assert_relative_eq!(dsum.norm(), 0.0, epsilon = 1e-6);
        }
    }

    /// Checks derivatives against finite differences
    #[test]
    fn shape_function_derivatives() {
        let xi = Vector3::new(0.25, 0.15, 0.35);
        let h = 1e-3;
        for kind in CellKind::iter() {
            let nv = kind.vertex_count();
            let mut n0 = [0.0; MAX_VERTICES];
            let mut n1 = [0.0; MAX_VERTICES];
            let mut dn = [Vector3::zeros(); MAX_VERTICES];
            let mut scratch = [Vector3::zeros(); MAX_VERTICES];
            kind.shape_functions(&xi, &mut n0, &mut dn);
            for axis in 0..3 {
                let mut step = Vector3::zeros();
                step[axis] = h;
                kind.shape_functions(&(xi + step), &mut n1, &mut scratch);
                for v in 0..nv {
                    let fd = (n1[v] - n0[v]) / h;
                    assert_relative_eq!(fd, dn[v][axis], epsilon = 1e-2);
                }
            }
        }
    }

    #[test]
    fn decompositions_use_valid_vertices() {
        let pts = HEX_CORNERS.map(Point3::from);
        for kind in CellKind::iter() {
            let nv = kind.vertex_count();
            let tets = kind.tetrahedra(&pts[..nv]);
            assert!(!tets.is_empty());
            for t in &tets {
                assert!(t.iter().all(|v| *v < nv), "{kind}: {t:?}");
                let mut s = *t;
                s.sort();
                assert!(s.windows(2).all(|w| w[0] != w[1]), "{kind}: {t:?}");
            }
        }
    }

    /// The six tetrahedra of a unit cube must fill it exactly
    #[test]
    fn hex_tets_fill_volume() {
        let pts = HEX_CORNERS.map(Point3::from);
        for tets in HEX_TETS {
            let vol: f32 = tets
                .iter()
                .map(|[a, b, c, d]| {
                    let (a, b, c, d) = (pts[*a], pts[*b], pts[*c], pts[*d]);
                    (b - a).cross(&(c - a)).dot(&(d - a)).abs() / 6.0
                })
                .sum();
            assert_relative_eq!(vol, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn hex_picks_shortest_diagonal() {
        let mut pts = HEX_CORNERS.map(Point3::from);
        // Squash vertices 1 and 7 together in screen space
        pts[1] = Point3::new(0.5, 0.5, 0.0);
        pts[7] = Point3::new(0.5, 0.5, 1.0);
        let tets = CellKind::Hexahedron.tetrahedra(&pts);
        assert_eq!(tets[0], HEX_TETS[1][0]);
    }

    #[test]
    fn clamps_into_domain() {
        let clamp = |k: CellKind, x, y, z| {
            k.clamp_parametric(Vector3::new(x, y, z))
        };
        let v = clamp(CellKind::Hexahedron, -1.0, 0.5, 2.0);
        assert_eq!(v, Vector3::new(0.0, 0.5, 1.0));
        let v = clamp(CellKind::Wedge, 1.0, 1.0, 0.5);
        assert_eq!(v, Vector3::new(0.5, 0.5, 0.5));
        let v = clamp(CellKind::Tetrahedron, 1.0, 1.0, -2.0);
        assert_eq!(v, Vector3::new(0.5, 0.5, 0.0));
    }
}
