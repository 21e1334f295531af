//! Cell extraction: scan-converting cells into sample volumes
//!
//! Every cell is split into tetrahedra (see [`CellKind`] for the vertex
//! conventions), each tetrahedron is scan-converted against the screen's
//! sample grid, and each sample is interpolated with the cell's own shape
//! functions.  Degenerate tetrahedra contribute nothing, and geometry outside
//! of the ±1 cube never produces samples.
use crate::{
    Error,
    cell::{Cell, CellKind, MAX_VERTICES, Values},
    config::{CancelToken, ThreadPool},
    screen::{Screen, ScreenBounds},
    volume::{SampleSink, SampleVolume, VolumeSlab},
};
use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;

mod tetrahedron;
mod topology;

use tetrahedron::Tetrahedron;
use topology::Tet;

/// Maximum Newton steps when inverting the isoparametric map
const NEWTON_ITERATIONS: usize = 8;

/// Number of scanlines in each independently-extracted band
pub(crate) const BAND_ROWS: usize = 8;

/// Interpolates field values at points inside a cell
struct Interpolator<'c> {
    cell: &'c Cell,
    tolerance: f32,
    n: [f32; MAX_VERTICES],
    dn: [Vector3<f32>; MAX_VERTICES],
}

impl<'c> Interpolator<'c> {
    fn new(cell: &'c Cell) -> Self {
        let lo = Vector3::repeat(f32::INFINITY);
        let (lo, hi) = cell.points().iter().fold((lo, -lo), |(lo, hi), p| {
            (lo.inf(&p.coords), hi.sup(&p.coords))
        });
        Self {
            cell,
            tolerance: (hi - lo).max() * 1e-6,
            n: [0.0; MAX_VERTICES],
            dn: [Vector3::zeros(); MAX_VERTICES],
        }
    }

    /// Computes values at a point, given its barycentric weights in one of
    /// the cell's tetrahedra
    fn sample(
        &mut self,
        tet: &Tet,
        weights: [f32; 4],
        p: &Point3<f32>,
        out: &mut Values,
    ) {
        let cell = self.cell;
        let kind = cell.kind();
        let values = cell.values();
        out.clear();
        if kind == CellKind::Tetrahedron {
            for v in 0..cell.var_count() {
                out.push(
                    tet.iter()
                        .zip(weights)
                        .map(|(i, w)| values[*i][v] * w)
                        .sum(),
                );
            }
            return;
        }

        let xi = self.invert(tet, weights, p);
        kind.shape_functions(&xi, &mut self.n, &mut self.dn);
        let nv = kind.vertex_count();
        for v in 0..cell.var_count() {
            out.push(
                self.n[..nv]
                    .iter()
                    .zip(values)
                    .map(|(n, vals)| n * vals[v])
                    .sum(),
            );
        }
    }

    /// Finds the parametric coordinates of a point
    ///
    /// Starts from the tetrahedron's barycentric blend of parametric corners
    /// and refines with Newton's method; the result is always clamped into
    /// the reference cell.
    fn invert(
        &mut self,
        tet: &Tet,
        weights: [f32; 4],
        p: &Point3<f32>,
    ) -> Vector3<f32> {
        let cell = self.cell;
        let kind = cell.kind();
        let corners = kind.corners();
        let points = cell.points();
        let start = tet
            .iter()
            .zip(weights)
            .fold(Vector3::zeros(), |acc, (i, w)| {
                acc + Vector3::from(corners[*i]) * w
            });

        let mut xi = start;
        for _ in 0..NEWTON_ITERATIONS {
            kind.shape_functions(&xi, &mut self.n, &mut self.dn);
            let mut x = Vector3::zeros();
            let mut jacobian = Matrix3::zeros();
            for (i, pt) in points.iter().enumerate() {
                x += pt.coords * self.n[i];
                jacobian += pt.coords * self.dn[i].transpose();
            }
            let residual = x - p.coords;
            if residual.norm() <= self.tolerance {
                break;
            }
            let Some(step) = jacobian.lu().solve(&residual) else {
                break;
            };
            xi -= step;
            if !xi.iter().all(|v| v.is_finite()) {
                xi = start;
                break;
            }
        }
        kind.clamp_parametric(xi)
    }
}

/// Extracts samples from a single cell into a sink
///
/// The cell must already be transformed into normalized screen space (see
/// [`Camera::transform_cell`](crate::Camera::transform_cell)).  Only the
/// sink's scanlines are visited.  Returns the number of samples produced,
/// which is zero for degenerate cells and cells outside of the screen.
pub fn extract<S: SampleSink>(
    cell: &Cell,
    screen: &Screen,
    sink: &mut S,
) -> usize {
    let rows = sink.rows();
    let mut interp = Interpolator::new(cell);
    let mut values = Values::new();
    let mut count = 0;
    for verts in cell.kind().tetrahedra(cell.points()) {
        let Some(tet) = Tetrahedron::new(cell.points(), verts) else {
            continue;
        };
        tet.rasterize(screen, rows.clone(), |x, y, z, w| {
            let p = Point3::new(
                screen.x_center(x),
                screen.y_center(y),
                screen.z_center(z),
            );
            interp.sample(tet.verts(), w, &p, &mut values);
            sink.store(x, y, z, &values);
            count += 1;
        });
    }
    count
}

/// Checks whether every tetrahedron of a cell is degenerate
///
/// Such a cell (e.g. a flattened hexahedron) can never produce samples.
pub fn is_degenerate(cell: &Cell) -> bool {
    cell.kind()
        .tetrahedra(cell.points())
        .iter()
        .all(|t| Tetrahedron::new(cell.points(), *t).is_none())
}

/// Extracts many cells into a volume, optionally in parallel
///
/// The volume is split into bands of scanlines; each band extracts every cell
/// whose bounds overlap it.  Because arbitration is order-independent, the
/// result is identical whether or not a thread pool is provided.
///
/// Returns the total number of samples produced, or [`Error::Cancelled`].
pub fn extract_all(
    cells: &[(Cell, ScreenBounds)],
    volume: &mut SampleVolume,
    threads: Option<&ThreadPool>,
    cancel: &CancelToken,
) -> Result<usize, Error> {
    let screen = volume.screen();
    let band = |mut slab: VolumeSlab| -> Result<usize, Error> {
        let rows = slab.rows();
        let mut count = 0;
        for (cell, bounds) in cells {
            if !bounds.overlaps_rows(&rows) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            count += extract(cell, &screen, &mut slab);
        }
        Ok(count)
    };

    let bands = volume.bands(BAND_ROWS);
    let counts = match threads {
        None => bands.into_iter().map(&band).collect::<Result<Vec<_>, _>>(),
        Some(p) => p.run(|| {
            bands
                .into_par_iter()
                .map(&band)
                .collect::<Result<Vec<_>, _>>()
        }),
    }?;
    Ok(counts.iter().sum())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbitrate::MaxValueArbitrator;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use std::ops::Range;
    use strum::IntoEnumIterator;

    /// Sink which records every sample
    struct Recorder {
        rows: Range<usize>,
        samples: Vec<(usize, usize, usize, Vec<f32>)>,
    }

    impl Recorder {
        fn new(rows: Range<usize>) -> Self {
            Self {
                rows,
                samples: vec![],
            }
        }
    }

    impl SampleSink for Recorder {
        fn rows(&self) -> Range<usize> {
            self.rows.clone()
        }
        fn store(&mut self, x: usize, y: usize, z: usize, values: &[f32]) {
            self.samples.push((x, y, z, values.to_vec()));
        }
    }

    /// Affine field used to check interpolation exactness
    fn field(p: &Point3<f32>) -> f32 {
        0.5 + p.x - 2.0 * p.y + 0.25 * p.z
    }

    /// Builds a sheared (but not degenerate) cell of each topology
    fn sheared(kind: CellKind) -> Cell {
        let a = Matrix3::new(0.8, 0.1, 0.05, 0.05, 0.7, -0.1, 0.1, 0.05, 0.9);
        let c = Vector3::new(-0.45, -0.4, -0.5);
        let points = kind
            .corners()
            .iter()
            .map(|xi| Point3::from(a * Vector3::from(*xi) + c))
            .collect::<Vec<_>>();
        let scalars = points.iter().map(field).collect::<Vec<_>>();
        Cell::with_scalars(kind, &points, &scalars).unwrap()
    }

    #[test]
    fn locality() {
        let screen = Screen::new(24, 20, 16);
        for kind in CellKind::iter() {
            let cell = sheared(kind);
            let mut rec = Recorder::new(0..20);
            let n = extract(&cell, &screen, &mut rec);
            assert!(n > 0, "{kind} produced no samples");
            assert_eq!(n, rec.samples.len());

            let lo = cell.points().iter().fold(
                Vector3::repeat(f32::INFINITY),
                |acc, p| acc.inf(&p.coords),
            );
            let hi = cell.points().iter().fold(
                Vector3::repeat(f32::NEG_INFINITY),
                |acc, p| acc.sup(&p.coords),
            );
            for (x, y, z, _) in &rec.samples {
                let p = Vector3::new(
                    screen.x_center(*x),
                    screen.y_center(*y),
                    screen.z_center(*z),
                );
                for i in 0..3 {
                    assert!(
                        p[i] >= lo[i] - 1e-4 && p[i] <= hi[i] + 1e-4,
                        "{kind}: sample {p:?} is outside {lo:?}..{hi:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn affine_fields_are_exact() {
        let screen = Screen::new(24, 20, 16);
        for kind in CellKind::iter() {
            let cell = sheared(kind);
            let mut rec = Recorder::new(0..20);
            extract(&cell, &screen, &mut rec);
            for (x, y, z, v) in &rec.samples {
                let p = Point3::new(
                    screen.x_center(*x),
                    screen.y_center(*y),
                    screen.z_center(*z),
                );
                assert_relative_eq!(v[0], field(&p), epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn hex_samples_match_volume() {
        // An axis-aligned box covers exactly the bins whose centers it holds
        let screen = Screen::new(4, 4, 8);
        let corners = CellKind::Hexahedron.corners();
        let points = corners
            .iter()
            .map(|c| Point3::from(Vector3::from(*c) - Vector3::repeat(0.5)))
            .collect::<Vec<_>>();
        let cell =
            Cell::with_scalars(CellKind::Hexahedron, &points, &[1.0; 8])
                .unwrap();
        let mut rec = Recorder::new(0..4);
        extract(&cell, &screen, &mut rec);
        let mut bins = rec
            .samples
            .iter()
            .map(|(x, y, z, v)| {
                assert_eq!(v[0], 1.0);
                (*x, *y, *z)
            })
            .collect::<Vec<_>>();
        bins.sort();
        bins.dedup();
        assert_eq!(bins.len(), 2 * 2 * 4);
        for (x, y, z) in bins {
            assert!((1..=2).contains(&x));
            assert!((1..=2).contains(&y));
            assert!((2..=5).contains(&z));
        }
    }

    #[test]
    fn degenerate_cells() {
        let screen = Screen::new(8, 8, 8);
        let flat = CellKind::Hexahedron
            .corners()
            .iter()
            .map(|c| Point3::new(c[0] - 0.5, c[1] - 0.5, 0.0))
            .collect::<Vec<_>>();
        let cell =
            Cell::with_scalars(CellKind::Hexahedron, &flat, &[1.0; 8]).unwrap();
        assert!(is_degenerate(&cell));
        let mut rec = Recorder::new(0..8);
        assert_eq!(extract(&cell, &screen, &mut rec), 0);

        for kind in CellKind::iter() {
            assert!(!is_degenerate(&sheared(kind)));
        }
    }

    #[test]
    fn outside_of_screen() {
        let screen = Screen::new(8, 8, 8);
        let points = CellKind::Tetrahedron
            .corners()
            .iter()
            .map(|c| Point3::from(Vector3::from(*c) + Vector3::repeat(1.5)))
            .collect::<Vec<_>>();
        let cell =
            Cell::with_scalars(CellKind::Tetrahedron, &points, &[0.0; 4])
                .unwrap();
        let mut rec = Recorder::new(0..8);
        assert_eq!(extract(&cell, &screen, &mut rec), 0);
    }

    fn random_cells(n: usize, screen: &Screen) -> Vec<(Cell, ScreenBounds)> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1234);
        let mut out = vec![];
        while out.len() < n {
            let c = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let points = (0..4)
                .map(|_| {
                    Point3::from(
                        c + Vector3::new(
                            rng.gen_range(-0.4..0.4),
                            rng.gen_range(-0.4..0.4),
                            rng.gen_range(-0.4..0.4),
                        ),
                    )
                })
                .collect::<Vec<_>>();
            let scalars = [
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
            ];
            let cell =
                Cell::with_scalars(CellKind::Tetrahedron, &points, &scalars)
                    .unwrap();
            if let Some(b) = screen.bounds_of(cell.points()) {
                out.push((cell, b));
            }
        }
        out
    }

    #[test]
    fn parallel_matches_serial() {
        let screen = Screen::new(32, 30, 16);
        let cells = random_cells(200, &screen);
        let arb = MaxValueArbitrator::default();
        let cancel = CancelToken::new();

        let mut serial = SampleVolume::new(screen, 0..30, 1, &arb).unwrap();
        let a = extract_all(&cells, &mut serial, None, &cancel).unwrap();

        let pool = ThreadPool::Global;
        let mut parallel = SampleVolume::new(screen, 0..30, 1, &arb).unwrap();
        let b =
            extract_all(&cells, &mut parallel, Some(&pool), &cancel).unwrap();
        assert_eq!(a, b);
        assert!(a > 0);

        // Extracting cells in reverse order gives the same volume
        let reversed = cells.iter().rev().cloned().collect::<Vec<_>>();
        let mut rev = SampleVolume::new(screen, 0..30, 1, &arb).unwrap();
        extract_all(&reversed, &mut rev, None, &cancel).unwrap();

        for y in 0..30 {
            for x in 0..32 {
                for z in 0..16 {
                    assert_eq!(serial.get(x, y, z), parallel.get(x, y, z));
                    assert_eq!(serial.get(x, y, z), rev.get(x, y, z));
                }
            }
        }
    }

    #[test]
    fn cancel_extraction() {
        let screen = Screen::new(16, 16, 8);
        let cells = random_cells(10, &screen);
        let arb = MaxValueArbitrator::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut v = SampleVolume::new(screen, 0..16, 1, &arb).unwrap();
        let r = extract_all(&cells, &mut v, None, &cancel);
        assert!(matches!(r, Err(Error::Cancelled)));
    }
}
