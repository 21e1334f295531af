//! Minimal unstructured mesh, used to feed cells to the renderer
//!
//! This is an adapter rather than a mesh library: it stores world-space
//! points, per-point field values, and typed connectivity, and turns them
//! into [`Cell`]s.  It also builds simple structured grids and deals cells
//! out to ranks, which is enough to drive tests, benchmarks, and demos.
use crate::{
    Error,
    cell::{Cell, CellKind, MAX_VERTICES, Values},
};
use arrayvec::ArrayVec;
use nalgebra::Point3;

/// Vertex indices of one cell
type Connectivity = ArrayVec<usize, MAX_VERTICES>;

/// Points, per-point fields, and cells built on them
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    points: Vec<Point3<f32>>,
    fields: Vec<Values>,
    cells: Vec<(CellKind, Connectivity)>,
}

impl Mesh {
    /// Builds a mesh with the given points and no cells
    ///
    /// Every point must carry the same number of field values.
    pub fn new(
        points: Vec<Point3<f32>>,
        fields: Vec<Values>,
    ) -> Result<Self, Error> {
        if fields.len() != points.len() {
            let (f, p) = (fields.len(), points.len());
            return Err(Error::FieldCountMismatch(f, p));
        }
        if let Some(first) = fields.first() {
            let vars = first.len();
            if let Some((i, f)) =
                fields.iter().enumerate().find(|(_, f)| f.len() != vars)
            {
                return Err(Error::VariableCountMismatch(i, f.len(), vars));
            }
        }
        Ok(Self {
            points,
            fields,
            cells: vec![],
        })
    }

    /// Builds a mesh with one scalar per point
    pub fn with_scalars(
        points: Vec<Point3<f32>>,
        scalars: &[f32],
    ) -> Result<Self, Error> {
        let fields = scalars
            .iter()
            .map(|s| std::iter::once(*s).collect())
            .collect();
        Self::new(points, fields)
    }

    /// Adds a cell, given the indices of its vertices
    pub fn add_cell(
        &mut self,
        kind: CellKind,
        vertices: &[usize],
    ) -> Result<(), Error> {
        let n = kind.vertex_count();
        if vertices.len() != n {
            return Err(Error::WrongVertexCount(kind, n, vertices.len()));
        }
        if let Some(i) = vertices.iter().find(|i| **i >= self.points.len()) {
            return Err(Error::BadPointIndex(*i, self.points.len()));
        }
        self.cells.push((kind, vertices.iter().copied().collect()));
        Ok(())
    }

    /// Returns the number of points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Returns the number of cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Returns the number of field values carried by each point
    pub fn var_count(&self) -> usize {
        self.fields.first().map(|f| f.len()).unwrap_or(0)
    }

    /// Iterates over the mesh's cells, in world coordinates
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.cells.iter().map(|(kind, verts)| {
            let points = verts.iter().map(|i| self.points[*i]).collect();
            let values =
                verts.iter().map(|i| self.fields[*i].clone()).collect();
            Cell::from_parts(*kind, points, values)
        })
    }

    /// Builds a hexahedral grid with `dims` points along each axis
    ///
    /// Points are evenly spaced between the `lo` and `hi` corners, and each
    /// carries the scalar `field(p)`.  Axes with fewer than two points produce
    /// no cells.
    pub fn structured<F: Fn(&Point3<f32>) -> f32>(
        dims: [usize; 3],
        lo: Point3<f32>,
        hi: Point3<f32>,
        field: F,
    ) -> Self {
        let [nx, ny, nz] = dims;
        let coord = |i: usize, n: usize, lo: f32, hi: f32| {
            if n > 1 {
                lo + (hi - lo) * i as f32 / (n - 1) as f32
            } else {
                lo
            }
        };
        let mut points = Vec::with_capacity(nx * ny * nz);
        let mut fields = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let p = Point3::new(
                        coord(i, nx, lo.x, hi.x),
                        coord(j, ny, lo.y, hi.y),
                        coord(k, nz, lo.z, hi.z),
                    );
                    fields.push(std::iter::once(field(&p)).collect());
                    points.push(p);
                }
            }
        }

        let index = |i: usize, j: usize, k: usize| (k * ny + j) * nx + i;
        let mut cells = vec![];
        for k in 1..nz {
            for j in 1..ny {
                for i in 1..nx {
                    let (i, j, k) = (i - 1, j - 1, k - 1);
                    let verts = [
                        index(i, j, k),
                        index(i + 1, j, k),
                        index(i + 1, j + 1, k),
                        index(i, j + 1, k),
                        index(i, j, k + 1),
                        index(i + 1, j, k + 1),
                        index(i + 1, j + 1, k + 1),
                        index(i, j + 1, k + 1),
                    ];
                    let verts = verts.into_iter().collect();
                    cells.push((CellKind::Hexahedron, verts));
                }
            }
        }
        Self {
            points,
            fields,
            cells,
        }
    }

    /// Returns a new mesh in which every cell is split into tetrahedra
    ///
    /// Points and fields are shared with the original mesh.
    pub fn tetrahedralize(&self) -> Self {
        let mut cells = vec![];
        for (kind, verts) in &self.cells {
            let points =
                verts.iter().map(|i| self.points[*i]).collect::<Vec<_>>();
            for tet in kind.tetrahedra(&points) {
                cells.push((
                    CellKind::Tetrahedron,
                    tet.iter().map(|t| verts[*t]).collect(),
                ));
            }
        }
        Self {
            points: self.points.clone(),
            fields: self.fields.clone(),
            cells,
        }
    }

    /// Deals cells round-robin into `n` meshes, e.g. one per rank
    ///
    /// Each output mesh keeps only the points used by its own cells.
    pub fn split(&self, n: usize) -> Vec<Mesh> {
        let n = n.max(1);
        (0..n)
            .map(|r| {
                let mut remap = vec![None; self.points.len()];
                let mut out = Mesh::default();
                for (kind, verts) in self.cells.iter().skip(r).step_by(n) {
                    let verts = verts
                        .iter()
                        .map(|i| {
                            *remap[*i].get_or_insert_with(|| {
                                out.points.push(self.points[*i]);
                                out.fields.push(self.fields[*i].clone());
                                out.points.len() - 1
                            })
                        })
                        .collect();
                    out.cells.push((*kind, verts));
                }
                out
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn structured() {
        let m = Mesh::structured(
            [3, 2, 2],
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 1.0, 1.0),
            |p| p.x + 10.0 * p.z,
        );
        assert_eq!(m.point_count(), 12);
        assert_eq!(m.cell_count(), 2);
        assert_eq!(m.var_count(), 1);
        let cells = m.cells().collect::<Vec<_>>();
        let c = &cells[1];
        assert_eq!(c.kind(), CellKind::Hexahedron);
        assert_eq!(c.points()[0], Point3::new(1.0, 0.0, 0.0));
        assert_eq!(c.points()[6], Point3::new(2.0, 1.0, 1.0));
        assert_eq!(c.values()[6][0], 12.0);
        assert_eq!(c.value_range(0), (1.0, 12.0));
    }

    #[test]
    fn tetrahedralize() {
        let m = Mesh::structured(
            [3, 3, 3],
            Point3::new(-1.0, -1.0, -1.0),
            Point3::new(1.0, 1.0, 1.0),
            |p| p.y,
        );
        let t = m.tetrahedralize();
        assert_eq!(t.cell_count(), m.cell_count() * 6);
        assert!(t.cells().all(|c| c.kind() == CellKind::Tetrahedron));
    }

    #[test]
    fn split() {
        let m = Mesh::structured(
            [4, 3, 2],
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            |p| p.x,
        );
        let parts = m.split(4);
        assert_eq!(parts.len(), 4);
        assert_eq!(
            parts.iter().map(|p| p.cell_count()).collect::<Vec<_>>(),
            vec![2, 2, 1, 1]
        );
        assert!(parts[2].point_count() == 8);

        // Cells survive the split unchanged
        let mut all = parts.iter().flat_map(|p| p.cells()).collect::<Vec<_>>();
        let mut orig = m.cells().collect::<Vec<_>>();
        let key = |c: &Cell| c.points()[0].x + 10.0 * c.points()[0].y;
        all.sort_by(|a, b| key(a).total_cmp(&key(b)));
        orig.sort_by(|a, b| key(a).total_cmp(&key(b)));
        assert_eq!(all, orig);
    }

    #[test]
    fn bad_cells() {
        let mut m = Mesh::with_scalars(
            vec![Point3::origin(); 4],
            &[0.0, 1.0, 2.0, 3.0],
        )
        .unwrap();
        assert!(m.add_cell(CellKind::Tetrahedron, &[0, 1, 2, 3]).is_ok());
        assert!(matches!(
            m.add_cell(CellKind::Tetrahedron, &[0, 1, 2, 4]),
            Err(Error::BadPointIndex(4, 4))
        ));
        assert!(matches!(
            m.add_cell(CellKind::Wedge, &[0, 1, 2, 3]),
            Err(Error::WrongVertexCount(CellKind::Wedge, 6, 4))
        ));
        assert!(matches!(
            Mesh::with_scalars(vec![Point3::origin()], &[]),
            Err(Error::FieldCountMismatch(0, 1))
        ));
    }
}
