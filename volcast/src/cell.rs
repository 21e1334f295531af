//! Mesh cells, as handed to the extractors
use crate::Error;
use arrayvec::ArrayVec;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Maximum number of field variables carried by each vertex
pub const MAX_VARIABLES: usize = 8;

/// Maximum number of vertices in any supported cell
pub const MAX_VERTICES: usize = 8;

/// Per-vertex (or per-sample) field values
pub type Values = ArrayVec<f32, MAX_VARIABLES>;

/// Cell topology
///
/// Vertex ordering follows the usual finite-element convention:
///
/// - A hexahedron lists its bottom face (`0..4`, counter-clockwise) and then
///   the top face (`4..8`), with `i + 4` directly above `i`.
/// - A wedge lists the bottom triangle (`0..3`) and then the top triangle
///   (`3..6`), again with `i + 3` above `i`.
/// - A pyramid lists its quadrilateral base (`0..4`) and then the apex.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum CellKind {
    /// Four vertices, linear interpolation
    Tetrahedron,
    /// Eight vertices, trilinear interpolation
    Hexahedron,
    /// Six vertices (triangular prism)
    Wedge,
    /// Five vertices (quadrilateral base plus apex)
    Pyramid,
}

impl CellKind {
    /// Returns the number of vertices used by this topology
    pub const fn vertex_count(self) -> usize {
        match self {
            CellKind::Tetrahedron => 4,
            CellKind::Hexahedron => 8,
            CellKind::Wedge => 6,
            CellKind::Pyramid => 5,
        }
    }
}

/// A single mesh cell: vertex positions plus per-vertex field values
///
/// Cells are immutable once constructed.  Every vertex carries the same number
/// of variables (at most [`MAX_VARIABLES`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    kind: CellKind,
    points: ArrayVec<Point3<f32>, MAX_VERTICES>,
    values: ArrayVec<Values, MAX_VERTICES>,
}

impl Cell {
    /// Builds a new cell, checking vertex and variable counts
    pub fn new(
        kind: CellKind,
        points: &[Point3<f32>],
        values: &[Values],
    ) -> Result<Self, Error> {
        let n = kind.vertex_count();
        if points.len() != n {
            return Err(Error::WrongVertexCount(kind, n, points.len()));
        }
        if values.len() != n {
            return Err(Error::WrongVertexCount(kind, n, values.len()));
        }
        let vars = values[0].len();
        if let Some((i, v)) =
            values.iter().enumerate().find(|(_, v)| v.len() != vars)
        {
            return Err(Error::VariableCountMismatch(i, v.len(), vars));
        }
        Ok(Self::from_parts(
            kind,
            points.iter().cloned().collect(),
            values.iter().cloned().collect(),
        ))
    }

    /// Builds a cell carrying a single scalar per vertex
    pub fn with_scalars(
        kind: CellKind,
        points: &[Point3<f32>],
        scalars: &[f32],
    ) -> Result<Self, Error> {
        let values = scalars
            .iter()
            .map(|s| std::iter::once(*s).collect())
            .collect::<Vec<Values>>();
        Self::new(kind, points, &values)
    }

    /// Builds a cell from pre-validated parts
    pub(crate) fn from_parts(
        kind: CellKind,
        points: ArrayVec<Point3<f32>, MAX_VERTICES>,
        values: ArrayVec<Values, MAX_VERTICES>,
    ) -> Self {
        debug_assert_eq!(points.len(), kind.vertex_count());
        debug_assert_eq!(values.len(), kind.vertex_count());
        Self {
            kind,
            points,
            values,
        }
    }

    /// Returns the cell's topology
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    /// Returns vertex positions
    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    /// Returns per-vertex field values
    pub fn values(&self) -> &[Values] {
        &self.values
    }

    /// Returns the number of variables carried by each vertex
    pub fn var_count(&self) -> usize {
        self.values[0].len()
    }

    /// Returns the `(min, max)` range of a variable over the cell's vertices
    ///
    /// # Panics
    /// If `var` is not less than [`Cell::var_count`]
    pub fn value_range(&self, var: usize) -> (f32, f32) {
        self.values.iter().map(|v| v[var]).fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), v| (lo.min(v), hi.max(v)),
        )
    }

    /// Returns a new cell with every vertex mapped through `f`
    ///
    /// If `f` returns `None` for any vertex, returns `None`
    pub(crate) fn map_points<F: Fn(&Point3<f32>) -> Option<Point3<f32>>>(
        &self,
        f: F,
    ) -> Option<Self> {
        let points = self
            .points
            .iter()
            .map(f)
            .collect::<Option<ArrayVec<_, MAX_VERTICES>>>()?;
        Some(Self::from_parts(self.kind, points, self.values.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_tet() -> Vec<Point3<f32>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn wrong_vertex_count() {
        let pts = unit_tet();
        let r = Cell::with_scalars(CellKind::Hexahedron, &pts, &[0.0; 4]);
        assert!(matches!(
            r,
            Err(Error::WrongVertexCount(CellKind::Hexahedron, 8, 4))
        ));
    }

    #[test]
    fn mismatched_variables() {
        let pts = unit_tet();
        let mut values = vec![Values::new(); 4];
        for v in &mut values {
            v.push(1.0);
        }
        values[2].push(2.0);
        let r = Cell::new(CellKind::Tetrahedron, &pts, &values);
        assert!(matches!(r, Err(Error::VariableCountMismatch(2, 2, 1))));
    }

    #[test]
    fn value_range() {
        let cell = Cell::with_scalars(
            CellKind::Tetrahedron,
            &unit_tet(),
            &[3.0, -1.0, 2.0, 0.5],
        )
        .unwrap();
        assert_eq!(cell.var_count(), 1);
        assert_eq!(cell.value_range(0), (-1.0, 3.0));
    }
}
