//! Scalar-to-RGBA transfer functions
use crate::Error;
use serde::{Deserialize, Serialize};

/// A single control point in a transfer function
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Field value at which this color applies
    pub value: f32,
    /// RGBA color, with alpha as opacity
    pub color: [u8; 4],
}

impl ControlPoint {
    /// Builds a new control point
    pub const fn new(value: f32, color: [u8; 4]) -> Self {
        Self { value, color }
    }
}

/// Normalized RGBA color, with each channel in `[0, 1]`
pub type Rgba = [f32; 4];

/// Lookup table mapping field values to RGBA
///
/// The table is built once (see [`OpacityMap::new`]) and is read-only
/// afterwards; a render borrows it for its whole lifetime, so rebuilding it
/// necessarily happens between renders.
#[derive(Clone, Debug, PartialEq)]
pub struct OpacityMap {
    min: f32,
    max: f32,
    table: Vec<Rgba>,
}

impl Default for OpacityMap {
    /// Transparent black at 0, opaque white at 1
    fn default() -> Self {
        Self::new(
            &[
                ControlPoint::new(0.0, [0, 0, 0, 0]),
                ControlPoint::new(1.0, [255, 255, 255, 255]),
            ],
            (0.0, 1.0),
        )
        .unwrap()
    }
}

impl OpacityMap {
    /// Number of table entries used by [`OpacityMap::new`]
    pub const DEFAULT_RESOLUTION: usize = 256;

    /// Builds a map with [`Self::DEFAULT_RESOLUTION`] entries
    pub fn new(
        points: &[ControlPoint],
        range: (f32, f32),
    ) -> Result<Self, Error> {
        Self::with_resolution(points, range, Self::DEFAULT_RESOLUTION)
    }

    /// Builds a map by interpolating control points across a value range
    ///
    /// Control points must be non-empty and in non-decreasing value order.
    /// Colors are interpolated linearly between neighboring control points and
    /// held constant beyond the first and last points.
    pub fn with_resolution(
        points: &[ControlPoint],
        range: (f32, f32),
        resolution: usize,
    ) -> Result<Self, Error> {
        let (min, max) = range;
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(Error::BadValueRange(min, max));
        }
        if points.is_empty() {
            return Err(Error::EmptyTransferFunction);
        }
        if resolution < 2 {
            return Err(Error::BadTableSize(resolution));
        }
        if let Some(p) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(Error::BadValueRange(p.value, p.value));
        }
        for (i, w) in points.windows(2).enumerate() {
            if w[1].value < w[0].value {
                return Err(Error::NonMonotonicControlPoints(
                    i + 1,
                    w[1].value,
                    w[0].value,
                ));
            }
        }

        let normalize = |c: [u8; 4]| c.map(|v| v as f32 / 255.0);
        let first = normalize(points[0].color);
        let last = normalize(points[points.len() - 1].color);
        let table = (0..resolution)
            .map(|i| {
                let v = min + (max - min) * i as f32 / (resolution - 1) as f32;
                let n = points.partition_point(|p| p.value <= v);
                if n == 0 {
                    first
                } else if n == points.len() {
                    last
                } else {
                    let lo = &points[n - 1];
                    let hi = &points[n];
                    let t = (v - lo.value) / (hi.value - lo.value);
                    let a = normalize(lo.color);
                    let b = normalize(hi.color);
                    std::array::from_fn(|c| a[c] * (1.0 - t) + b[c] * t)
                }
            })
            .collect();
        Ok(Self { min, max, table })
    }

    /// Builds a map which returns the same color for every value
    pub fn constant(color: [u8; 4]) -> Self {
        Self::new(&[ControlPoint::new(0.0, color)], (0.0, 1.0)).unwrap()
    }

    /// Returns the value range covered by the table
    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// Returns the number of table entries
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Checks whether the table is empty (which is never the case)
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the table entry nearest to the given value
    ///
    /// Values outside the range clamp to the first or last entry; `NaN` maps to
    /// the first entry.
    #[inline]
    pub fn index(&self, v: f32) -> usize {
        let t = ((v - self.min) / (self.max - self.min)).clamp(0.0, 1.0);
        // NaN casts to 0
        ((t * (self.table.len() - 1) as f32).round() as usize)
            .min(self.table.len() - 1)
    }

    /// Looks up the color of a value
    #[inline]
    pub fn lookup(&self, v: f32) -> Rgba {
        self.table[self.index(v)]
    }

    /// Looks up the opacity of a value
    #[inline]
    pub fn alpha(&self, v: f32) -> f32 {
        self.lookup(v)[3]
    }

    /// Returns the largest opacity that any value in `[lo, hi]` can map to
    pub fn max_alpha(&self, lo: f32, hi: f32) -> f32 {
        let (a, b) = (self.index(lo), self.index(hi));
        self.table[a.min(b)..=a.max(b)]
            .iter()
            .map(|c| c[3])
            .fold(0.0, f32::max)
    }
}
