//! Sample grid geometry within the normalized camera cube
//!
//! Rendering happens in the ±1 cube.  The screen divides that cube into
//! `width × height` pixel columns and `samples` depth bins per column; each
//! sample sits at the center of its bin:
//!
//! ```text
//!   x(i) = -1 + (2i + 1) / width       (column i, left to right)
//!   y(j) =  1 - (2j + 1) / height      (scanline j, top to bottom)
//!   z(k) = -1 + (2k + 1) / samples     (bin k, front to back)
//! ```
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::ops::{Range, RangeInclusive};

/// Resolution of the sample grid
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Screen {
    width: u32,
    height: u32,
    samples: u32,
}

impl Screen {
    /// Builds a new screen
    ///
    /// The screen is not validated here; see
    /// [`RenderConfig::validate`](crate::RenderConfig::validate)
    pub const fn new(width: u32, height: u32, samples: u32) -> Self {
        Self {
            width,
            height,
            samples,
        }
    }

    /// Image width, in pixels
    pub fn width(&self) -> usize {
        self.width as usize
    }

    /// Image height, in scanlines
    pub fn height(&self) -> usize {
        self.height as usize
    }

    /// Number of depth bins (samples) per ray
    pub fn samples(&self) -> usize {
        self.samples as usize
    }

    /// Returns the normalized X coordinate of a pixel column's center
    #[inline]
    pub fn x_center(&self, i: usize) -> f32 {
        -1.0 + (2 * i + 1) as f32 / self.width as f32
    }

    /// Returns the normalized Y coordinate of a scanline's center
    #[inline]
    pub fn y_center(&self, j: usize) -> f32 {
        1.0 - (2 * j + 1) as f32 / self.height as f32
    }

    /// Returns the normalized depth of a bin's center
    #[inline]
    pub fn z_center(&self, k: usize) -> f32 {
        -1.0 + (2 * k + 1) as f32 / self.samples as f32
    }

    /// Spacing between neighboring samples along each axis
    pub fn spacing(&self) -> [f32; 3] {
        [
            2.0 / self.width as f32,
            2.0 / self.height as f32,
            2.0 / self.samples as f32,
        ]
    }

    /// Finds the inclusive range of centers `-1 + (2i + 1) / n` in `[lo, hi]`
    ///
    /// The result is clamped to `0..n`, which clips to the ±1 cube.
    fn index_range(lo: f32, hi: f32, n: u32) -> Option<(u32, u32)> {
        if !(lo <= hi) || n == 0 {
            return None;
        }
        let n_f = n as f32;
        let first = (((lo + 1.0) * n_f - 1.0) / 2.0).ceil().max(0.0);
        let last = (((hi + 1.0) * n_f - 1.0) / 2.0).floor().min(n_f - 1.0);
        if first > last {
            None
        } else {
            Some((first as u32, last as u32))
        }
    }

    /// Finds the inclusive range of pixel columns with centers in `[lo, hi]`
    pub fn column_range(&self, lo: f32, hi: f32) -> Option<(u32, u32)> {
        Self::index_range(lo, hi, self.width)
    }

    /// Finds the inclusive range of scanlines with centers in `[lo, hi]`
    ///
    /// Scanlines run top-to-bottom, so this mirrors the Y axis.
    pub fn row_range(&self, lo: f32, hi: f32) -> Option<(u32, u32)> {
        Self::index_range(-hi, -lo, self.height)
    }

    /// Finds the inclusive range of depth bins with centers in `[lo, hi]`
    pub fn depth_range(&self, lo: f32, hi: f32) -> Option<(u32, u32)> {
        Self::index_range(lo, hi, self.samples)
    }

    /// Computes the sample bounds of a set of normalized-space points
    ///
    /// Returns `None` if the points' bounding box contains no sample centers,
    /// e.g. if it lies entirely outside of the ±1 cube.
    pub fn bounds_of(&self, points: &[Point3<f32>]) -> Option<ScreenBounds> {
        let mut lo = Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
        let mut hi = -lo;
        for p in points {
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                return None;
            }
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        let (x_min, x_max) = self.column_range(lo.x, hi.x)?;
        let (y_min, y_max) = self.row_range(lo.y, hi.y)?;
        let (z_min, z_max) = self.depth_range(lo.z, hi.z)?;
        Some(ScreenBounds {
            x_min,
            x_max,
            y_min,
            y_max,
            z_min,
            z_max,
        })
    }

    /// Checks whether bounds lie within this screen
    pub fn contains(&self, b: &ScreenBounds) -> bool {
        b.x_min <= b.x_max
            && b.y_min <= b.y_max
            && b.z_min <= b.z_max
            && b.x_max < self.width
            && b.y_max < self.height
            && b.z_max < self.samples
    }
}

/// Inclusive index bounds of the samples a cell may cover
///
/// `x` counts pixel columns, `y` counts scanlines, and `z` counts depth bins.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScreenBounds {
    /// First pixel column
    pub x_min: u32,
    /// Last pixel column (inclusive)
    pub x_max: u32,
    /// First scanline
    pub y_min: u32,
    /// Last scanline (inclusive)
    pub y_max: u32,
    /// First depth bin
    pub z_min: u32,
    /// Last depth bin (inclusive)
    pub z_max: u32,
}

impl ScreenBounds {
    /// Returns the pixel columns covered by these bounds
    pub fn columns(&self) -> RangeInclusive<usize> {
        self.x_min as usize..=self.x_max as usize
    }

    /// Returns the scanlines covered by these bounds
    pub fn rows(&self) -> RangeInclusive<usize> {
        self.y_min as usize..=self.y_max as usize
    }

    /// Returns the depth bins covered by these bounds
    pub fn depths(&self) -> RangeInclusive<usize> {
        self.z_min as usize..=self.z_max as usize
    }

    /// Checks whether these bounds touch any scanline in `rows`
    pub fn overlaps_rows(&self, rows: &Range<usize>) -> bool {
        (self.y_min as usize) < rows.end && (self.y_max as usize) >= rows.start
    }

    /// Checks whether a sample position lies within these bounds
    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        self.columns().contains(&x)
            && self.rows().contains(&y)
            && self.depths().contains(&z)
    }

    /// Cheap estimate of the samples this footprint produces on each scanline
    ///
    /// This is the area of the footprint's cross-section (columns × depth
    /// bins), which overestimates non-box cells but needs no sampling.
    pub fn samples_per_row(&self) -> f64 {
        let w = (self.x_max - self.x_min + 1) as f64;
        let d = (self.z_max - self.z_min + 1) as f64;
        w * d
    }

    /// Returns the intersection of two bounds, or `None` if they're disjoint
    pub fn intersection(&self, other: &ScreenBounds) -> Option<ScreenBounds> {
        let b = ScreenBounds {
            x_min: self.x_min.max(other.x_min),
            x_max: self.x_max.min(other.x_max),
            y_min: self.y_min.max(other.y_min),
            y_max: self.y_max.min(other.y_max),
            z_min: self.z_min.max(other.z_min),
            z_max: self.z_max.min(other.z_max),
        };
        if b.x_min <= b.x_max && b.y_min <= b.y_max && b.z_min <= b.z_max {
            Some(b)
        } else {
            None
        }
    }
}
