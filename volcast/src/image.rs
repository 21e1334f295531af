//! Images, backgrounds, and opaque backdrops
use crate::{Error, config::ThreadPool, screen::Screen, volume::try_alloc};
use rayon::prelude::*;

/// Generic image type
///
/// The image is laid out in row-major order, and can be indexed either by a
/// `usize` index or a `(row, column)` tuple.
///
/// ```text
///        0 ------------> width (columns)
///        |             |
///        |             |
///        |             |
///        V--------------
///   height (rows)
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Image<P> {
    data: Vec<P>,
    width: usize,
    height: usize,
}

impl<P: Default + Clone> Image<P> {
    /// Builds a new image filled with `P::default()`
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![P::default(); width * height],
            width,
            height,
        }
    }

    /// Builds a new image, returning an error if allocation fails
    pub fn try_new(width: usize, height: usize) -> Result<Self, Error> {
        let n = width.checked_mul(height).ok_or(Error::OutOfMemory {
            what: "image",
            bytes: usize::MAX,
        })?;
        Ok(Self {
            data: try_alloc(n, "image")?,
            width,
            height,
        })
    }
}

impl<P> Image<P> {
    /// Builds an image from row-major pixel data
    ///
    /// Returns `None` if the data length doesn't match the image size
    pub fn from_vec(data: Vec<P>, width: usize, height: usize) -> Option<Self> {
        if width.checked_mul(height) == Some(data.len()) {
            Some(Self {
                data,
                width,
                height,
            })
        } else {
            None
        }
    }

    /// Returns the image width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the image height
    pub fn height(&self) -> usize {
        self.height
    }

    /// Iterates over pixel values
    pub fn iter(&self) -> impl Iterator<Item = &P> + '_ {
        self.data.iter()
    }

    /// Returns the number of pixels in the image
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks whether the image is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a single row of pixels
    pub fn row(&self, y: usize) -> &[P] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    /// Returns a single row of pixels, mutably
    pub fn row_mut(&mut self, y: usize) -> &mut [P] {
        &mut self.data[y * self.width..(y + 1) * self.width]
    }

    /// Decomposes the image into its pixel data
    pub fn take(self) -> Vec<P> {
        self.data
    }

    /// Checks a `(row, column)` position
    ///
    /// Returns the input position in the 1D array if valid; panics otherwise
    fn decode_position(&self, pos: (usize, usize)) -> usize {
        let (row, col) = pos;
        assert!(
            row < self.height,
            "row ({row}) must be less than image height ({})",
            self.height
        );
        assert!(
            col < self.width,
            "column ({col}) must be less than image width ({})",
            self.width
        );
        row * self.width + col
    }
}

impl<P: Send> Image<P> {
    /// Fills the image by computing a per-pixel function
    ///
    /// The closure takes `(x, y)` tuples; rows are processed in parallel if a
    /// thread pool is provided.
    pub fn apply_effect<F: Fn(usize, usize) -> P + Send + Sync>(
        &mut self,
        f: F,
        threads: Option<&ThreadPool>,
    ) {
        if self.width == 0 {
            return;
        }
        let r = |(y, row): (usize, &mut [P])| {
            for (x, v) in row.iter_mut().enumerate() {
                *v = f(x, y);
            }
        };

        if let Some(threads) = threads {
            threads.run(|| {
                self.data
                    .par_chunks_mut(self.width)
                    .enumerate()
                    .for_each(r)
            })
        } else {
            self.data.chunks_mut(self.width).enumerate().for_each(r)
        }
    }
}

impl<'a, P: 'a> IntoIterator for &'a Image<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<P> std::ops::Index<usize> for Image<P> {
    type Output = P;
    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl<P> std::ops::IndexMut<usize> for Image<P> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// Indexes an image with `(row, col)`
impl<P> std::ops::Index<(usize, usize)> for Image<P> {
    type Output = P;
    fn index(&self, pos: (usize, usize)) -> &Self::Output {
        let index = self.decode_position(pos);
        &self.data[index]
    }
}

impl<P> std::ops::IndexMut<(usize, usize)> for Image<P> {
    fn index_mut(&mut self, pos: (usize, usize)) -> &mut Self::Output {
        let index = self.decode_position(pos);
        &mut self.data[index]
    }
}

/// Four-channel color image, with straight (not premultiplied) alpha
pub type RgbaImage = Image<[u8; 4]>;

impl RgbaImage {
    /// Returns the raw RGBA bytes, e.g. for saving to a file
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_flattened()
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Fill behind the volume, where no opaque surface is present
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Background {
    /// A single color
    Solid([u8; 4]),
    /// Linear blend from the top scanline to the bottom scanline
    VerticalGradient {
        /// Color at the top of the image
        top: [u8; 4],
        /// Color at the bottom of the image
        bottom: [u8; 4],
    },
    /// Blend from the image center to its corners
    RadialGradient {
        /// Color at the center of the image
        center: [u8; 4],
        /// Color at the corners of the image
        edge: [u8; 4],
    },
}

impl Default for Background {
    /// Opaque black
    fn default() -> Self {
        Background::Solid([0, 0, 0, 255])
    }
}

fn normalize<const N: usize>(c: [u8; N]) -> [f32; N] {
    c.map(|v| v as f32 / 255.0)
}

fn lerp(a: [u8; 4], b: [u8; 4], t: f32) -> [f32; 4] {
    let (a, b) = (normalize(a), normalize(b));
    std::array::from_fn(|i| a[i] * (1.0 - t) + b[i] * t)
}

impl Background {
    /// Returns the normalized RGBA color at a pixel
    pub fn color_at(&self, screen: &Screen, x: usize, y: usize) -> [f32; 4] {
        match *self {
            Background::Solid(c) => normalize(c),
            Background::VerticalGradient { top, bottom } => {
                let t = (1.0 - screen.y_center(y)) / 2.0;
                lerp(top, bottom, t)
            }
            Background::RadialGradient { center, edge } => {
                let (px, py) = (screen.x_center(x), screen.y_center(y));
                let t = ((px * px + py * py) / 2.0).sqrt().min(1.0);
                lerp(center, edge, t)
            }
        }
    }
}

/// A pre-rendered opaque surface image, composited behind the volume
///
/// Each pixel carries a color and a normalized depth in `[-1, 1]`; a depth of
/// `1` or more means "no surface here".  Samples at or behind a surface are
/// hidden by it.
#[derive(Clone, Debug, PartialEq)]
pub struct OpaqueImage {
    color: Image<[u8; 3]>,
    depth: Image<f32>,
}

impl OpaqueImage {
    /// Builds a new opaque image from color and depth planes
    ///
    /// Returns an error if the planes have different sizes
    pub fn new(
        color: Image<[u8; 3]>,
        depth: Image<f32>,
    ) -> Result<Self, Error> {
        if color.width() != depth.width() || color.height() != depth.height() {
            return Err(Error::OpaquePlaneMismatch(
                color.width(),
                color.height(),
                depth.width(),
                depth.height(),
            ));
        }
        Ok(Self { color, depth })
    }

    /// Returns the image width
    pub fn width(&self) -> usize {
        self.color.width()
    }

    /// Returns the image height
    pub fn height(&self) -> usize {
        self.color.height()
    }

    /// Returns the surface color and depth at a pixel, if there is a surface
    pub fn surface(&self, x: usize, y: usize) -> Option<([u8; 3], f32)> {
        let d = self.depth[(y, x)];
        if d < 1.0 {
            Some((self.color[(y, x)], d))
        } else {
            None
        }
    }

    /// Returns the first depth bin which is hidden by the surface at a pixel
    ///
    /// This is the number of samples which can be composited along the ray.
    pub fn depth_limit(&self, screen: &Screen, x: usize, y: usize) -> usize {
        let s = screen.samples();
        match self.surface(x, y) {
            None => s,
            Some((_, d)) => {
                let k = (((d + 1.0) * s as f32 - 1.0) / 2.0).ceil();
                if k.is_nan() {
                    0
                } else {
                    k.clamp(0.0, s as f32) as usize
                }
            }
        }
    }

    /// Returns the backdrop color at a pixel
    pub(crate) fn color_at(&self, x: usize, y: usize) -> Option<[f32; 4]> {
        self.surface(x, y).map(|(c, _)| {
            let [r, g, b] = normalize(c);
            [r, g, b, 1.0]
        })
    }
}
