//! Ray compositing: turning columns of samples into pixels
//!
//! Each pixel's ray walks its column of the [`SampleVolume`], maps every
//! sample through the [`OpacityMap`], optionally shades it, and blends the
//! results with the standard "over" operator.  Whatever the ray doesn't cover
//! shows the backdrop: an opaque surface if one was provided, or else the
//! [`Background`].
use crate::{
    Error,
    cell::Cell,
    config::{CancelToken, ThreadPool, TransferVariables},
    image::{Background, OpaqueImage, RgbaImage},
    opacity::OpacityMap,
    screen::Screen,
    volume::{Column, SampleVolume},
};
use nalgebra::Vector3;
use std::ops::Range;

mod gradient;
mod lighting;

pub use gradient::GradientField;
pub use lighting::LightingModel;

/// Order in which samples along a ray are blended
///
/// Both orders produce the same image (up to rounding), but front-to-back
/// compositing can stop early once a ray is nearly opaque.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum CompositeOrder {
    /// Nearest sample first
    #[default]
    FrontToBack,
    /// Farthest sample first
    BackToFront,
}

/// Running color and opacity along one ray
///
/// Color is stored premultiplied by alpha.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RayAccumulator {
    color: [f32; 3],
    alpha: f32,
}

impl RayAccumulator {
    /// Adds a sample behind everything accumulated so far
    #[inline]
    pub fn under(&mut self, rgb: [f32; 3], alpha: f32) {
        let k = (1.0 - self.alpha) * alpha;
        for (c, s) in self.color.iter_mut().zip(rgb) {
            *c += k * s;
        }
        self.alpha += k;
    }

    /// Adds a sample in front of everything accumulated so far
    #[inline]
    pub fn over(&mut self, rgb: [f32; 3], alpha: f32) {
        for (c, s) in self.color.iter_mut().zip(rgb) {
            *c = s * alpha + *c * (1.0 - alpha);
        }
        self.alpha = alpha + self.alpha * (1.0 - alpha);
    }

    /// Returns the accumulated opacity
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Composites the accumulated color over a backdrop
    ///
    /// Both the backdrop and the result use straight (not premultiplied)
    /// alpha.
    pub fn finish(&self, backdrop: [f32; 4]) -> [f32; 4] {
        let t = 1.0 - self.alpha;
        let alpha = self.alpha + t * backdrop[3];
        if alpha <= 0.0 {
            return [0.0; 4];
        }
        let [r, g, b] = std::array::from_fn(|i| {
            (self.color[i] + t * backdrop[i] * backdrop[3]) / alpha
        });
        [r, g, b, alpha]
    }
}

/// Converts a normalized color to 8-bit channels
fn to_rgba8(c: [f32; 4]) -> [u8; 4] {
    c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Per-ray compositing parameters
///
/// A `RayFunction` borrows the render's (immutable) opacity map and backdrop,
/// so it can be shared freely across threads.
#[derive(Copy, Clone)]
pub struct RayFunction<'a> {
    /// Transfer function
    pub map: &'a OpacityMap,
    /// Which variables drive color and opacity
    pub variables: TransferVariables,
    /// Blending order along each ray
    pub order: CompositeOrder,
    /// Shading model
    pub lighting: LightingModel,
    /// Front-to-back compositing stops once opacity reaches this value
    pub early_exit: f32,
    /// Fill behind the volume
    pub background: Background,
    /// Optional opaque surfaces behind (or within) the volume
    pub opaque: Option<&'a OpaqueImage>,
}

impl<'a> RayFunction<'a> {
    /// Builds an unlit front-to-back ray function over a black background
    pub fn new(map: &'a OpacityMap) -> Self {
        Self {
            map,
            variables: TransferVariables::default(),
            order: CompositeOrder::default(),
            lighting: LightingModel::default(),
            early_exit: 0.99,
            background: Background::default(),
            opaque: None,
        }
    }

    /// Checks whether compositing needs per-sample gradients
    pub fn needs_gradients(&self) -> bool {
        self.lighting.needs_gradients()
    }

    /// Checks whether a cell could affect the image
    ///
    /// Returns `false` if every value of the cell's opacity variable maps to
    /// zero opacity.  This is only a shortcut: extracting such a cell anyway
    /// doesn't change the image.
    pub fn can_contribute(&self, cell: &Cell) -> bool {
        let v = self.variables.opacity;
        if v >= cell.var_count() {
            return true;
        }
        let (lo, hi) = cell.value_range(v);
        !(lo <= hi) || self.map.max_alpha(lo, hi) > 0.0
    }

    /// Returns the backdrop color and the number of visible depth bins for a
    /// pixel
    pub fn backdrop(
        &self,
        screen: &Screen,
        x: usize,
        y: usize,
    ) -> ([f32; 4], usize) {
        if let Some(o) = self.opaque {
            if let Some(c) = o.color_at(x, y) {
                return (c, o.depth_limit(screen, x, y));
            }
        }
        (self.background.color_at(screen, x, y), screen.samples())
    }

    /// Maps a sample to a color and opacity, or `None` if it's transparent
    #[inline]
    fn sample(
        &self,
        values: &[f32],
        gradient: Option<&[f32; 3]>,
    ) -> Option<([f32; 3], f32)> {
        let alpha = self.map.alpha(values[self.variables.opacity]);
        if !(alpha > 0.0) {
            return None;
        }
        let [r, g, b, _] = self.map.lookup(values[self.variables.color]);
        let mut rgb = [r, g, b];
        if let Some(grad) = gradient {
            rgb = self.lighting.shade(rgb, &Vector3::from(*grad));
        }
        Some((rgb, alpha))
    }

    /// Composites one ray
    ///
    /// Only the first `limit` depth bins are visited; bins at or behind an
    /// opaque surface are excluded this way.  If no sample contributes, the
    /// backdrop is returned unchanged.
    pub fn composite_ray(
        &self,
        column: Column,
        gradients: Option<&[[f32; 3]]>,
        limit: usize,
        backdrop: [f32; 4],
    ) -> [u8; 4] {
        let limit = limit.min(column.len());
        let mut acc = RayAccumulator::default();
        let mut hit = false;
        let mut visit = |z: usize| {
            let s = column
                .get(z)
                .and_then(|v| self.sample(v, gradients.map(|g| &g[z])));
            hit |= s.is_some();
            s
        };
        match self.order {
            CompositeOrder::FrontToBack => {
                for z in 0..limit {
                    if let Some((rgb, a)) = visit(z) {
                        acc.under(rgb, a);
                        if acc.alpha() >= self.early_exit {
                            break;
                        }
                    }
                }
            }
            CompositeOrder::BackToFront => {
                for z in (0..limit).rev() {
                    if let Some((rgb, a)) = visit(z) {
                        acc.over(rgb, a);
                    }
                }
            }
        }
        if hit {
            to_rgba8(acc.finish(backdrop))
        } else {
            to_rgba8(backdrop)
        }
    }

    /// Fills a range of scanlines with the backdrop alone
    pub fn backdrop_rows(
        &self,
        screen: &Screen,
        rows: Range<usize>,
        threads: Option<&ThreadPool>,
    ) -> Result<RgbaImage, Error> {
        let mut image = RgbaImage::try_new(screen.width(), rows.len())?;
        image.apply_effect(
            |x, i| to_rgba8(self.backdrop(screen, x, rows.start + i).0),
            threads,
        );
        Ok(image)
    }

    /// Composites every ray in a range of scanlines
    ///
    /// `gradients` must cover `rows` if this function
    /// [needs gradients](Self::needs_gradients).  Returns an image which is
    /// `rows.len()` pixels tall.
    pub fn composite_rows(
        &self,
        volume: &SampleVolume,
        gradients: Option<&GradientField>,
        rows: Range<usize>,
        threads: Option<&ThreadPool>,
        cancel: &CancelToken,
    ) -> Result<RgbaImage, Error> {
        let screen = volume.screen();
        let mut image = RgbaImage::try_new(screen.width(), rows.len())?;
        image.apply_effect(
            |x, i| {
                if cancel.is_cancelled() {
                    return [0; 4];
                }
                let y = rows.start + i;
                let (backdrop, limit) = self.backdrop(&screen, x, y);
                let g = gradients.map(|g| g.column(x, y));
                self.composite_ray(volume.column(x, y), g, limit, backdrop)
            },
            threads,
        );
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(image)
        }
    }
}
