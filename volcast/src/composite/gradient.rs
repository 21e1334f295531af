//! Finite-difference gradients over a sample volume
use crate::{
    Error, config::ThreadPool, volume::SampleVolume, volume::try_alloc,
};
use rayon::prelude::*;
use std::ops::Range;

/// Per-sample gradients of one variable, for a range of scanlines
pub struct GradientField {
    rows: Range<usize>,
    width: usize,
    samples: usize,
    data: Vec<[f32; 3]>,
}

/// Derivative along one axis from optional neighbor values
///
/// Uses a central difference when both neighbors are present, a one-sided
/// difference when only one is, and zero otherwise.
fn derivative(lo: Option<f32>, here: f32, hi: Option<f32>, h: f32) -> f32 {
    match (lo, hi) {
        (Some(lo), Some(hi)) => (hi - lo) / (2.0 * h),
        (Some(lo), None) => (here - lo) / h,
        (None, Some(hi)) => (hi - here) / h,
        (None, None) => 0.0,
    }
}

impl GradientField {
    /// Computes gradients of `variable` for every occupied bin in `rows`
    ///
    /// Neighbors are looked up in the whole volume, so scanlines just outside
    /// of `rows` (if the volume holds them) contribute central differences.
    /// Gradients are in value units per normalized-space unit, with `+y`
    /// pointing up the screen.
    pub fn new(
        volume: &SampleVolume,
        variable: usize,
        rows: Range<usize>,
        threads: Option<&ThreadPool>,
    ) -> Result<Self, Error> {
        let screen = volume.screen();
        let (width, samples) = (screen.width(), screen.samples());
        let row_bins = width * samples;
        let mut data = try_alloc(row_bins * rows.len(), "gradient field")?;
        let [hx, hy, hz] = screen.spacing();
        let value = |x: usize, y: usize, z: usize| {
            volume.get(x, y, z).map(|v| v[variable])
        };

        let r = |(i, row): (usize, &mut [[f32; 3]])| {
            let y = rows.start + i;
            for x in 0..width {
                for z in 0..samples {
                    let Some(here) = value(x, y, z) else {
                        continue;
                    };
                    let dx = derivative(
                        x.checked_sub(1).and_then(|x| value(x, y, z)),
                        here,
                        value(x + 1, y, z),
                        hx,
                    );
                    // Scanlines run top to bottom, so the row above is +y
                    let dy = derivative(
                        value(x, y + 1, z),
                        here,
                        y.checked_sub(1).and_then(|y| value(x, y, z)),
                        hy,
                    );
                    let dz = derivative(
                        z.checked_sub(1).and_then(|z| value(x, y, z)),
                        here,
                        value(x, y, z + 1),
                        hz,
                    );
                    row[x * samples + z] = [dx, dy, dz];
                }
            }
        };

        if row_bins > 0 {
            match threads {
                Some(p) => p.run(|| {
                    data.par_chunks_mut(row_bins).enumerate().for_each(r)
                }),
                None => data.chunks_mut(row_bins).enumerate().for_each(r),
            }
        }
        Ok(Self {
            rows,
            width,
            samples,
            data,
        })
    }

    /// Returns the gradients along one ray, front to back
    ///
    /// # Panics
    /// If the ray is outside of this field
    pub fn column(&self, x: usize, y: usize) -> &[[f32; 3]] {
        assert!(
            self.rows.contains(&y) && x < self.width,
            "ray ({x}, {y}) is outside the gradient field"
        );
        let start = ((y - self.rows.start) * self.width + x) * self.samples;
        &self.data[start..start + self.samples]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        arbitrate::MaxValueArbitrator, screen::Screen, volume::SampleSink,
    };
    use approx::assert_relative_eq;

    #[test]
    fn linear_field() {
        let screen = Screen::new(4, 4, 4);
        let arb = MaxValueArbitrator::default();
        let mut v = SampleVolume::new(screen, 0..4, 1, &arb).unwrap();
        let f = |x, y, z| {
            2.0 * screen.x_center(x) - screen.y_center(y)
                + 0.5 * screen.z_center(z)
        };
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    v.store(x, y, z, &[f(x, y, z)]);
                }
            }
        }
        let g = GradientField::new(&v, 0, 0..4, None).unwrap();
        for x in 0..4 {
            for y in 0..4 {
                for grad in g.column(x, y) {
                    assert_relative_eq!(grad[0], 2.0, epsilon = 1e-5);
                    assert_relative_eq!(grad[1], -1.0, epsilon = 1e-5);
                    assert_relative_eq!(grad[2], 0.5, epsilon = 1e-5);
                }
            }
        }

        let p = GradientField::new(&v, 0, 1..3, Some(&ThreadPool::Global))
            .unwrap();
        assert_eq!(p.column(2, 1), g.column(2, 1));
    }

    #[test]
    fn isolated_sample() {
        let screen = Screen::new(3, 3, 3);
        let arb = MaxValueArbitrator::default();
        let mut v = SampleVolume::new(screen, 0..3, 1, &arb).unwrap();
        v.store(1, 1, 1, &[5.0]);
        let g = GradientField::new(&v, 0, 0..3, None).unwrap();
        assert_eq!(g.column(1, 1)[1], [0.0; 3]);
    }
}
