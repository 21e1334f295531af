//! Dense sample storage with collision arbitration
use crate::{Error, arbitrate::Arbitrator, screen::Screen};
use std::ops::Range;

/// Destination for samples produced by an extractor
pub trait SampleSink {
    /// Scanlines accepted by this sink
    ///
    /// Extractors only visit these rows; samples on other rows are ignored.
    fn rows(&self) -> Range<usize>;

    /// Stores one sample at a pixel column, scanline, and depth bin
    ///
    /// `values` may be longer than the number of variables kept by the sink,
    /// in which case the extra values are discarded.
    fn store(&mut self, x: usize, y: usize, z: usize, values: &[f32]);
}

/// Allocates a zero-filled buffer without aborting on failure
pub(crate) fn try_alloc<T: Clone + Default>(
    n: usize,
    what: &'static str,
) -> Result<Vec<T>, Error> {
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| Error::OutOfMemory {
        what,
        bytes: n.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(n, T::default());
    Ok(v)
}

/// A dense `width × rows × samples` grid of sample vectors
///
/// Each bin holds at most one sample.  The volume may cover only part of the
/// image (a contiguous range of scanlines), which is how each rank stores its
/// slice of a distributed render.
///
/// Bins are laid out with depth varying fastest, so each ray's samples are
/// contiguous in memory.
pub struct SampleVolume<'a> {
    screen: Screen,
    rows: Range<usize>,
    vars: usize,
    values: Vec<f32>,
    occupied: Vec<bool>,
    arbitrator: &'a dyn Arbitrator,
}

impl<'a> SampleVolume<'a> {
    /// Allocates an empty volume covering the given scanlines
    ///
    /// `rows` is clipped to the screen height.  Returns
    /// [`Error::OutOfMemory`] if the volume can't be allocated.
    pub fn new(
        screen: Screen,
        rows: Range<usize>,
        vars: usize,
        arbitrator: &'a dyn Arbitrator,
    ) -> Result<Self, Error> {
        let end = rows.end.min(screen.height());
        let rows = rows.start.min(end)..end;
        let bins = screen
            .width()
            .checked_mul(rows.len())
            .and_then(|n| n.checked_mul(screen.samples()))
            .ok_or(Error::OutOfMemory {
                what: "sample volume",
                bytes: usize::MAX,
            })?;
        let occupied = try_alloc(bins, "sample occupancy")?;
        let values = try_alloc(
            bins.checked_mul(vars).ok_or(Error::OutOfMemory {
                what: "sample volume",
                bytes: usize::MAX,
            })?,
            "sample volume",
        )?;
        Ok(Self {
            screen,
            rows,
            vars,
            values,
            occupied,
            arbitrator,
        })
    }

    /// Returns the screen that this volume samples
    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// Returns the number of variables stored per sample
    pub fn vars(&self) -> usize {
        self.vars
    }

    /// Returns the bin index of a sample, or `None` if it's out of range
    #[inline]
    fn bin(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        if x < self.screen.width()
            && self.rows.contains(&y)
            && z < self.screen.samples()
        {
            Some(
                ((y - self.rows.start) * self.screen.width() + x)
                    * self.screen.samples()
                    + z,
            )
        } else {
            None
        }
    }

    /// Returns the sample stored at a bin, if any
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<&[f32]> {
        let i = self.bin(x, y, z)?;
        if self.occupied[i] {
            Some(&self.values[i * self.vars..(i + 1) * self.vars])
        } else {
            None
        }
    }

    /// Returns every bin along one ray, front to back
    ///
    /// # Panics
    /// If the ray is outside of the volume
    pub fn column(&self, x: usize, y: usize) -> Column<'_> {
        let start = self
            .bin(x, y, 0)
            .unwrap_or_else(|| panic!("ray ({x}, {y}) is outside the volume"));
        let n = self.screen.samples();
        Column {
            vars: self.vars,
            values: &self.values[start * self.vars..(start + n) * self.vars],
            occupied: &self.occupied[start..start + n],
        }
    }

    /// Counts occupied bins
    pub fn occupied_count(&self) -> usize {
        self.occupied.iter().filter(|o| **o).count()
    }

    /// Borrows the whole volume as a single slab
    pub fn slab(&mut self) -> VolumeSlab<'_> {
        VolumeSlab {
            width: self.screen.width(),
            samples: self.screen.samples(),
            vars: self.vars,
            rows: self.rows.clone(),
            values: &mut self.values,
            occupied: &mut self.occupied,
            arbitrator: self.arbitrator,
        }
    }

    /// Splits the volume into disjoint bands of `band_rows` scanlines
    ///
    /// Each band can be filled independently, e.g. from a different thread.
    pub fn bands(&mut self, band_rows: usize) -> Vec<VolumeSlab<'_>> {
        let band_rows = band_rows.max(1);
        let row_bins = self.screen.width() * self.screen.samples();
        if row_bins == 0 {
            return vec![];
        }
        let vars = self.vars;
        let arbitrator = self.arbitrator;
        let (width, samples) = (self.screen.width(), self.screen.samples());
        let start = self.rows.start;
        let end = self.rows.end;
        self.values
            .chunks_mut((row_bins * band_rows * vars).max(1))
            .zip(self.occupied.chunks_mut(row_bins * band_rows))
            .enumerate()
            .map(|(i, (values, occupied))| {
                let y0 = start + i * band_rows;
                VolumeSlab {
                    width,
                    samples,
                    vars,
                    rows: y0..(y0 + band_rows).min(end),
                    values,
                    occupied,
                    arbitrator,
                }
            })
            .collect()
    }
}

impl SampleSink for SampleVolume<'_> {
    fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }
    fn store(&mut self, x: usize, y: usize, z: usize, values: &[f32]) {
        self.slab().store(x, y, z, values)
    }
}

/// Read-only view of the bins along a single ray
#[derive(Copy, Clone)]
pub struct Column<'v> {
    vars: usize,
    values: &'v [f32],
    occupied: &'v [bool],
}

impl<'v> Column<'v> {
    /// Number of depth bins in the ray
    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    /// Checks whether the ray has zero bins
    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }

    /// Returns the sample at depth bin `z`, if any
    #[inline]
    pub fn get(&self, z: usize) -> Option<&'v [f32]> {
        if *self.occupied.get(z)? {
            Some(&self.values[z * self.vars..(z + 1) * self.vars])
        } else {
            None
        }
    }
}

/// Mutable view of a contiguous band of scanlines in a [`SampleVolume`]
pub struct VolumeSlab<'v> {
    width: usize,
    samples: usize,
    vars: usize,
    rows: Range<usize>,
    values: &'v mut [f32],
    occupied: &'v mut [bool],
    arbitrator: &'v dyn Arbitrator,
}

impl SampleSink for VolumeSlab<'_> {
    fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    #[inline]
    fn store(&mut self, x: usize, y: usize, z: usize, values: &[f32]) {
        if x >= self.width || z >= self.samples || !self.rows.contains(&y) {
            return;
        }
        debug_assert!(values.len() >= self.vars);
        let i = ((y - self.rows.start) * self.width + x) * self.samples + z;
        let slot = &mut self.values[i * self.vars..(i + 1) * self.vars];
        let values = &values[..self.vars];
        if !self.occupied[i] {
            self.occupied[i] = true;
            slot.copy_from_slice(values);
        } else if self.arbitrator.prefers(values, slot) {
            slot.copy_from_slice(values);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbitrate::MaxValueArbitrator;

    #[test]
    fn store_and_arbitrate() {
        let arb = MaxValueArbitrator { variable: 0 };
        let mut v = SampleVolume::new(Screen::new(4, 4, 8), 0..4, 1, &arb)
            .unwrap();
        assert_eq!(v.get(1, 2, 3), None);
        v.store(1, 2, 3, &[0.5, 99.0]);
        assert_eq!(v.get(1, 2, 3), Some([0.5].as_slice()));
        v.store(1, 2, 3, &[0.25]);
        assert_eq!(v.get(1, 2, 3), Some([0.5].as_slice()));
        v.store(1, 2, 3, &[0.75]);
        assert_eq!(v.get(1, 2, 3), Some([0.75].as_slice()));
        assert_eq!(v.occupied_count(), 1);

        let c = v.column(1, 2);
        assert_eq!(c.len(), 8);
        assert_eq!(c.get(3), Some([0.75].as_slice()));
        assert_eq!(c.get(2), None);
        assert_eq!(c.get(8), None);
    }

    #[test]
    fn out_of_range_is_ignored() {
        let arb = MaxValueArbitrator::default();
        let mut v = SampleVolume::new(Screen::new(4, 8, 2), 2..5, 1, &arb)
            .unwrap();
        v.store(0, 1, 0, &[1.0]);
        v.store(0, 5, 0, &[1.0]);
        v.store(4, 3, 0, &[1.0]);
        v.store(0, 3, 2, &[1.0]);
        assert_eq!(v.occupied_count(), 0);
        v.store(0, 4, 1, &[1.0]);
        assert_eq!(v.occupied_count(), 1);
        assert_eq!(v.get(0, 4, 1), Some([1.0].as_slice()));
    }

    #[test]
    fn rows_are_clipped() {
        let arb = MaxValueArbitrator::default();
        let v = SampleVolume::new(Screen::new(4, 4, 2), 2..10, 1, &arb)
            .unwrap();
        assert_eq!(v.rows(), 2..4);
        let v = SampleVolume::new(Screen::new(4, 4, 2), 7..10, 1, &arb)
            .unwrap();
        assert_eq!(v.rows(), 4..4);
    }

    #[test]
    fn bands_cover_rows() {
        let arb = MaxValueArbitrator::default();
        let mut v = SampleVolume::new(Screen::new(3, 10, 2), 1..8, 1, &arb)
            .unwrap();
        let bands = v.bands(3);
        let rows = bands.iter().map(|b| b.rows()).collect::<Vec<_>>();
        assert_eq!(rows, vec![1..4, 4..7, 7..8]);
        for mut b in bands {
            let r = b.rows();
            for y in 0..10 {
                b.store(y % 3, y, 1, &[y as f32]);
            }
            assert!(!r.is_empty());
        }
        assert_eq!(v.occupied_count(), 7);
        for y in 1..8 {
            assert_eq!(v.get(y % 3, y, 1), Some([y as f32].as_slice()));
        }
    }

    #[test]
    fn huge_volume_fails_cleanly() {
        let arb = MaxValueArbitrator::default();
        let r = SampleVolume::new(
            Screen::new(u32::MAX, u32::MAX, u32::MAX),
            0..u32::MAX as usize,
            8,
            &arb,
        );
        assert!(matches!(r, Err(Error::OutOfMemory { .. })));
    }
}
