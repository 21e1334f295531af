//! Load-balanced assignment of scanlines to ranks
use crate::screen::ScreenBounds;
use std::ops::Range;

/// Adds a cell footprint's estimated work to a per-scanline tally
///
/// Rows outside of `work` are ignored.
pub fn add_footprint(work: &mut [f64], bounds: &ScreenBounds) {
    let per_row = bounds.samples_per_row();
    let rows = bounds.rows();
    let end = (*rows.end() + 1).min(work.len());
    if let Some(w) = work.get_mut(*rows.start()..end) {
        w.iter_mut().for_each(|w| *w += per_row);
    }
}

/// Contiguous, disjoint scanline ranges, one per rank
///
/// The ranges cover `[0, height)` exactly, in rank order.  A rank may own an
/// empty range if there are more ranks than useful work.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImagePartition {
    /// `bounds[r]..bounds[r + 1]` is owned by rank `r`
    bounds: Vec<usize>,
}

impl ImagePartition {
    /// Splits scanlines evenly by count
    pub fn uniform(height: usize, ranks: usize) -> Self {
        let ranks = ranks.max(1);
        Self {
            bounds: (0..=ranks).map(|r| r * height / ranks).collect(),
        }
    }

    /// Splits scanlines so that each rank gets a similar amount of work
    ///
    /// `work[y]` is the estimated cost of scanline `y`.  This is a greedy
    /// prefix-sum partition: rank `r` takes rows until the running total
    /// reaches `(r + 1) / ranks` of the whole.  No rank receives more than
    /// `total / ranks` plus the cost of its costliest row.
    ///
    /// Negative or non-finite estimates count as zero; if there is no work at
    /// all, this falls back to [`ImagePartition::uniform`].
    pub fn construct(work: &[f64], ranks: usize) -> Self {
        let ranks = ranks.max(1);
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = work.iter().copied().map(clean).sum();
        if !(total > 0.0 && total.is_finite()) {
            return Self::uniform(work.len(), ranks);
        }

        let mut bounds = Vec::with_capacity(ranks + 1);
        bounds.push(0);
        let mut acc = 0.0;
        let mut row = 0;
        for r in 1..ranks {
            let target = total * r as f64 / ranks as f64;
            while row < work.len() && acc < target {
                acc += clean(work[row]);
                row += 1;
            }
            bounds.push(row);
        }
        bounds.push(work.len());
        Self { bounds }
    }

    /// Returns the number of ranks
    pub fn ranks(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Returns the total number of scanlines
    pub fn height(&self) -> usize {
        self.bounds[self.bounds.len() - 1]
    }

    /// Returns the scanlines owned by a rank
    pub fn rows(&self, rank: usize) -> Range<usize> {
        self.bounds[rank]..self.bounds[rank + 1]
    }

    /// Returns a rank's scanlines, padded by `margin` rows on either side
    ///
    /// An empty range stays empty.
    pub fn rows_with_margin(&self, rank: usize, margin: usize) -> Range<usize> {
        let r = self.rows(rank);
        if r.is_empty() {
            r
        } else {
            r.start.saturating_sub(margin)
                ..r.end.saturating_add(margin).min(self.height())
        }
    }

    /// Returns the rank which owns a scanline
    ///
    /// # Panics
    /// If the scanline is outside the image
    pub fn owner(&self, row: usize) -> usize {
        assert!(row < self.height(), "row {row} is outside the image");
        self.bounds.partition_point(|b| *b <= row) - 1
    }

    /// Iterates over ranks whose (padded) scanlines overlap a footprint
    pub fn destinations<'a>(
        &'a self,
        bounds: &'a ScreenBounds,
        margin: usize,
    ) -> impl Iterator<Item = usize> + 'a {
        (0..self.ranks()).filter(move |r| {
            bounds.overlaps_rows(&self.rows_with_margin(*r, margin))
        })
    }
}
