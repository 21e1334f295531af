//! Top-level render orchestration
//!
//! A [`VolumeRenderer`] turns the cells owned by one rank into (a share of) an
//! image.  With a single rank, cells are extracted straight into a full-height
//! sample volume and composited.  With several ranks, cells are staged in a
//! [`CellBuffer`], the image is partitioned by estimated work, cells are routed
//! to the ranks that own their scanlines, and each rank composites its own
//! strip; rank 0 then stitches the strips together.
//!
//! Each pixel is computed the same way regardless of the number of ranks, so
//! the rank count only changes how work is distributed.
use crate::{
    Error,
    arbitrate::{Arbitrator, OpacityMapArbitrator},
    buffer::CellBuffer,
    cell::Cell,
    comm::Communicator,
    composite::{GradientField, RayFunction},
    config::RenderConfig,
    extract::{extract_all, is_degenerate},
    image::RgbaImage,
    partition::ImagePartition,
    screen::{Screen, ScreenBounds},
    volume::SampleVolume,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{ops::Range, time::Instant};

/// Stages of a render, in the order that they run
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
pub enum RenderStage {
    /// No render in progress
    Idle,
    /// Transforming, culling, and extracting (or staging) local cells
    LocalExtraction,
    /// Partitioning the image and routing cells between ranks
    PartitionExchange,
    /// Compositing rays for this rank's scanlines
    Compositing,
    /// Gathering image strips on rank 0
    Merge,
    /// The render has finished
    Done,
}

/// Counters describing one rank's share of a render
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RenderStats {
    /// Cells handed to the renderer
    pub cells_in: usize,
    /// Cells skipped because they're off-screen, behind the camera, or
    /// transparent
    pub cells_culled: usize,
    /// Cells skipped because they have no volume
    pub cells_degenerate: usize,
    /// Cell records sent to ranks (including this one)
    pub cells_sent: usize,
    /// Cell records received and decoded
    pub cells_received: usize,
    /// Cell records which failed validation and were dropped
    pub cells_dropped: usize,
    /// Samples produced by extraction (including those lost to arbitration)
    pub samples: usize,
    /// Whether this rank's contribution is missing cells
    pub partial: bool,
}

/// Result of a render
#[derive(Debug)]
pub struct RenderOutput {
    /// The finished image, on rank 0 only
    pub image: Option<RgbaImage>,
    /// Scanline ranges which show only the backdrop because a rank's cells
    /// could not be delivered
    ///
    /// This is only populated on rank 0.
    pub defects: Vec<Range<usize>>,
    /// Statistics for this rank
    pub stats: RenderStats,
}

/// One rank's composited scanlines, as sent to rank 0
#[derive(Serialize, Deserialize)]
struct ImageStrip {
    start: usize,
    end: usize,
    width: usize,
    pixels: Vec<[u8; 4]>,
    partial: bool,
    defective: bool,
}

/// Drives a render through its stages on one rank
///
/// In a distributed render, every rank builds a renderer with the same
/// configuration and calls [`render`](Self::render) with its own cells.
pub struct VolumeRenderer<'a, C> {
    config: &'a RenderConfig<'a>,
    comm: &'a C,
    stage: RenderStage,
}

impl<'a, C: Communicator> VolumeRenderer<'a, C> {
    /// Builds a new renderer
    pub fn new(config: &'a RenderConfig<'a>, comm: &'a C) -> Self {
        Self {
            config,
            comm,
            stage: RenderStage::Idle,
        }
    }

    /// Returns the current stage
    ///
    /// After a successful render this is [`RenderStage::Done`]; if a render
    /// fails, it's the stage in which the failure occurred.
    pub fn stage(&self) -> RenderStage {
        self.stage
    }

    /// Returns the number of sequential stages a render runs through
    ///
    /// This is meant for progress reporting: two stages (extraction and
    /// compositing) for a single rank, or four (adding the exchange and the
    /// merge) for several.
    pub fn stage_count(&self) -> usize {
        if self.comm.size() == 1 { 2 } else { 4 }
    }

    fn enter(&mut self, stage: RenderStage) -> Result<(), Error> {
        if self.config.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        debug!("rank {}: entering {stage}", self.comm.rank());
        self.stage = stage;
        Ok(())
    }

    /// Renders a set of cells, given in world coordinates
    ///
    /// Configuration errors are reported before anything is allocated.
    /// Malformed cells received from other ranks are dropped and recorded in
    /// the output rather than aborting the render.
    pub fn render<I: IntoIterator<Item = Cell>>(
        &mut self,
        cells: I,
    ) -> Result<RenderOutput, Error> {
        self.stage = RenderStage::Idle;
        self.config.validate()?;
        let start = Instant::now();

        let cfg = self.config;
        let default_arbitrator =
            OpacityMapArbitrator::new(&cfg.opacity, cfg.variables.opacity);
        let arbitrator: &dyn Arbitrator = match cfg.arbitrator {
            Some(a) => a,
            None => &default_arbitrator,
        };
        let ray = cfg.ray_function();

        let out = if self.comm.size() == 1 {
            self.render_local(cells, &ray, arbitrator)?
        } else {
            self.render_distributed(cells, &ray, arbitrator)?
        };
        self.stage = RenderStage::Done;

        let s = &out.stats;
        info!(
            "rank {}: rendered {} cells ({} culled, {} degenerate, {} dropped) \
             into {} samples in {:?}",
            self.comm.rank(),
            s.cells_in,
            s.cells_culled,
            s.cells_degenerate,
            s.cells_dropped,
            s.samples,
            start.elapsed()
        );
        Ok(out)
    }

    /// Transforms and culls local cells
    fn prepare<I: IntoIterator<Item = Cell>>(
        &self,
        cells: I,
        ray: &RayFunction,
        stats: &mut RenderStats,
    ) -> Result<Vec<(Cell, ScreenBounds)>, Error> {
        let cfg = self.config;
        let screen = cfg.camera.screen();
        let vars = cfg.variables.required();
        let mut out = vec![];
        for cell in cells {
            stats.cells_in += 1;
            if cell.var_count() < vars {
                return Err(Error::BadVariableIndex(
                    vars - 1,
                    cell.var_count().saturating_sub(1),
                ));
            }
            let Some(cell) = cfg.camera.transform_cell(&cell) else {
                stats.cells_culled += 1;
                continue;
            };
            let Some(bounds) = screen.bounds_of(cell.points()) else {
                stats.cells_culled += 1;
                continue;
            };
            if cfg.cull_transparent
                && !ray.needs_gradients()
                && !ray.can_contribute(&cell)
            {
                stats.cells_culled += 1;
                continue;
            }
            if is_degenerate(&cell) {
                stats.cells_degenerate += 1;
                continue;
            }
            out.push((cell, bounds));
        }
        Ok(out)
    }

    /// Composites a range of scanlines from a volume
    fn composite(
        &mut self,
        volume: &SampleVolume,
        rows: Range<usize>,
        ray: &RayFunction,
    ) -> Result<RgbaImage, Error> {
        self.enter(RenderStage::Compositing)?;
        let cfg = self.config;
        let t = Instant::now();
        let gradients = if ray.needs_gradients() {
            Some(GradientField::new(
                volume,
                cfg.variables.opacity,
                rows.clone(),
                cfg.threads,
            )?)
        } else {
            None
        };
        let image = ray.composite_rows(
            volume,
            gradients.as_ref(),
            rows,
            cfg.threads,
            &cfg.cancel,
        )?;
        debug!("rank {}: composited in {:?}", self.comm.rank(), t.elapsed());
        Ok(image)
    }

    fn render_local<I: IntoIterator<Item = Cell>>(
        &mut self,
        cells: I,
        ray: &RayFunction,
        arbitrator: &dyn Arbitrator,
    ) -> Result<RenderOutput, Error> {
        self.enter(RenderStage::LocalExtraction)?;
        let cfg = self.config;
        let screen = cfg.camera.screen();
        let t = Instant::now();

        let mut stats = RenderStats::default();
        let cells = self.prepare(cells, ray, &mut stats)?;
        let vars = cfg.variables.required();
        let mut volume =
            SampleVolume::new(screen, 0..screen.height(), vars, arbitrator)?;
        stats.samples =
            extract_all(&cells, &mut volume, cfg.threads, &cfg.cancel)?;
        drop(cells);
        debug!("extracted {} samples in {:?}", stats.samples, t.elapsed());

        let image = self.composite(&volume, 0..screen.height(), ray)?;
        Ok(RenderOutput {
            image: Some(image),
            defects: vec![],
            stats,
        })
    }

    fn render_distributed<I: IntoIterator<Item = Cell>>(
        &mut self,
        cells: I,
        ray: &RayFunction,
        arbitrator: &dyn Arbitrator,
    ) -> Result<RenderOutput, Error> {
        let cfg = self.config;
        let comm = self.comm;
        let rank = comm.rank();
        let screen = cfg.camera.screen();
        let vars = cfg.variables.required();
        let margin = usize::from(ray.needs_gradients());

        // Destinations aren't known until the partition is built, so every
        // surviving cell is staged.
        self.enter(RenderStage::LocalExtraction)?;
        let mut stats = RenderStats::default();
        let mut buffer = CellBuffer::new();
        for (cell, bounds) in self.prepare(cells, ray, &mut stats)? {
            buffer.store(&cell, bounds)?;
        }

        self.enter(RenderStage::PartitionExchange)?;
        let t = Instant::now();
        let mut work = vec![0.0; screen.height()];
        buffer.estimate_samples_per_scanline(&mut work);
        comm.all_reduce_sum(&mut work)?;
        let partition = ImagePartition::construct(&work, comm.size());
        let rows = partition.rows(rank);
        debug!("rank {rank}: assigned scanlines {rows:?}");

        let (messages, sent) = buffer.construct_messages(&partition, margin)?;
        stats.cells_sent = sent;
        let delivery = buffer.receive(comm.exchange(messages)?, &screen, vars);
        stats.cells_received = delivery.received;
        stats.cells_dropped = delivery.dropped;
        let defective = !delivery.undecodable.is_empty();
        stats.partial = defective || delivery.dropped > 0;

        let mut volume = SampleVolume::new(
            screen,
            partition.rows_with_margin(rank, margin),
            vars,
            arbitrator,
        )?;
        stats.samples =
            buffer.extract_cells(&mut volume, cfg.threads, &cfg.cancel)?;
        debug!(
            "rank {rank}: exchanged and extracted {} cells in {:?}",
            stats.cells_received,
            t.elapsed()
        );

        let image = if defective {
            warn!(
                "rank {rank}: cells were lost in transit; \
                 showing backdrop for scanlines {rows:?}"
            );
            self.enter(RenderStage::Compositing)?;
            ray.backdrop_rows(&screen, rows.clone(), cfg.threads)?
        } else {
            self.composite(&volume, rows.clone(), ray)?
        };
        drop(volume);

        self.enter(RenderStage::Merge)?;
        let strip = ImageStrip {
            start: rows.start,
            end: rows.end,
            width: screen.width(),
            pixels: image.take(),
            partial: stats.partial,
            defective,
        };
        let gathered = comm.gather(bincode::serialize(&strip)?)?;
        let (image, defects) = match gathered {
            Some(strips) => {
                let (image, defects) =
                    self.merge(strips, &partition, &screen, ray)?;
                (Some(image), defects)
            }
            None => (None, vec![]),
        };
        Ok(RenderOutput {
            image,
            defects,
            stats,
        })
    }

    /// Stitches image strips together on rank 0
    ///
    /// A strip which can't be decoded (or doesn't match its rank's scanlines)
    /// is replaced by the backdrop and reported as a defect.
    fn merge(
        &self,
        strips: Vec<Vec<u8>>,
        partition: &ImagePartition,
        screen: &Screen,
        ray: &RayFunction,
    ) -> Result<(RgbaImage, Vec<Range<usize>>), Error> {
        let cfg = self.config;
        let width = screen.width();
        let mut image = RgbaImage::try_new(width, screen.height())?;
        let mut defects = vec![];
        for (src, bytes) in strips.into_iter().enumerate() {
            let rows = partition.rows(src);
            let strip = bincode::deserialize::<ImageStrip>(&bytes)
                .map_err(Error::from)
                .and_then(|s| {
                    if s.start == rows.start
                        && s.end == rows.end
                        && s.width == width
                        && s.pixels.len() == width * rows.len()
                    {
                        Ok(s)
                    } else {
                        Err(Error::MalformedMessage(format!(
                            "strip from rank {src} does not match {rows:?}"
                        )))
                    }
                });
            let pixels = match strip {
                Ok(s) => {
                    if s.partial {
                        warn!("rank {src} reported a partial contribution");
                    }
                    if s.defective {
                        defects.push(rows.clone());
                    }
                    s.pixels
                }
                Err(e) => {
                    warn!("could not merge strip from rank {src}: {e}");
                    defects.push(rows.clone());
                    ray.backdrop_rows(screen, rows.clone(), cfg.threads)?
                        .take()
                }
            };
            for (i, row) in pixels.chunks_exact(width.max(1)).enumerate() {
                let y = rows.start + i;
                image.row_mut(y).copy_from_slice(row);
            }
        }
        Ok((image, defects))
    }
}
