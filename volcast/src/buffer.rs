//! Deferred cells for distributed rendering
//!
//! In a multi-rank render, a rank can't extract its cells until it knows
//! which rank owns the scanlines they cover.  The [`CellBuffer`] holds cells
//! in serialized form until the partition is known, then packs them into one
//! message per destination rank.  On the receiving side, cells are decoded
//! and validated before extraction; malformed records are dropped rather
//! than trusted.
//!
//! # Wire format
//! A message is a bincode-encoded list of byte strings, one per cell.  Each
//! byte string is a bincode-encoded `CellRecord`, which starts with a format
//! version so that stale or foreign records are rejected.
use crate::{
    Error,
    cell::{Cell, CellKind, MAX_VARIABLES, Values},
    config::{CancelToken, ThreadPool},
    extract::extract_all,
    partition::{ImagePartition, add_footprint},
    screen::{Screen, ScreenBounds},
    volume::SampleVolume,
};
use log::warn;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Current version of the [`CellRecord`] layout
const RECORD_VERSION: u16 = 1;

/// Serialized form of one cell
#[derive(Serialize, Deserialize)]
struct CellRecord {
    version: u16,
    kind: CellKind,
    points: Vec<[f32; 3]>,
    values: Vec<Vec<f32>>,
    bounds: ScreenBounds,
}

/// A cell packed for transmission, along with its screen footprint
///
/// Decoding consumes the buffer: once a cell has been sent, the receiver owns
/// the only copy.
#[derive(Clone, Debug)]
pub struct SerializedCell {
    bounds: ScreenBounds,
    bytes: Vec<u8>,
}

impl SerializedCell {
    /// Packs a cell (already in normalized coordinates) and its bounds
    pub fn encode(cell: &Cell, bounds: ScreenBounds) -> Result<Self, Error> {
        let record = CellRecord {
            version: RECORD_VERSION,
            kind: cell.kind(),
            points: cell.points().iter().map(|p| [p.x, p.y, p.z]).collect(),
            values: cell.values().iter().map(|v| v.to_vec()).collect(),
            bounds,
        };
        let bytes = bincode::serialize(&record)?;
        Ok(Self { bounds, bytes })
    }

    /// Returns the screen footprint recorded for this cell
    pub fn bounds(&self) -> &ScreenBounds {
        &self.bounds
    }

    /// Returns the packed size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Checks whether the packed representation is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the packed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Unpacks and validates a cell
    ///
    /// The cell must carry at least `vars` variables per vertex, and its
    /// recorded bounds must match the footprint of its vertices on `screen`.
    pub fn decode(
        self,
        screen: &Screen,
        vars: usize,
    ) -> Result<(Cell, ScreenBounds), Error> {
        decode_record(&self.bytes, screen, vars)
    }
}

/// Decodes and validates one [`CellRecord`]
fn decode_record(
    bytes: &[u8],
    screen: &Screen,
    vars: usize,
) -> Result<(Cell, ScreenBounds), Error> {
    let r: CellRecord = bincode::deserialize(bytes)?;
    if r.version != RECORD_VERSION {
        return Err(Error::MalformedCell(format!(
            "unknown record version {}",
            r.version
        )));
    }
    let n = r.kind.vertex_count();
    if r.points.len() != n || r.values.len() != n {
        return Err(Error::WrongVertexCount(r.kind, n, r.points.len()));
    }
    let points = r
        .points
        .iter()
        .map(|p| Point3::from(*p))
        .collect::<Vec<_>>();
    if points.iter().any(|p| !p.iter().all(|v| v.is_finite())) {
        return Err(Error::MalformedCell("non-finite vertex".to_owned()));
    }
    let mut values = Vec::with_capacity(n);
    for v in &r.values {
        if v.len() > MAX_VARIABLES {
            return Err(Error::TooManyVariables(v.len(), MAX_VARIABLES));
        }
        if v.len() < vars {
            return Err(Error::MalformedCell(format!(
                "cell has {} variables, expected at least {vars}",
                v.len(),
            )));
        }
        values.push(v.iter().copied().collect::<Values>());
    }
    let cell = Cell::new(r.kind, &points, &values)?;

    match screen.bounds_of(cell.points()) {
        Some(b) if b == r.bounds => Ok((cell, b)),
        _ => Err(Error::MalformedCell(format!(
            "recorded bounds {:?} do not match the cell",
            r.bounds
        ))),
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Outcome of decoding the messages delivered to one rank
#[derive(Debug, Default)]
pub struct Delivery {
    /// Cells decoded successfully
    pub received: usize,
    /// Records which failed validation and were discarded
    pub dropped: usize,
    /// Source ranks whose whole message could not be decoded
    pub undecodable: Vec<usize>,
}

/// Staging area for cells whose destination rank isn't known yet
#[derive(Default)]
pub struct CellBuffer {
    /// Cells staged locally, waiting for a partition
    outgoing: Vec<SerializedCell>,
    /// Cells delivered to this rank, waiting for extraction
    incoming: Vec<(Cell, ScreenBounds)>,
}

impl CellBuffer {
    /// Builds an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Defers a cell, packing it for later transmission
    pub fn store(
        &mut self,
        cell: &Cell,
        bounds: ScreenBounds,
    ) -> Result<(), Error> {
        self.outgoing.push(SerializedCell::encode(cell, bounds)?);
        Ok(())
    }

    /// Returns the number of staged cells
    pub fn len(&self) -> usize {
        self.outgoing.len()
    }

    /// Checks whether any cells are staged
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    /// Adds the estimated sampling work of staged cells to `work`
    ///
    /// `work[y]` accumulates the expected sample count of scanline `y`,
    /// based only on each cell's screen footprint.
    pub fn estimate_samples_per_scanline(&self, work: &mut [f64]) {
        for c in &self.outgoing {
            add_footprint(work, c.bounds());
        }
    }

    /// Packs staged cells into one message per rank
    ///
    /// A cell goes to every rank whose scanlines (padded by `margin`) overlap
    /// its footprint.  The buffer is emptied.  Returns the messages, indexed
    /// by destination rank, and the number of records packed.
    pub fn construct_messages(
        &mut self,
        partition: &ImagePartition,
        margin: usize,
    ) -> Result<(Vec<Vec<u8>>, usize), Error> {
        let mut records: Vec<Vec<Vec<u8>>> = vec![vec![]; partition.ranks()];
        let mut count = 0;
        for cell in self.outgoing.drain(..) {
            let dest = partition
                .destinations(&cell.bounds, margin)
                .collect::<Vec<_>>();
            let Some((last, rest)) = dest.split_last() else {
                continue;
            };
            for r in rest {
                records[*r].push(cell.bytes.clone());
            }
            records[*last].push(cell.bytes);
            count += dest.len();
        }
        let messages = records
            .iter()
            .map(bincode::serialize)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((messages, count))
    }

    /// Decodes messages delivered to this rank, indexed by source rank
    ///
    /// Valid cells are kept for [`CellBuffer::extract_cells`]; malformed
    /// records are logged and dropped.
    pub fn receive(
        &mut self,
        messages: Vec<Vec<u8>>,
        screen: &Screen,
        vars: usize,
    ) -> Delivery {
        let mut out = Delivery::default();
        for (src, msg) in messages.into_iter().enumerate() {
            let records: Vec<Vec<u8>> = match bincode::deserialize(&msg) {
                Ok(r) => r,
                Err(e) => {
                    warn!("could not decode message from rank {src}: {e}");
                    out.undecodable.push(src);
                    continue;
                }
            };
            for bytes in records {
                match decode_record(&bytes, screen, vars) {
                    Ok(c) => {
                        self.incoming.push(c);
                        out.received += 1;
                    }
                    Err(e) => {
                        warn!("dropping cell from rank {src}: {e}");
                        out.dropped += 1;
                    }
                }
            }
        }
        out
    }

    /// Extracts every received cell into a volume, emptying the buffer
    ///
    /// Returns the number of samples produced.
    pub fn extract_cells(
        &mut self,
        volume: &mut SampleVolume,
        threads: Option<&ThreadPool>,
        cancel: &CancelToken,
    ) -> Result<usize, Error> {
        let cells = std::mem::take(&mut self.incoming);
        extract_all(&cells, volume, threads, cancel)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbitrate::MaxValueArbitrator;

    fn tet() -> (Cell, ScreenBounds, Screen) {
        let screen = Screen::new(8, 8, 8);
        let cell = Cell::with_scalars(
            CellKind::Tetrahedron,
            &[
                Point3::new(-0.9, -0.9, -0.9),
                Point3::new(0.9, -0.9, -0.9),
                Point3::new(-0.9, 0.9, -0.9),
                Point3::new(-0.9, -0.9, 0.9),
            ],
            &[0.0, 1.0, 2.0, 3.0],
        )
        .unwrap();
        let bounds = screen.bounds_of(cell.points()).unwrap();
        (cell, bounds, screen)
    }

    #[test]
    fn encode_decode() {
        let (cell, bounds, screen) = tet();
        let s = SerializedCell::encode(&cell, bounds).unwrap();
        assert!(!s.is_empty());
        assert_eq!(s.bounds(), &bounds);
        let (out, b) = s.decode(&screen, 1).unwrap();
        assert_eq!(out, cell);
        assert_eq!(b, bounds);
    }

    #[test]
    fn rejects_bad_records() {
        let (cell, bounds, screen) = tet();
        let s = SerializedCell::encode(&cell, bounds).unwrap();

        // Truncated
        let mut short = s.clone();
        short.bytes.truncate(s.len() / 2);
        assert!(short.decode(&screen, 1).is_err());

        // Wrong version
        let mut stale = s.clone();
        stale.bytes[0] ^= 0xFF;
        assert!(matches!(
            stale.decode(&screen, 1),
            Err(Error::MalformedCell(..))
        ));

        // Too few variables
        assert!(s.clone().decode(&screen, 2).is_err());

        // Camera changed since the cell was packed
        let other = Screen::new(16, 16, 8);
        assert!(matches!(
            s.decode(&other, 1),
            Err(Error::MalformedCell(..))
        ));
    }

    #[test]
    fn routing() {
        let (cell, bounds, screen) = tet();
        let mut buf = CellBuffer::new();
        buf.store(&cell, bounds).unwrap();
        assert_eq!(buf.len(), 1);

        let mut work = vec![0.0; screen.height()];
        buf.estimate_samples_per_scanline(&mut work);
        assert!(work.iter().all(|w| *w > 0.0));

        // The tet spans every scanline, so it goes to every rank
        let partition = ImagePartition::uniform(8, 3);
        let (messages, count) = buf.construct_messages(&partition, 0).unwrap();
        assert!(buf.is_empty());
        assert_eq!(messages.len(), 3);
        assert_eq!(count, 3);

        let mut rx = CellBuffer::new();
        let d = rx.receive(messages, &screen, 1);
        assert_eq!(d.received, 3);
        assert_eq!(d.dropped, 0);
        assert!(d.undecodable.is_empty());

        let arb = MaxValueArbitrator::default();
        let mut v = SampleVolume::new(screen, 0..8, 1, &arb).unwrap();
        let n = rx
            .extract_cells(&mut v, None, &CancelToken::new())
            .unwrap();
        assert!(n > 0);
        assert!(v.occupied_count() > 0);
        let again = rx.extract_cells(&mut v, None, &CancelToken::new());
        assert_eq!(again.unwrap(), 0);
    }

    #[test]
    fn corrupt_messages() {
        let (cell, bounds, screen) = tet();
        let good = SerializedCell::encode(&cell, bounds).unwrap();
        let mut bad = good.clone();
        bad.bytes.truncate(3);
        let msg =
            bincode::serialize(&vec![good.bytes.clone(), bad.bytes]).unwrap();

        let mut rx = CellBuffer::new();
        let d = rx.receive(vec![msg, vec![0xFF; 3]], &screen, 1);
        assert_eq!(d.received, 1);
        assert_eq!(d.dropped, 1);
        assert_eq!(d.undecodable, vec![1]);
    }
}
