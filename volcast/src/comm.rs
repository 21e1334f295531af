//! Message passing between cooperating renderers
//!
//! A distributed render runs one [`VolumeRenderer`](crate::VolumeRenderer)
//! per rank.  Ranks only meet at three collective operations, modeled by the
//! [`Communicator`] trait: summing the work estimate, exchanging cells, and
//! gathering image strips.
//!
//! [`SingleProcess`] is the trivial one-rank group.  [`LocalGroup`] runs
//! several ranks on threads of one process, which is how the tests and demos
//! exercise multi-rank renders; an MPI-style runtime would implement the same
//! trait.
use crate::Error;
use crossbeam_channel::{Receiver, Sender, unbounded};

/// Collective operations used by a distributed render
///
/// Every rank must call the same sequence of collectives; each call blocks
/// until its peers have made the matching call.
pub trait Communicator {
    /// Returns this rank's index, in `0..size()`
    fn rank(&self) -> usize;

    /// Returns the number of ranks in the group
    fn size(&self) -> usize;

    /// Sums `data` element-wise across all ranks, in place
    ///
    /// Contributions are summed in rank order, so every rank sees the same
    /// floating-point result.
    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<(), Error>;

    /// Sends `outgoing[i]` to rank `i` and returns the messages received,
    /// indexed by source rank
    ///
    /// `outgoing` must have exactly [`size()`](Self::size) entries.
    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, Error>;

    /// Collects one message from every rank on rank 0
    ///
    /// Rank 0 receives `Some(messages)` indexed by source rank; every other
    /// rank receives `None`.
    fn gather(&self, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, Error>;
}

/// A group containing only the calling process
#[derive(Copy, Clone, Debug, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn all_reduce_sum(&self, _data: &mut [f64]) -> Result<(), Error> {
        Ok(())
    }
    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, Error> {
        if outgoing.len() != 1 {
            return Err(Error::MalformedMessage(format!(
                "expected 1 outgoing message, got {}",
                outgoing.len()
            )));
        }
        Ok(outgoing)
    }
    fn gather(&self, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, Error> {
        Ok(Some(vec![data]))
    }
}

////////////////////////////////////////////////////////////////////////////////

/// One rank of a group of in-process ranks
///
/// Each ordered pair of ranks is connected by its own unbounded channel, so
/// messages between two ranks arrive in the order they were sent.  Dropping a
/// rank disconnects it; peers blocked on it then see [`Error::Comm`].
pub struct LocalGroup {
    rank: usize,
    /// `tx[j]` sends to rank `j`
    tx: Vec<Sender<Vec<u8>>>,
    /// `rx[i]` receives from rank `i`
    rx: Vec<Receiver<Vec<u8>>>,
}

impl LocalGroup {
    /// Builds a fully-connected group of `n` ranks
    ///
    /// The returned vector is indexed by rank; each entry is typically moved
    /// into its own thread.
    pub fn new(n: usize) -> Vec<LocalGroup> {
        let mut tx = vec![vec![]; n];
        let mut rx = vec![vec![]; n];
        for sender in tx.iter_mut() {
            for receivers in rx.iter_mut() {
                let (s, r) = unbounded();
                sender.push(s);
                receivers.push(r);
            }
        }
        tx.into_iter()
            .zip(rx)
            .enumerate()
            .map(|(rank, (tx, rx))| LocalGroup { rank, tx, rx })
            .collect()
    }

    fn send(&self, to: usize, data: Vec<u8>) -> Result<(), Error> {
        self.tx[to]
            .send(data)
            .map_err(|_| Error::Comm(format!("rank {to} has disconnected")))
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>, Error> {
        self.rx[from]
            .recv()
            .map_err(|_| Error::Comm(format!("rank {from} has disconnected")))
    }
}

impl Communicator for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.tx.len()
    }

    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<(), Error> {
        let bytes = bincode::serialize(&*data)?;
        for to in 0..self.size() {
            self.send(to, bytes.clone())?;
        }
        let mut sum = vec![0.0; data.len()];
        for from in 0..self.size() {
            let v: Vec<f64> = bincode::deserialize(&self.recv(from)?)?;
            if v.len() != sum.len() {
                return Err(Error::MalformedMessage(format!(
                    "rank {from} reduced {} values, expected {}",
                    v.len(),
                    sum.len()
                )));
            }
            for (s, v) in sum.iter_mut().zip(v) {
                *s += v;
            }
        }
        data.copy_from_slice(&sum);
        Ok(())
    }

    fn exchange(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, Error> {
        if outgoing.len() != self.size() {
            return Err(Error::MalformedMessage(format!(
                "expected {} outgoing messages, got {}",
                self.size(),
                outgoing.len()
            )));
        }
        for (to, msg) in outgoing.into_iter().enumerate() {
            self.send(to, msg)?;
        }
        (0..self.size()).map(|from| self.recv(from)).collect()
    }

    fn gather(&self, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, Error> {
        self.send(0, data)?;
        if self.rank == 0 {
            let out = (0..self.size())
                .map(|from| self.recv(from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn run<T: Send, F: Fn(LocalGroup) -> T + Sync>(n: usize, f: F) -> Vec<T> {
        std::thread::scope(|s| {
            let handles = LocalGroup::new(n)
                .into_iter()
                .map(|g| s.spawn(|| f(g)))
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn all_reduce() {
        let out = run(4, |g| {
            let mut v = vec![g.rank() as f64, 1.0];
            g.all_reduce_sum(&mut v).unwrap();
            v
        });
        for v in out {
            assert_eq!(v, vec![6.0, 4.0]);
        }
    }

    #[test]
    fn exchange() {
        let out = run(3, |g| {
            let msgs = (0..g.size())
                .map(|to| vec![g.rank() as u8, to as u8])
                .collect();
            (g.rank(), g.exchange(msgs).unwrap())
        });
        for (rank, msgs) in out {
            for (from, m) in msgs.iter().enumerate() {
                assert_eq!(m, &[from as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn gather() {
        let out = run(3, |g| g.gather(vec![g.rank() as u8; 2]).unwrap());
        assert_eq!(out[0], Some(vec![vec![0, 0], vec![1, 1], vec![2, 2]]));
        assert_eq!(out[1], None);
        assert_eq!(out[2], None);
    }

    #[test]
    fn disconnect() {
        let mut g = LocalGroup::new(2);
        g.pop();
        let r = g[0].exchange(vec![vec![], vec![]]);
        assert!(matches!(r, Err(Error::Comm(..))));
    }

    #[test]
    fn single() {
        let p = SingleProcess;
        let mut v = [1.0, 2.0];
        p.all_reduce_sum(&mut v).unwrap();
        assert_eq!(v, [1.0, 2.0]);
        assert_eq!(p.exchange(vec![vec![1]]).unwrap(), vec![vec![1]]);
        assert!(p.exchange(vec![]).is_err());
    }
}
