//! A process group whose ranks are threads of the current process.
//!
//! Each collective deposits one packet per rank into a shared slot table,
//! waits on a barrier, reads every slot and waits again so that no rank can
//! overwrite its slot before the slowest reader is done.

use std::sync::{Arc, Barrier, Mutex};

use tracing::trace;

use super::{Entry, GroupHandle, ProcessGroup};
use crate::error::{MatrixError, Result};

#[derive(Debug, Clone)]
enum Packet {
    Sizes(Vec<usize>),
    Scalars(Vec<f64>),
    Indexed(Vec<(usize, f64)>),
    Entries(Vec<Entry>),
}

impl Packet {
    fn kind(&self) -> &'static str {
        match self {
            Packet::Sizes(_) => "all_gather_sizes",
            Packet::Scalars(_) => "all_gather_scalars",
            Packet::Indexed(_) => "all_gather_indexed",
            Packet::Entries(_) => "all_gather_entries",
        }
    }
}

#[derive(Debug)]
struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Option<Packet>>>,
}

/// One rank of an in-process group.
///
/// Create all ranks at once with [`ThreadGroup::create`] and move each handle
/// to its own thread. Every rank must enter each collective, in the same
/// order; a rank that skips one leaves the others blocked on the barrier.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Creates the handles for a group of `size` ranks, indexed by rank.
    pub fn create(size: usize) -> Vec<GroupHandle> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![None; size]),
        });

        (0..size)
            .map(|rank| {
                Arc::new(ThreadGroup {
                    rank,
                    size,
                    shared: Arc::clone(&shared),
                }) as GroupHandle
            })
            .collect()
    }

    fn exchange(&self, packet: Packet) -> Result<Vec<Packet>> {
        let kind = packet.kind();
        trace!(rank = self.rank, kind, "entering collective");

        // Both barriers are always reached, even after a poisoned lock, so an
        // error on one rank does not strand the others.
        let deposited = self
            .shared
            .slots
            .lock()
            .map(|mut slots| slots[self.rank] = Some(packet));
        self.shared.barrier.wait();
        let gathered = self.shared.slots.lock().map(|slots| slots.clone());
        self.shared.barrier.wait();

        deposited.map_err(|_| poisoned(kind))?;
        let gathered = gathered.map_err(|_| poisoned(kind))?;

        gathered
            .into_iter()
            .enumerate()
            .map(|(rank, slot)| {
                let packet = slot.ok_or_else(|| {
                    MatrixError::Communication(format!("rank {} deposited nothing for {}", rank, kind))
                })?;
                if packet.kind() != kind {
                    return Err(MatrixError::Communication(format!(
                        "collective mismatch: rank {} entered {} while rank {} entered {}",
                        self.rank,
                        kind,
                        rank,
                        packet.kind()
                    )));
                }
                Ok(packet)
            })
            .collect()
    }
}

fn poisoned(kind: &str) -> MatrixError {
    MatrixError::Communication(format!("slot table poisoned during {}", kind))
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_sizes(&self, values: &[usize]) -> Result<Vec<Vec<usize>>> {
        self.exchange(Packet::Sizes(values.to_vec()))?
            .into_iter()
            .map(|packet| match packet {
                Packet::Sizes(v) => Ok(v),
                other => Err(unexpected(other)),
            })
            .collect()
    }

    fn all_gather_scalars(&self, values: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.exchange(Packet::Scalars(values.to_vec()))?
            .into_iter()
            .map(|packet| match packet {
                Packet::Scalars(v) => Ok(v),
                other => Err(unexpected(other)),
            })
            .collect()
    }

    fn all_gather_indexed(&self, values: &[(usize, f64)]) -> Result<Vec<Vec<(usize, f64)>>> {
        self.exchange(Packet::Indexed(values.to_vec()))?
            .into_iter()
            .map(|packet| match packet {
                Packet::Indexed(v) => Ok(v),
                other => Err(unexpected(other)),
            })
            .collect()
    }

    fn all_gather_entries(&self, entries: &[Entry]) -> Result<Vec<Vec<Entry>>> {
        self.exchange(Packet::Entries(entries.to_vec()))?
            .into_iter()
            .map(|packet| match packet {
                Packet::Entries(v) => Ok(v),
                other => Err(unexpected(other)),
            })
            .collect()
    }
}

fn unexpected(packet: Packet) -> MatrixError {
    MatrixError::Communication(format!("unexpected {} packet", packet.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_gather_sizes() {
        let groups = ThreadGroup::create(3);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = groups
                .iter()
                .map(|g| s.spawn(move || g.all_gather_sizes(&[g.rank() * 10]).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for gathered in results {
            assert_eq!(gathered, vec![vec![0], vec![10], vec![20]]);
        }
    }

    #[test]
    fn test_exclusive_scan_and_sum() {
        let groups = ThreadGroup::create(4);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = groups
                .iter()
                .map(|g| {
                    s.spawn(move || {
                        let scan = g.exclusive_scan(g.rank() + 1).unwrap();
                        let sum = g.all_sum(&[1.0, g.rank() as f64]).unwrap();
                        (scan, sum)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results[0].0, (0, 10));
        assert_eq!(results[2].0, (3, 10));
        assert_eq!(results[3].1, vec![4.0, 6.0]);
    }

    #[test]
    fn test_mismatched_collectives_are_reported() {
        let groups = ThreadGroup::create(2);
        let results: Vec<_> = std::thread::scope(|s| {
            let a = &groups[0];
            let b = &groups[1];
            let ha = s.spawn(move || a.all_gather_sizes(&[1]).map(|_| ()));
            let hb = s.spawn(move || b.all_gather_scalars(&[1.0]).map(|_| ()));
            vec![ha.join().unwrap(), hb.join().unwrap()]
        });

        for result in results {
            assert!(matches!(result, Err(MatrixError::Communication(_))));
        }
    }
}
