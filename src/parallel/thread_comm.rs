//! In-process multi-rank communicator backed by mailboxes.
//!
//! Each logical rank runs on its own thread and exchanges byte messages
//! through a shared mailbox table keyed by `(src, dst, tag)`. Messages
//! with the same key are delivered in FIFO order, which is exactly the
//! ordering guarantee the halo engine relies on. Used to exercise the
//! partition, halo, and gather-scatter machinery across several ranks
//! without an MPI launcher.

use super::{Comm, Wait};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct Mailboxes {
    slots: Mutex<HashMap<Key, VecDeque<Vec<u8>>>>,
    delivered: Condvar,
}

/// Shared state for a set of in-process ranks.
pub struct ThreadWorld {
    size: usize,
    mail: Mailboxes,
}

impl ThreadWorld {
    /// Create a world of `size` ranks and hand out one communicator per rank.
    pub fn new(size: usize) -> Vec<ThreadComm> {
        let world = Arc::new(ThreadWorld {
            size,
            mail: Mailboxes::default(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                world: world.clone(),
                rank,
            })
            .collect()
    }
}

/// One rank's endpoint into a [`ThreadWorld`].
#[derive(Clone)]
pub struct ThreadComm {
    world: Arc<ThreadWorld>,
    rank: usize,
}

pub struct ThreadRecvHandle {
    world: Arc<ThreadWorld>,
    key: Key,
    len: usize,
}

impl Wait for ThreadRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let mut slots = self.world.mail.slots.lock().unwrap();
        loop {
            if let Some(queue) = slots.get_mut(&self.key) {
                if let Some(msg) = queue.pop_front() {
                    debug_assert_eq!(msg.len(), self.len, "message length mismatch");
                    return Some(msg);
                }
            }
            slots = self.world.mail.delivered.wait(slots).unwrap();
        }
    }
}

impl Comm for ThreadComm {
    type SendHandle = ();
    type RecvHandle = ThreadRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        let mut slots = self.world.mail.slots.lock().unwrap();
        slots.entry(key).or_default().push_back(buf.to_vec());
        self.world.mail.delivered.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16, len: usize) -> ThreadRecvHandle {
        ThreadRecvHandle {
            world: self.world.clone(),
            key: (peer, self.rank, tag),
            len,
        }
    }
}

/// Run `f` on every rank of a fresh `size`-rank world, one thread per
/// rank, and collect the per-rank results in rank order.
pub fn spawn_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(ThreadComm) -> R + Send + Sync + 'static,
{
    let comms = ThreadWorld::new(size);
    let f = Arc::new(f);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_two_ranks() {
        let results = spawn_ranks(2, |comm| {
            let peer = 1 - comm.rank();
            let recv = comm.irecv(peer, 7, 4);
            comm.isend(peer, 7, &[comm.rank() as u8; 4]);
            recv.wait().unwrap()
        });
        assert_eq!(results[0], vec![1u8; 4]);
        assert_eq!(results[1], vec![0u8; 4]);
    }

    #[test]
    fn all_gather_and_reduce() {
        let results = spawn_ranks(4, |comm| {
            let gathered = comm.all_gather_u64(10 + comm.rank() as u64);
            let total = comm.all_reduce_sum(comm.rank() as f64);
            (gathered, total)
        });
        for (gathered, total) in results {
            assert_eq!(gathered, vec![10, 11, 12, 13]);
            assert_eq!(total, 6.0);
        }
    }

    #[test]
    fn fifo_per_key() {
        let results = spawn_ranks(2, |comm| {
            if comm.rank() == 0 {
                comm.isend(1, 3, &[1]);
                comm.isend(1, 3, &[2]);
                Vec::new()
            } else {
                let a = comm.irecv(0, 3, 1).wait().unwrap();
                let b = comm.irecv(0, 3, 1).wait().unwrap();
                vec![a[0], b[0]]
            }
        });
        assert_eq!(results[1], vec![1, 2]);
    }
}
