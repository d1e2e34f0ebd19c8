//! MPI backend for the [`Comm`](super::Comm) façade.
//!
//! Wraps a duplicated world communicator so internal collectives never
//! alias collectives issued by the caller. Point-to-point messages own
//! their staging buffers for the lifetime of the request; collectives map
//! onto native MPI operations.

use super::{Comm, Wait};
use mpi::collective::SystemOperation;
use mpi::request::StaticScope;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

pub struct MpiComm {
    // Keep the universe alive; dropping it finalizes MPI.
    _universe: mpi::environment::Universe,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Initializes MPI and duplicates the world communicator.
    ///
    /// # Panics
    /// Panics if MPI initialization fails.
    pub fn new() -> Self {
        let universe = mpi::initialize().unwrap();
        let world = universe.world().duplicate();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiComm {
            _universe: universe,
            world,
            rank,
            size,
        }
    }
}

pub struct MpiSendHandle {
    req: Option<mpi::request::Request<'static>>,
    buf: *mut [u8],
}

// The raw buffer pointer is only touched by wait().
unsafe impl Send for MpiSendHandle {}

impl Wait for MpiSendHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(req) = self.req.take() {
            req.wait();
        }
        unsafe { drop(Box::from_raw(self.buf)) };
        None
    }
}

pub struct MpiRecvHandle {
    req: Option<mpi::request::Request<'static>>,
    buf: *mut [u8],
}

unsafe impl Send for MpiRecvHandle {}

impl Wait for MpiRecvHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(req) = self.req.take() {
            req.wait();
        }
        let boxed = unsafe { Box::from_raw(self.buf) };
        Some(boxed.into_vec())
    }
}

impl Comm for MpiComm {
    type SendHandle = MpiSendHandle;
    type RecvHandle = MpiRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
        let staged: Box<[u8]> = buf.to_vec().into_boxed_slice();
        let ptr = Box::into_raw(staged);
        let stable: &'static [u8] = unsafe { &*ptr };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_send_with_tag(StaticScope, stable, tag as i32);
        MpiSendHandle {
            req: Some(req),
            buf: ptr,
        }
    }

    fn irecv(&self, peer: usize, tag: u16, len: usize) -> MpiRecvHandle {
        let staged: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(staged);
        let stable: &'static mut [u8] = unsafe { &mut *ptr };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_receive_into_with_tag(StaticScope, stable, tag as i32);
        MpiRecvHandle {
            req: Some(req),
            buf: ptr,
        }
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        // Variable-length gather: lengths first, then a varcount gather.
        let mut lens = vec![0u64; self.size];
        self.world.all_gather_into(&(local.len() as u64), &mut lens[..]);

        let counts: Vec<mpi::Count> = lens.iter().map(|&l| l as mpi::Count).collect();
        let displs: Vec<mpi::Count> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let total: usize = lens.iter().map(|&l| l as usize).sum();
        let mut flat = vec![0u8; total];
        {
            let mut partition =
                mpi::datatype::PartitionMut::new(&mut flat[..], counts, &displs[..]);
            self.world.all_gather_varcount_into(local, &mut partition);
        }
        let mut out = Vec::with_capacity(self.size);
        let mut offset = 0;
        for &l in &lens {
            let l = l as usize;
            out.push(flat[offset..offset + l].to_vec());
            offset += l;
        }
        out
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        let mut y = 0.0;
        self.world
            .all_reduce_into(&x, &mut y, SystemOperation::sum());
        y
    }

    fn all_reduce_sum_many(&self, xs: &[f64], out: &mut [f64]) {
        self.world
            .all_reduce_into(xs, out, SystemOperation::sum());
    }

    fn barrier(&self) {
        self.world.barrier();
    }
}
