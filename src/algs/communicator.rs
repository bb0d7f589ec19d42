//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Sends never block; receives block inside `.wait()` until the message has
//! fully arrived, so callers only ever inspect complete buffers.
//!
//! Every blocking point (receive, barrier) observes the group's abort flag:
//! once any worker calls [`Communicator::abort`], all pending and future waits
//! on every worker return [`MeshHaloError::Aborted`] instead of hanging.

use crate::mesh_error::MeshHaloError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Message tag; protocols reserve a base tag and derive sub-tags with `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Message-passing interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Collective rendezvous of every worker in the group.
    fn barrier(&self) -> Result<(), MeshHaloError>;

    /// Mark the whole group failed and wake every blocked peer.
    fn abort(&self, reason: &str);
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Result<Option<Vec<u8>>, MeshHaloError>;
}

impl Wait for () {
    fn wait(self) -> Result<Option<Vec<u8>>, MeshHaloError> {
        Ok(None)
    }
}

/// Receive a message and insist that it carries a payload.
pub fn recv_bytes<C: Communicator + ?Sized>(
    comm: &C,
    peer: usize,
    tag: CommTag,
) -> Result<Vec<u8>, MeshHaloError> {
    comm.irecv(peer, tag.as_u16())
        .wait()?
        .ok_or_else(|| MeshHaloError::comm(peer, "receive completed without data"))
}

/// Handle that is already resolved (successfully or not).
#[derive(Debug)]
pub struct Ready(Result<Option<Vec<u8>>, MeshHaloError>);

impl Wait for Ready {
    fn wait(self) -> Result<Option<Vec<u8>>, MeshHaloError> {
        self.0
    }
}

/// Compile-time no-op comm for pure serial runs (a group of one).
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = Ready;
    type RecvHandle = Ready;

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, peer: usize, _tag: u16, _buf: &[u8]) -> Ready {
        Ready(Err(MeshHaloError::comm(peer, "NoComm has no peers")))
    }
    fn irecv(&self, peer: usize, _tag: u16) -> Ready {
        Ready(Err(MeshHaloError::comm(peer, "NoComm has no peers")))
    }
    fn barrier(&self) -> Result<(), MeshHaloError> {
        Ok(())
    }
    fn abort(&self, reason: &str) {
        log::error!("serial run aborted: {reason}");
    }
}

// --- ThreadComm: intra-process / one thread per worker ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct HubState {
    arrived: usize,
    generation: u64,
    aborted: Option<String>,
}

#[derive(Debug)]
struct Hub {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    state: Mutex<HubState>,
    wake: Condvar,
    deadline: Option<Duration>,
}

impl Hub {
    fn pop(&self, key: &Key) -> Option<Bytes> {
        self.mailbox.get_mut(key).and_then(|mut q| q.pop_front())
    }

    /// Block on the condvar until `ready` holds, the group aborts, or the
    /// deadline passes. `ready` is evaluated with the state lock held.
    fn block_until<T>(
        &self,
        rank: usize,
        op: &'static str,
        mut ready: impl FnMut(&mut HubState) -> Option<T>,
    ) -> Result<T, MeshHaloError> {
        let start = Instant::now();
        let mut state = self.state.lock();
        loop {
            if let Some(out) = ready(&mut *state) {
                return Ok(out);
            }
            if let Some(reason) = &state.aborted {
                return Err(MeshHaloError::Aborted {
                    rank,
                    reason: reason.clone(),
                });
            }
            match self.deadline {
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        state.aborted = Some(format!("rank {rank} timed out in {op}"));
                        self.wake.notify_all();
                        return Err(MeshHaloError::Timeout {
                            op,
                            rank,
                            after: limit,
                        });
                    }
                    self.wake.wait_for(&mut state, limit - elapsed);
                }
                None => self.wake.wait(&mut state),
            }
        }
    }
}

/// In-process endpoint; one per worker thread, all sharing a hub.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    hub: Arc<Hub>,
}

impl ThreadComm {
    /// Create `size` connected endpoints, rank `i` at index `i`.
    pub fn world(size: usize, deadline: Option<Duration>) -> Result<Vec<ThreadComm>, MeshHaloError> {
        if size == 0 {
            return Err(MeshHaloError::Config(
                "a worker group needs at least one worker".into(),
            ));
        }
        let hub = Arc::new(Hub {
            size,
            mailbox: DashMap::new(),
            state: Mutex::new(HubState::default()),
            wake: Condvar::new(),
            deadline,
        });
        Ok((0..size)
            .map(|rank| ThreadComm {
                rank,
                hub: Arc::clone(&hub),
            })
            .collect())
    }

    /// Whether any worker of the group has aborted.
    pub fn is_aborted(&self) -> bool {
        self.hub.state.lock().aborted.is_some()
    }
}

/// Pending receive on a [`ThreadComm`].
pub struct ThreadRecv {
    rank: usize,
    key: Key,
    hub: Arc<Hub>,
}

impl Wait for ThreadRecv {
    fn wait(self) -> Result<Option<Vec<u8>>, MeshHaloError> {
        let hub = &self.hub;
        let key = self.key;
        let bytes = hub.block_until(self.rank, "receive", |_| hub.pop(&key))?;
        Ok(Some(bytes.to_vec()))
    }
}

impl Communicator for ThreadComm {
    type SendHandle = Ready;
    type RecvHandle = ThreadRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.hub.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Ready {
        if peer >= self.hub.size {
            return Ready(Err(MeshHaloError::comm(peer, "no such rank")));
        }
        self.hub
            .mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        // Taking the state lock orders this notify after any receiver's
        // mailbox check, so the wake-up cannot be lost.
        let _state = self.hub.state.lock();
        self.hub.wake.notify_all();
        Ready(Ok(None))
    }

    fn irecv(&self, peer: usize, tag: u16) -> ThreadRecv {
        ThreadRecv {
            rank: self.rank,
            key: (peer, self.rank, tag),
            hub: Arc::clone(&self.hub),
        }
    }

    fn barrier(&self) -> Result<(), MeshHaloError> {
        let hub = &self.hub;
        let mut entered: Option<u64> = None;
        hub.block_until(self.rank, "barrier", |state| match entered {
            None => {
                if state.aborted.is_some() {
                    return None;
                }
                let generation = state.generation;
                state.arrived += 1;
                if state.arrived == hub.size {
                    state.arrived = 0;
                    state.generation += 1;
                    hub.wake.notify_all();
                    return Some(());
                }
                entered = Some(generation);
                None
            }
            Some(generation) => (state.generation != generation).then_some(()),
        })
    }

    fn abort(&self, reason: &str) {
        let mut state = self.hub.state.lock();
        if state.aborted.is_none() {
            log::error!("rank {} aborting worker group: {reason}", self.rank);
            state.aborted = Some(format!("rank {}: {reason}", self.rank));
        }
        self.hub.wake.notify_all();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Ready, Wait};
    use crate::mesh_error::MeshHaloError;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, MeshHaloError> {
            let universe = mpi::initialize()
                .ok_or_else(|| MeshHaloError::Config("MPI already initialized".into()))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Outstanding non-blocking send; owns its buffer until completion.
    pub struct MpiSend(Option<Box<dyn FnOnce()>>);

    impl Wait for MpiSend {
        fn wait(mut self) -> Result<Option<Vec<u8>>, MeshHaloError> {
            if let Some(complete) = self.0.take() {
                complete();
            }
            Ok(None)
        }
    }

    impl Drop for MpiSend {
        fn drop(&mut self) {
            if let Some(complete) = self.0.take() {
                complete();
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = Ready;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let owned: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation stays alive until the request completes
            // inside the closure, which then reclaims it exactly once.
            let data: &'static [u8] = unsafe { &*owned };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            MpiSend(Some(Box::new(move || {
                request.wait();
                drop(unsafe { Box::from_raw(owned) });
            })))
        }

        fn irecv(&self, peer: usize, tag: u16) -> Ready {
            // Every protocol in this crate posts its sends before receiving,
            // so completing the receive eagerly cannot deadlock.
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            Ready(Ok(Some(data)))
        }

        fn barrier(&self) -> Result<(), MeshHaloError> {
            self.world.barrier();
            Ok(())
        }

        fn abort(&self, reason: &str) {
            log::error!("rank {} aborting MPI job: {reason}", self.rank);
            self.world.abort(1)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
