//! Exposed receive buffers with an explicit deposit → barrier → consume protocol.
//!
//! An [`ExposedWindow`] is a worker's receive buffer sized to its own
//! partition. During the deposit epoch every worker routes each record it
//! holds to `(owner, slot)`; records for other workers travel as one message
//! per peer, records for itself land directly. A collective barrier closes the
//! epoch; only then does the owner drain its messages into the buffer. Each
//! slot may be written exactly once, which is what lets writers proceed
//! without coordinating among themselves.
//!
//! Sealing the window yields a read-only [`SealedWindow`] from which peers
//! can fetch individual slots in a second, barrier-separated epoch. The type
//! change makes "written while being read" unrepresentable.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::completion::size_exchange::exchange_all_bytes;
use crate::algs::wire::{WireSlot, cast_slice, decode_records};
use crate::mesh_error::MeshHaloError;
use crate::partitioning::PartitionId;
use bytemuck::Pod;

/// A value that can be deposited into, and fetched from, a window slot.
pub trait SlotRecord: Copy {
    type Wire: Pod;

    fn to_wire(&self, slot: usize) -> Self::Wire;
    fn from_wire(wire: &Self::Wire) -> (usize, Self);
}

/// A worker's receive buffer during the deposit epoch.
#[derive(Debug, Clone)]
pub struct ExposedWindow<T> {
    name: &'static str,
    slots: Vec<Option<T>>,
}

impl<T: SlotRecord> ExposedWindow<T> {
    pub fn new(name: &'static str, len: usize) -> Self {
        Self {
            name,
            slots: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run one complete deposit epoch.
    ///
    /// `puts` yields `(owner, slot, record)` for every record this worker
    /// holds. Collective: every worker of the group must call it with the
    /// same tag, even when it has nothing to deposit.
    pub fn deposit<C, I>(&mut self, comm: &C, tag: CommTag, puts: I) -> Result<(), MeshHaloError>
    where
        C: Communicator + ?Sized,
        I: IntoIterator<Item = (PartitionId, usize, T)>,
    {
        let me = comm.rank();
        let size = comm.size();
        let mut buckets: Vec<Vec<T::Wire>> = (0..size).map(|_| Vec::new()).collect();
        let mut local = 0usize;
        for (owner, slot, record) in puts {
            if owner >= size {
                return Err(MeshHaloError::IndexOutOfRange {
                    what: "deposit owner",
                    index: owner as i64,
                    bound: size,
                });
            }
            if owner == me {
                self.put(slot, record, me)?;
                local += 1;
            } else {
                buckets[owner].push(record.to_wire(slot));
            }
        }
        let remote: usize = buckets.iter().map(Vec::len).sum();
        log::debug!(
            "rank {me}: {} deposit epoch, {local} local and {remote} remote records",
            self.name
        );

        // phase A: post every write, then close the epoch
        let outgoing = buckets
            .iter()
            .map(|b| cast_slice(b).to_vec())
            .collect::<Vec<_>>();
        let incoming = exchange_all_bytes(comm, tag, outgoing)?;
        comm.barrier()?;

        // phase B: consume what peers wrote
        for (peer, bytes) in incoming.into_iter().enumerate() {
            if peer == me {
                continue;
            }
            let wires: Vec<T::Wire> =
                decode_records(&bytes).map_err(|e| MeshHaloError::comm(peer, e))?;
            for wire in &wires {
                let (slot, record) = T::from_wire(wire);
                self.put(slot, record, peer)?;
            }
        }
        Ok(())
    }

    fn put(&mut self, slot: usize, record: T, from: PartitionId) -> Result<(), MeshHaloError> {
        let len = self.slots.len();
        let cell = self.slots.get_mut(slot).ok_or(MeshHaloError::IndexOutOfRange {
            what: self.name,
            index: slot as i64,
            bound: len,
        })?;
        if cell.is_some() {
            return Err(MeshHaloError::Config(format!(
                "{} slot {slot} written twice (second write from rank {from})",
                self.name
            )));
        }
        *cell = Some(record);
        Ok(())
    }

    /// Finish the epoch; every slot must have been written exactly once.
    pub fn seal(self, rank: PartitionId) -> Result<SealedWindow<T>, MeshHaloError> {
        let name = self.name;
        let data = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(slot, cell)| {
                cell.ok_or_else(|| {
                    MeshHaloError::Config(format!(
                        "rank {rank}: {name} slot {slot} never written"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let served = vec![false; data.len()];
        Ok(SealedWindow {
            name,
            rank,
            data,
            served,
        })
    }
}

/// A completely written, read-only exposed buffer.
#[derive(Debug, Clone)]
pub struct SealedWindow<T> {
    name: &'static str,
    rank: PartitionId,
    data: Vec<T>,
    served: Vec<bool>,
}

impl<T: SlotRecord> SealedWindow<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Slots no fetch has read since the window was sealed, with their records.
    pub fn unfetched(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter(|(slot, _)| !self.served[*slot])
    }

    /// Run one fetch epoch: read `(owner, slot)` for each request from the
    /// owners' sealed buffers. Results come back in request order.
    ///
    /// Collective, like [`ExposedWindow::deposit`]. A full barrier opens the
    /// epoch so no fetch can overtake a deposit still being consumed.
    pub fn fetch<C>(
        &mut self,
        comm: &C,
        tag: CommTag,
        requests: &[(PartitionId, usize)],
    ) -> Result<Vec<T>, MeshHaloError>
    where
        C: Communicator + ?Sized,
    {
        let me = comm.rank();
        let size = comm.size();
        comm.barrier()?;

        let mut wanted: Vec<Vec<WireSlot>> = (0..size).map(|_| Vec::new()).collect();
        let mut origin: Vec<Vec<usize>> = (0..size).map(|_| Vec::new()).collect();
        let mut out: Vec<Option<T>> = vec![None; requests.len()];
        for (i, &(owner, slot)) in requests.iter().enumerate() {
            if owner == me {
                out[i] = Some(self.serve(slot, me)?);
            } else if owner < size {
                wanted[owner].push(WireSlot::of(slot));
                origin[owner].push(i);
            } else {
                return Err(MeshHaloError::IndexOutOfRange {
                    what: "fetch owner",
                    index: owner as i64,
                    bound: size,
                });
            }
        }
        let ghosts: usize = wanted.iter().map(Vec::len).sum();
        log::debug!("rank {me}: {} fetch epoch, {ghosts} remote slots", self.name);

        // requests out, requests in
        let outgoing = wanted.iter().map(|w| cast_slice(w).to_vec()).collect();
        let asked = exchange_all_bytes(comm, tag, outgoing)?;

        // serve peers from the sealed buffer
        let mut replies = Vec::with_capacity(size);
        for (peer, bytes) in asked.into_iter().enumerate() {
            if peer == me {
                replies.push(Vec::new());
                continue;
            }
            let slots: Vec<WireSlot> =
                decode_records(&bytes).map_err(|e| MeshHaloError::comm(peer, e))?;
            let served = slots
                .iter()
                .map(|s| self.serve(s.get(), peer).map(|r| r.to_wire(s.get())))
                .collect::<Result<Vec<_>, _>>()?;
            replies.push(cast_slice(&served).to_vec());
        }

        // answers back, in the order they were asked
        let answers = exchange_all_bytes(comm, tag.offset(1), replies)?;
        for (peer, bytes) in answers.into_iter().enumerate() {
            if peer == me {
                continue;
            }
            let wires: Vec<T::Wire> =
                decode_records(&bytes).map_err(|e| MeshHaloError::comm(peer, e))?;
            if wires.len() != origin[peer].len() {
                return Err(MeshHaloError::comm(
                    peer,
                    format!(
                        "asked for {} {} slots, got {}",
                        origin[peer].len(),
                        self.name,
                        wires.len()
                    ),
                ));
            }
            for (wire, &i) in wires.iter().zip(&origin[peer]) {
                let (slot, record) = T::from_wire(wire);
                if slot != requests[i].1 {
                    return Err(MeshHaloError::comm(
                        peer,
                        format!("reply for slot {slot}, expected {}", requests[i].1),
                    ));
                }
                out[i] = Some(record);
            }
        }

        out.into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.ok_or_else(|| {
                    MeshHaloError::comm(requests[i].0, format!("no reply for request {i}"))
                })
            })
            .collect()
    }

    fn serve(&mut self, slot: usize, peer: PartitionId) -> Result<T, MeshHaloError> {
        if let Some(hit) = self.served.get_mut(slot) {
            *hit = true;
        }
        self.data
            .get(slot)
            .copied()
            .ok_or_else(|| {
                log::warn!(
                    "rank {}: rank {peer} asked for {} slot {slot} of {}",
                    self.rank,
                    self.name,
                    self.data.len()
                );
                MeshHaloError::IndexOutOfRange {
                    what: self.name,
                    index: slot as i64,
                    bound: self.data.len(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};
    use crate::algs::wire::WireSlot;
    use std::thread;

    /// Test payload: the slot echoes a u64 value.
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Val(u64);

    impl SlotRecord for Val {
        type Wire = [WireSlot; 2];
        fn to_wire(&self, slot: usize) -> Self::Wire {
            [WireSlot::of(slot), WireSlot::of(self.0 as usize)]
        }
        fn from_wire(w: &Self::Wire) -> (usize, Self) {
            (w[0].get(), Val(w[1].get() as u64))
        }
    }

    #[test]
    fn reverse_scatter_over_three_workers() {
        // 9 items, 3 per worker; item i (read by worker i/3) goes to global
        // destination 8 - i.
        let comms = ThreadComm::world(3, None).unwrap();
        let sealed: Vec<Vec<Val>> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let me = c.rank();
                        let mut w = ExposedWindow::<Val>::new("test", 3);
                        let puts = (3 * me..3 * me + 3).map(|i| {
                            let dest = 8 - i;
                            (dest / 3, dest % 3, Val(i as u64))
                        });
                        w.deposit(c, CommTag(100), puts)?;
                        let mut sealed = w.seal(me)?;
                        // everyone fetches slot 0 of every worker
                        let got = sealed.fetch(c, CommTag(200), &[(0, 0), (1, 0), (2, 0)])?;
                        assert_eq!(got, vec![Val(8), Val(5), Val(2)]);
                        let idle: Vec<usize> = sealed.unfetched().map(|(slot, _)| slot).collect();
                        assert_eq!(idle, vec![1, 2]);
                        Ok::<_, MeshHaloError>(sealed.into_vec())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });
        assert_eq!(sealed[0], vec![Val(8), Val(7), Val(6)]);
        assert_eq!(sealed[2], vec![Val(2), Val(1), Val(0)]);
    }

    #[test]
    fn double_write_is_rejected() {
        let mut w = ExposedWindow::<Val>::new("test", 2);
        let err = w
            .deposit(&NoComm, CommTag(1), [(0, 1, Val(1)), (0, 1, Val(2))])
            .unwrap_err();
        assert!(matches!(err, MeshHaloError::Config(_)));
    }

    #[test]
    fn hole_is_rejected_on_seal() {
        let mut w = ExposedWindow::<Val>::new("test", 2);
        w.deposit(&NoComm, CommTag(1), [(0, 0, Val(1))]).unwrap();
        assert!(matches!(w.seal(0), Err(MeshHaloError::Config(_))));
    }

    #[test]
    fn local_fetches_count_as_served() {
        let mut w = ExposedWindow::<Val>::new("test", 3);
        w.deposit(&NoComm, CommTag(1), (0..3).map(|i| (0, i, Val(10 + i as u64))))
            .unwrap();
        let mut sealed = w.seal(0).unwrap();
        assert_eq!(sealed.unfetched().count(), 3);
        let got = sealed.fetch(&NoComm, CommTag(2), &[(0, 2), (0, 0), (0, 2)]).unwrap();
        assert_eq!(got, vec![Val(12), Val(10), Val(12)]);
        let idle: Vec<_> = sealed.unfetched().collect();
        assert_eq!(idle, vec![(1, &Val(11))]);
    }

    #[test]
    fn out_of_range_slot_is_an_index_error() {
        let mut w = ExposedWindow::<Val>::new("test", 1);
        let err = w.deposit(&NoComm, CommTag(1), [(0, 4, Val(1))]).unwrap_err();
        assert!(matches!(err, MeshHaloError::IndexOutOfRange { index: 4, .. }));
    }
}
