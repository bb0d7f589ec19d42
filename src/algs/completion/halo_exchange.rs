//! Summation of shared-node contributions across workers.
//!
//! Every worker holds a pair of assembled values (mass term, right-hand side)
//! per local node. After [`HaloExchanger::exchange`] every copy of a shared
//! node holds the sum over all workers that own it, as if the mesh had never
//! been split. Interior nodes are left untouched.
//!
//! Two strategies produce identical totals:
//!
//! * **Ring**: `P - 1` fixed-size steps. Each step a worker forwards the
//!   buffer it last received to its successor, receives its predecessor's,
//!   and adds every record whose global id it owns. Messages are padded to
//!   the largest boundary of the group, gathered once on the first exchange.
//! * **Pairwise**: one message per neighbour rank holding exactly the nodes
//!   shared with it.
//!
//! Received values are added into a separate accumulator that starts from
//! the worker's own values, so the result does not depend on arrival order.

use crate::algs::communicator::{CommTag, Communicator, Wait, recv_bytes};
use crate::algs::completion::size_exchange::all_gather_u64;
use crate::algs::wire::{WireCount, WireHaloRecord, cast_slice, decode_records, expect_exact_len};
use crate::config::HaloStrategy;
use crate::mesh_error::MeshHaloError;
use crate::overlap::WorkerBoundary;
use crate::partitioning::PartitionId;
use crate::topology::LocalMesh;
use hashbrown::HashMap;

/// Base tag of the halo protocol; sub-tags are derived with `offset`.
pub const HALO_TAG: CommTag = CommTag::new(0x4A00);

const RING_TAG: CommTag = HALO_TAG;
const PAIRWISE_TAG: CommTag = HALO_TAG.offset(1);
const CAPACITY_TAG: CommTag = HALO_TAG.offset(2);

/// Per-worker halo plan, built once after the boundary is known.
#[derive(Clone, Debug)]
pub struct HaloExchanger {
    rank: PartitionId,
    num_nodes: usize,
    strategy: HaloStrategy,
    /// `(local, global)` of every shared node, ascending.
    shared: Vec<(u32, u32)>,
    /// Global id → index into `shared`.
    lookup: HashMap<u32, usize>,
    /// Neighbour rank → indices into `shared`.
    links: Vec<(PartitionId, Vec<usize>)>,
    /// Ring message capacity in records; gathered on first use.
    capacity: Option<usize>,
}

impl HaloExchanger {
    pub fn new(
        mesh: &LocalMesh,
        boundary: &WorkerBoundary,
        strategy: HaloStrategy,
    ) -> Result<Self, MeshHaloError> {
        if boundary.descriptors().len() != mesh.num_nodes() {
            return Err(MeshHaloError::Config(format!(
                "rank {}: {} boundary descriptors for {} nodes",
                mesh.rank(),
                boundary.descriptors().len(),
                mesh.num_nodes()
            )));
        }
        let shared: Vec<(u32, u32)> = boundary
            .shared_nodes()
            .into_iter()
            .map(|l| (l, mesh.global_id(l)))
            .collect();
        let lookup = shared
            .iter()
            .enumerate()
            .map(|(i, &(_, g))| (g, i))
            .collect();
        let links = boundary
            .neighbour_ranks()
            .into_iter()
            .map(|peer| {
                let idx = shared
                    .iter()
                    .enumerate()
                    .filter(|(_, (l, _))| {
                        boundary
                            .descriptor(*l)
                            .is_some_and(|d| d.peers.contains(peer))
                    })
                    .map(|(i, _)| i)
                    .collect();
                (peer, idx)
            })
            .collect();
        Ok(Self {
            rank: mesh.rank(),
            num_nodes: mesh.num_nodes(),
            strategy,
            shared,
            lookup,
            links,
            capacity: None,
        })
    }

    pub fn strategy(&self) -> HaloStrategy {
        self.strategy
    }

    pub fn num_shared(&self) -> usize {
        self.shared.len()
    }

    /// Ranks this worker exchanges with under the pairwise strategy.
    pub fn neighbours(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.links.iter().map(|(p, _)| *p)
    }

    /// Sum `value1` / `value2` over every worker sharing each node.
    ///
    /// Collective: every worker of the group must call it, in the same
    /// iteration order.
    pub fn exchange<C>(
        &mut self,
        comm: &C,
        value1: &mut [f64],
        value2: &mut [f64],
    ) -> Result<(), MeshHaloError>
    where
        C: Communicator + ?Sized,
    {
        if value1.len() != self.num_nodes || value2.len() != self.num_nodes {
            return Err(MeshHaloError::Config(format!(
                "rank {}: halo arrays hold {}/{} values for {} nodes",
                self.rank,
                value1.len(),
                value2.len(),
                self.num_nodes
            )));
        }
        if comm.size() == 1 {
            return Ok(());
        }

        let mut acc: Vec<(f64, f64)> = self
            .shared
            .iter()
            .map(|&(l, _)| (value1[l as usize], value2[l as usize]))
            .collect();
        match self.strategy {
            HaloStrategy::Ring => self.ring(comm, &mut acc)?,
            HaloStrategy::Pairwise => self.pairwise(comm, &mut acc)?,
        }
        for (&(l, _), &(a, b)) in self.shared.iter().zip(&acc) {
            value1[l as usize] = a;
            value2[l as usize] = b;
        }
        Ok(())
    }

    fn own_records(&self, acc: &[(f64, f64)]) -> Vec<WireHaloRecord> {
        self.shared
            .iter()
            .zip(acc)
            .map(|(&(_, g), &(a, b))| WireHaloRecord::new(g, a, b))
            .collect()
    }

    fn ring_capacity<C>(&mut self, comm: &C) -> Result<usize, MeshHaloError>
    where
        C: Communicator + ?Sized,
    {
        if let Some(cap) = self.capacity {
            return Ok(cap);
        }
        let counts = all_gather_u64(comm, CAPACITY_TAG, self.shared.len() as u64)?;
        let cap = counts.into_iter().max().unwrap_or(0) as usize;
        log::debug!("rank {}: ring halo capacity {cap} records", self.rank);
        self.capacity = Some(cap);
        Ok(cap)
    }

    fn ring<C>(&mut self, comm: &C, acc: &mut [(f64, f64)]) -> Result<(), MeshHaloError>
    where
        C: Communicator + ?Sized,
    {
        let cap = self.ring_capacity(comm)?;
        let size = comm.size();
        let me = comm.rank();
        let next = (me + 1) % size;
        let prev = (me + size - 1) % size;
        let msg_len = WireCount::SIZE + cap * WireHaloRecord::SIZE;

        let mut travelling = self.own_records(acc);
        for step in 1..size {
            let mut msg = Vec::with_capacity(msg_len);
            msg.extend_from_slice(cast_slice(&[WireCount::new(travelling.len())]));
            msg.extend_from_slice(cast_slice(&travelling));
            msg.resize(msg_len, 0);

            let send = comm.isend(next, RING_TAG.as_u16(), &msg);
            let received = recv_bytes(comm, prev, RING_TAG);
            send.wait()?;
            let bytes = received?;

            expect_exact_len(bytes.len(), msg_len).map_err(|e| MeshHaloError::comm(prev, e))?;
            let (head, body) = bytes.split_at(WireCount::SIZE);
            let n = decode_records::<WireCount>(head)
                .map_err(|e| MeshHaloError::comm(prev, e))?
                .first()
                .map_or(0, WireCount::get);
            if n > cap {
                return Err(MeshHaloError::comm(
                    prev,
                    format!("ring step {step}: {n} records exceed capacity {cap}"),
                ));
            }
            let mut records: Vec<WireHaloRecord> =
                decode_records(body).map_err(|e| MeshHaloError::comm(prev, e))?;
            records.truncate(n);

            let mut hits = 0;
            for rec in &records {
                if let Some(i) = self.index_of(rec) {
                    let (a, b) = rec.values();
                    acc[i].0 += a;
                    acc[i].1 += b;
                    hits += 1;
                }
            }
            log::trace!("rank {me}: ring step {step}, {n} records in, {hits} matched");
            travelling = records;
        }
        Ok(())
    }

    fn pairwise<C>(&self, comm: &C, acc: &mut [(f64, f64)]) -> Result<(), MeshHaloError>
    where
        C: Communicator + ?Sized,
    {
        let own = self.own_records(acc);
        let mut sends = Vec::with_capacity(self.links.len());
        for (peer, idx) in &self.links {
            let out: Vec<WireHaloRecord> = idx.iter().map(|&i| own[i]).collect();
            sends.push(comm.isend(*peer, PAIRWISE_TAG.as_u16(), cast_slice(&out)));
        }

        let mut maybe_err = None;
        for (peer, idx) in &self.links {
            let step = recv_bytes(comm, *peer, PAIRWISE_TAG).and_then(|bytes| {
                let records: Vec<WireHaloRecord> =
                    decode_records(&bytes).map_err(|e| MeshHaloError::comm(*peer, e))?;
                if records.len() != idx.len() {
                    return Err(MeshHaloError::comm(
                        *peer,
                        format!("sent {} records, expected {}", records.len(), idx.len()),
                    ));
                }
                for rec in &records {
                    let i = self.index_of(rec).ok_or_else(|| {
                        MeshHaloError::comm(*peer, format!("node {} is not shared here", rec.gid()))
                    })?;
                    let (a, b) = rec.values();
                    acc[i].0 += a;
                    acc[i].1 += b;
                }
                Ok(())
            });
            if let Err(e) = step {
                maybe_err.get_or_insert(e);
            }
        }
        for send in sends {
            if let Err(e) = send.wait() {
                maybe_err.get_or_insert(e);
            }
        }
        match maybe_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn index_of(&self, rec: &WireHaloRecord) -> Option<usize> {
        u32::try_from(rec.gid())
            .ok()
            .and_then(|g| self.lookup.get(&g).copied())
    }
}
