//! Small collectives built from point-to-point messages.
//!
//! Every helper posts all of its sends first, then waits for every receive
//! without returning early, and drains all send handles before reporting the
//! first error. A failed exchange therefore never leaves a send in flight.

use crate::algs::communicator::{CommTag, Communicator, Wait, recv_bytes};
use crate::mesh_error::MeshHaloError;

/// Personalised all-to-all: `outgoing[p]` goes to rank `p`; the result holds
/// at index `p` what rank `p` sent here. The own slot is passed through
/// without touching the communicator.
pub fn exchange_all_bytes<C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    mut outgoing: Vec<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, MeshHaloError> {
    let size = comm.size();
    let me = comm.rank();
    if outgoing.len() != size {
        return Err(MeshHaloError::WorkerCountMismatch {
            expected: size,
            found: outgoing.len(),
        });
    }

    // 1) post all sends
    let mut pending_sends = Vec::with_capacity(size.saturating_sub(1));
    for (peer, buf) in outgoing.iter().enumerate() {
        if peer != me {
            pending_sends.push(comm.isend(peer, tag.as_u16(), buf));
        }
    }

    // 2) wait for all receives (but do not early-return)
    let mut incoming = vec![Vec::new(); size];
    let mut maybe_err = None;
    for (peer, slot) in incoming.iter_mut().enumerate() {
        if peer == me {
            *slot = std::mem::take(&mut outgoing[me]);
            continue;
        }
        match recv_bytes(comm, peer, tag) {
            Ok(data) => *slot = data,
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            Err(_) => {}
        }
    }

    // 3) always drain all send handles before returning
    for send in pending_sends {
        if let Err(e) = send.wait() {
            maybe_err.get_or_insert(e);
        }
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Every rank contributes one value; every rank receives all of them,
/// indexed by rank.
pub fn all_gather_u64<C: Communicator + ?Sized>(
    comm: &C,
    tag: CommTag,
    value: u64,
) -> Result<Vec<u64>, MeshHaloError> {
    let bytes = value.to_le_bytes().to_vec();
    let incoming = exchange_all_bytes(comm, tag, vec![bytes; comm.size()])?;
    incoming
        .into_iter()
        .enumerate()
        .map(|(peer, data)| {
            let raw: [u8; 8] = data.as_slice().try_into().map_err(|_| {
                MeshHaloError::comm(peer, format!("expected 8 bytes, got {}", data.len()))
            })?;
            Ok(u64::from_le_bytes(raw))
        })
        .collect()
}
