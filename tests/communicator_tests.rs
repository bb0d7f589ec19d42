use mesh_halo::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait, recv_bytes};
use mesh_halo::algs::completion::exchange_all_bytes;
use mesh_halo::prelude::*;
use std::time::{Duration, Instant};

#[test]
fn thread_round_trip_and_tag_isolation() {
    let comms = ThreadComm::world(2, None).unwrap();
    const TAG_A: CommTag = CommTag::new(0xA100);
    const TAG_B: CommTag = CommTag::new(0xB200);

    comms[0].isend(1, TAG_A.as_u16(), b"alpha").wait().unwrap();
    comms[0].isend(1, TAG_B.as_u16(), b"beta").wait().unwrap();
    assert_eq!(recv_bytes(&comms[1], 0, TAG_B).unwrap(), b"beta");
    assert_eq!(recv_bytes(&comms[1], 0, TAG_A).unwrap(), b"alpha");
}

#[test]
fn personalised_all_to_all() {
    let out = run_workers(3, None, |c| {
        let outgoing = (0..c.size())
            .map(|p| vec![c.rank() as u8, p as u8])
            .collect();
        exchange_all_bytes(c, CommTag::new(0x2000), outgoing)
    })
    .unwrap();
    for (me, incoming) in out.iter().enumerate() {
        for (src, msg) in incoming.iter().enumerate() {
            assert_eq!(msg, &vec![src as u8, me as u8]);
        }
    }
}

#[test]
fn serial_collectives_never_touch_the_wire() {
    let out = exchange_all_bytes(&NoComm, CommTag::new(1), vec![vec![9]]).unwrap();
    assert_eq!(out, vec![vec![9]]);
    NoComm.barrier().unwrap();
}

#[test]
fn stalled_peer_hits_the_deadline() {
    let start = Instant::now();
    let err = run_workers(3, Some(Duration::from_millis(100)), |c| {
        if c.rank() == 2 {
            // never joins the barrier, only waits for a message nobody sends
            recv_bytes(c, 0, CommTag::new(0x3000))?;
        }
        c.barrier()
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Communication);
    assert!(matches!(err, MeshHaloError::Timeout { .. }), "{err}");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn failure_inside_a_collective_does_not_hang_the_group() {
    let err = run_workers(4, None, |c| {
        let outgoing = vec![Vec::new(); c.size()];
        exchange_all_bytes(c, CommTag::new(0x4000), outgoing)?;
        if c.rank() == 3 {
            return Err(MeshHaloError::CapacityExceeded {
                global_id: 12,
                capacity: 4,
            });
        }
        // ranks 0..3 would wait here forever without the abort
        c.barrier()?;
        c.barrier()
    })
    .unwrap_err();
    assert!(matches!(
        err,
        MeshHaloError::CapacityExceeded { global_id: 12, .. }
    ));
}
