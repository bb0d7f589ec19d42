mod util;
use util::*;

use mesh_halo::prelude::*;
use mesh_halo::io::Codec;
use mesh_halo::io::partitioned::read_worker_metadata;
use serial_test::serial;

fn perms() -> (Permutation, Permutation) {
    // worker 0 owns element 0, worker 1 element 1; nodes 0,1 | 2,3
    (
        Permutation::identity(vec![1, 1]),
        Permutation::identity(vec![2, 2]),
    )
}

#[test]
fn registry_marks_nodes_one_and_two() {
    let fx = two_triangles();
    let (eperm, _) = perms();
    let arena = decompose(&fx.global(0.0), &eperm).unwrap();
    assert_eq!(arena[0].num_nodes(), 3);
    assert_eq!(arena[1].num_nodes(), 3);

    let reg = BoundaryRegistry::build(&arena).unwrap();
    for (w, peer) in [(0usize, 1u32), (1, 0)] {
        let wb = reg.worker(w).unwrap();
        let mesh = &arena[w];
        let shared: Vec<u32> = wb
            .shared_nodes()
            .into_iter()
            .map(|l| mesh.global_id(l))
            .collect();
        assert_eq!(shared, vec![1, 2]);
        for g in [1, 2] {
            let d = wb.descriptor(mesh.local_id(g).unwrap()).unwrap();
            assert_eq!(d.share_count(), 1);
            assert_eq!(d.peers.as_slice(), &[peer]);
        }
    }
}

#[test]
fn halo_sums_node_one_on_both_workers() {
    let fx = two_triangles();
    let (eperm, _) = perms();
    let arena = decompose(&fx.global(0.0), &eperm).unwrap();
    let reg = BoundaryRegistry::build(&arena).unwrap();

    for strategy in [HaloStrategy::Ring, HaloStrategy::Pairwise] {
        let out = run_workers(2, None, |c| {
            let mesh = &arena[c.rank()];
            let mut ex = HaloExchanger::new(mesh, reg.worker(c.rank()).unwrap(), strategy)?;
            let mut m = vec![0.0; mesh.num_nodes()];
            let mut rhs = vec![0.0; mesh.num_nodes()];
            let l = mesh.local_id(1).unwrap() as usize;
            (m[l], rhs[l]) = if c.rank() == 0 { (1.0, 2.0) } else { (3.0, 4.0) };
            ex.exchange(c, &mut m, &mut rhs)?;
            Ok((m[l], rhs[l]))
        })
        .unwrap();
        assert_eq!(out, vec![(4.0, 6.0), (4.0, 6.0)], "{strategy:?}");
    }
}

#[test]
#[serial]
fn files_and_parallel_read_agree_on_the_scenario() {
    let fx = two_triangles();
    let (eperm, nperm) = perms();
    let mesh_dir = scratch("worked-mesh");
    let out_dir = scratch("worked-out");
    fx.write(&mesh_dir, &eperm, &nperm, Endian::Big);
    let cfg = util::config(&mesh_dir, &out_dir, 2, Endian::Big);

    let summary = decompose_to_disk(&cfg).unwrap();
    assert_eq!(summary.len(), 2);
    assert!(summary.iter().all(|s| s.ne == 1 && s.nn == 3 && s.shared == 2));
    // no global data file, so no worker data file either
    assert!(!summary[0].dir.join("data").exists());
    assert_eq!(read_worker_metadata(&out_dir, 1).unwrap().size, 2);

    let from_files: Vec<_> = (0..2)
        .map(|r| read_worker_tree(&out_dir, &cfg.files, Codec::new(cfg.endian), r, 0.0).unwrap())
        .collect();
    let from_read = run_workers(2, cfg.comm_deadline(), |c| setup_worker(c, &cfg)).unwrap();
    for (tree, (mesh, boundary)) in from_files.iter().zip(&from_read) {
        assert_eq!(&tree.mesh, mesh);
        assert_eq!(&tree.boundary, boundary);
    }
}
