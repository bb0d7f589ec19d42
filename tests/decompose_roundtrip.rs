mod util;
use util::*;

use mesh_halo::io::{Codec, reassemble, worker_dir};
use mesh_halo::prelude::*;
use serial_test::serial;
use std::fs;

#[test]
#[serial]
fn worker_files_reassemble_to_the_global_mesh() {
    let fx = grid(5, 4, true);
    let (eperm, nperm) = random_permutations(&fx, 3, 7);
    let mesh_dir = scratch("roundtrip-mesh");
    let out_dir = scratch("roundtrip-out");
    fx.write(&mesh_dir, &eperm, &nperm, Endian::Little);
    let cfg = util::config(&mesh_dir, &out_dir, 3, Endian::Little);

    decompose_to_disk(&cfg).unwrap();
    let back = reassemble(&out_dir, &cfg.files, Codec::new(cfg.endian), 3, fx.nn()).unwrap();
    assert_eq!(back.coords, fx.coords);
    assert_permutation(&back.elements, &fx.elements);

    // one node more than the trees hold is a coverage gap
    let err = reassemble(&out_dir, &cfg.files, Codec::new(cfg.endian), 3, fx.nn() + 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration, "{err}");
    let err = reassemble(&out_dir, &cfg.files, Codec::new(cfg.endian), 3, fx.nn() - 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index, "{err}");

    // the field travelled with the nodes
    for r in 0..3 {
        let tree = read_worker_tree(&out_dir, &cfg.files, Codec::new(cfg.endian), r, -1.0).unwrap();
        assert!(tree.metadata.has_field);
        for (l, &g) in tree.mesh.local_to_global().iter().enumerate() {
            assert_eq!(tree.mesh.field()[l], g as f64 * 1.5);
        }
    }
}

#[test]
#[serial]
fn decomposing_twice_is_byte_identical() {
    let fx = grid(4, 4, false);
    let (eperm, nperm) = random_permutations(&fx, 4, 11);
    let mesh_dir = scratch("idem-mesh");
    fx.write(&mesh_dir, &eperm, &nperm, Endian::Big);

    let first = scratch("idem-a");
    let second = scratch("idem-b");
    decompose_to_disk(&util::config(&mesh_dir, &first, 4, Endian::Big)).unwrap();
    decompose_to_disk(&util::config(&mesh_dir, &second, 4, Endian::Big)).unwrap();
    let a = snapshot(&first);
    let b = snapshot(&second);
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[test]
#[serial]
fn single_worker_has_no_boundary() {
    let fx = grid(3, 2, false);
    let eperm = Permutation::identity(vec![fx.ne()]);
    let nperm = Permutation::identity(vec![fx.nn()]);
    let mesh_dir = scratch("single-mesh");
    let out_dir = scratch("single-out");
    fx.write(&mesh_dir, &eperm, &nperm, Endian::Big);

    let summary = decompose_to_disk(&util::config(&mesh_dir, &out_dir, 1, Endian::Big)).unwrap();
    assert_eq!(summary[0].shared, 0);
    assert_eq!(summary[0].nn, fx.nn());
}

#[test]
#[serial]
fn inconsistent_counts_fail_before_writing() {
    let fx = two_triangles();
    let eperm = Permutation::new(vec![0, 1], vec![1, 2]);
    let nperm = Permutation::identity(vec![2, 2]);
    let mesh_dir = scratch("counts-mesh");
    let out_dir = scratch("counts-out");
    fx.write(&mesh_dir, &eperm, &nperm, Endian::Big);

    let err = decompose_to_disk(&util::config(&mesh_dir, &out_dir, 2, Endian::Big)).unwrap_err();
    assert!(matches!(
        err,
        MeshHaloError::PartitionCountMismatch {
            expected: 2,
            found: 3,
            ..
        }
    ));
    assert!(snapshot(&out_dir).is_empty());
}

#[test]
#[serial]
fn wrong_endianness_is_caught_as_bad_index() {
    let fx = two_triangles();
    let mesh_dir = scratch("endian-mesh");
    let out_dir = scratch("endian-out");
    fx.write(
        &mesh_dir,
        &Permutation::identity(vec![1, 1]),
        &Permutation::identity(vec![2, 2]),
        Endian::Little,
    );
    let err = decompose_to_disk(&util::config(&mesh_dir, &out_dir, 2, Endian::Big)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);
}

#[test]
#[serial]
fn unreferenced_node_is_rejected() {
    let mut fx = two_triangles();
    fx.coords.push([5.0, 5.0]);
    let mesh_dir = scratch("orphan-mesh");
    let out_dir = scratch("orphan-out");
    fx.write(
        &mesh_dir,
        &Permutation::identity(vec![1, 1]),
        &Permutation::identity(vec![3, 2]),
        Endian::Big,
    );
    let err = decompose_to_disk(&util::config(&mesh_dir, &out_dir, 2, Endian::Big)).unwrap_err();
    assert!(matches!(&err, MeshHaloError::Config(m) if m.contains("node 4")), "{err}");
    assert!(snapshot(&out_dir).is_empty());
}

#[test]
#[serial]
fn oversized_counts_in_minf_are_typed_errors() {
    let fx = two_triangles();
    let mesh_dir = scratch("huge-mesh");
    let out_dir = scratch("huge-out");
    fx.write(
        &mesh_dir,
        &Permutation::identity(vec![1, 1]),
        &Permutation::identity(vec![2, 2]),
        Endian::Big,
    );
    let cfg = util::config(&mesh_dir, &out_dir, 2, Endian::Big);

    fs::write(mesh_dir.join("minf"), "ne 4611686018427387904\nnn 4\n").unwrap();
    let err = decompose_to_disk(&cfg).unwrap_err();
    assert!(matches!(err, MeshHaloError::MalformedInfo { .. }), "{err}");

    fs::write(mesh_dir.join("minf"), "ne 4294967295\nnn 4\n").unwrap();
    let err = decompose_to_disk(&cfg).unwrap_err();
    assert!(matches!(err, MeshHaloError::TruncatedFile { .. }), "{err}");
}

#[test]
#[serial]
fn stale_field_is_not_read_back() {
    let with = grid(3, 2, true);
    let mut without = with.clone();
    without.field = None;
    let eperm = Permutation::identity(vec![with.ne()]);
    let nperm = Permutation::identity(vec![with.nn()]);
    let with_dir = scratch("stale-with");
    let without_dir = scratch("stale-without");
    let out_dir = scratch("stale-out");
    with.write(&with_dir, &eperm, &nperm, Endian::Big);
    without.write(&without_dir, &eperm, &nperm, Endian::Big);

    decompose_to_disk(&util::config(&with_dir, &out_dir, 1, Endian::Big)).unwrap();
    let data = worker_dir(&out_dir, 0).join("data");
    assert!(data.exists());

    let cfg = util::config(&without_dir, &out_dir, 1, Endian::Big);
    decompose_to_disk(&cfg).unwrap();
    assert!(!data.exists());

    // a data file the metadata does not announce is ignored
    fs::write(&data, vec![0u8; with.nn() * 8]).unwrap();
    let tree = read_worker_tree(&out_dir, &cfg.files, Codec::new(cfg.endian), 0, 42.0).unwrap();
    assert!(!tree.metadata.has_field);
    assert!(tree.mesh.field().iter().all(|&v| v == 42.0));
}

#[test]
#[serial]
fn unsorted_procb_ids_are_rejected() {
    let fx = two_triangles();
    let mesh_dir = scratch("procb-mesh");
    let out_dir = scratch("procb-out");
    fx.write(
        &mesh_dir,
        &Permutation::identity(vec![1, 1]),
        &Permutation::identity(vec![2, 2]),
        Endian::Big,
    );
    let cfg = util::config(&mesh_dir, &out_dir, 2, Endian::Big);
    decompose_to_disk(&cfg).unwrap();

    let codec = Codec::new(cfg.endian);
    let procb = worker_dir(&out_dir, 0).join("procb");
    let mut raw = codec.read_i32s(&procb).unwrap();
    // swap the global ids of the first two records
    raw.swap(0, 6);
    codec.write_i32s(&procb, &raw).unwrap();

    let err = read_worker_tree(&out_dir, &cfg.files, codec, 0, 0.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration, "{err}");
}
