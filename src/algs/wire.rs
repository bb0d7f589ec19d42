//! Fixed, versioned, little-endian wire types for scatter and halo paths.
//!
//! All multi-byte fields are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`; floating-point values travel as their IEEE bit patterns.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Decode a packed record array from a received (possibly unaligned) buffer.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(format!(
            "{} bytes is not a whole number of {width}-byte records",
            bytes.len()
        ));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

#[inline]
fn f64_le(v: f64) -> u64 {
    v.to_bits().to_le()
}

#[inline]
fn f64_from_le(v: u64) -> f64 {
    f64::from_bits(u64::from_le(v))
}

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}
impl WireCount {
    pub const SIZE: usize = 4;
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A slot index inside a peer's exposed buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireSlot {
    pub slot_le: u64,
}
impl WireSlot {
    pub fn of(slot: usize) -> Self {
        Self {
            slot_le: (slot as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.slot_le) as usize
    }
}

/// A bare global node id.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGlobalId {
    pub id_le: u32,
}
impl WireGlobalId {
    pub fn of(id: u32) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u32 {
        u32::from_le(self.id_le)
    }
}

// ===== Mesh scatter ========================================================

/// Element deposit: destination slot, global connectivity, face tags.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireElement {
    pub slot_le: u64,
    pub conn_le: [u32; 3],
    pub tags_le: [i32; 3],
}
impl WireElement {
    pub const SIZE: usize = 32;
    pub fn new(slot: usize, conn: [u32; 3], tags: [i32; 3]) -> Self {
        Self {
            slot_le: (slot as u64).to_le(),
            conn_le: conn.map(u32::to_le),
            tags_le: tags.map(i32::to_le),
        }
    }
    pub fn slot(&self) -> usize {
        u64::from_le(self.slot_le) as usize
    }
    pub fn conn(&self) -> [u32; 3] {
        self.conn_le.map(u32::from_le)
    }
    pub fn tags(&self) -> [i32; 3] {
        self.tags_le.map(i32::from_le)
    }
}

/// Node deposit / fetch reply: slot, original global id, coordinates, value.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNode {
    pub slot_le: u64,
    pub gid_le: u64,
    pub x_le: u64,
    pub y_le: u64,
    pub value_le: u64,
}
impl WireNode {
    pub const SIZE: usize = 40;
    pub fn new(slot: usize, gid: u32, coord: [f64; 2], value: f64) -> Self {
        Self {
            slot_le: (slot as u64).to_le(),
            gid_le: u64::from(gid).to_le(),
            x_le: f64_le(coord[0]),
            y_le: f64_le(coord[1]),
            value_le: f64_le(value),
        }
    }
    pub fn slot(&self) -> usize {
        u64::from_le(self.slot_le) as usize
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn coord(&self) -> [f64; 2] {
        [f64_from_le(self.x_le), f64_from_le(self.y_le)]
    }
    pub fn value(&self) -> f64 {
        f64_from_le(self.value_le)
    }
}

// ===== Halo exchange =======================================================

/// One shared-node contribution `(globalId, value1, value2)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHaloRecord {
    pub gid_le: u64,
    pub v1_le: u64,
    pub v2_le: u64,
}
impl WireHaloRecord {
    pub const SIZE: usize = 24;
    pub fn new(gid: u32, v1: f64, v2: f64) -> Self {
        Self {
            gid_le: u64::from(gid).to_le(),
            v1_le: f64_le(v1),
            v2_le: f64_le(v2),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn values(&self) -> (f64, f64) {
        (f64_from_le(self.v1_le), f64_from_le(self.v2_le))
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireCount>() == WireCount::SIZE);
    assert!(size_of::<WireSlot>() == 8);
    assert!(size_of::<WireGlobalId>() == 4);
    assert!(size_of::<WireElement>() == WireElement::SIZE);
    assert!(size_of::<WireNode>() == WireNode::SIZE);
    assert!(size_of::<WireHaloRecord>() == WireHaloRecord::SIZE);
    assert!(align_of::<WireHaloRecord>() == 8);
};
