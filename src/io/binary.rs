//! Fixed-width binary arrays (4-byte ints, 8-byte reals) in a configurable
//! byte order.
//!
//! Every mesh file is a flat array of one of the two widths. Readers either
//! take the whole file or a record range `[offset, offset + count)`; a file
//! that ends early is reported as [`MeshHaloError::TruncatedFile`].

use crate::config::Endian;
use crate::mesh_error::MeshHaloError;
use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub const INT_WIDTH: usize = 4;
pub const REAL_WIDTH: usize = 8;

/// Encoder/decoder for one byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Codec {
    endian: Endian,
}

impl Codec {
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Decode whole 4-byte records; trailing bytes are ignored.
    pub fn decode_i32s(&self, bytes: &[u8]) -> Vec<i32> {
        let mut out = vec![0i32; bytes.len() / INT_WIDTH];
        let src = &bytes[..out.len() * INT_WIDTH];
        match self.endian {
            Endian::Big => BigEndian::read_i32_into(src, &mut out),
            Endian::Little => LittleEndian::read_i32_into(src, &mut out),
            Endian::Native => NativeEndian::read_i32_into(src, &mut out),
        }
        out
    }

    /// Decode whole 8-byte records; trailing bytes are ignored.
    pub fn decode_f64s(&self, bytes: &[u8]) -> Vec<f64> {
        let mut out = vec![0f64; bytes.len() / REAL_WIDTH];
        let src = &bytes[..out.len() * REAL_WIDTH];
        match self.endian {
            Endian::Big => BigEndian::read_f64_into(src, &mut out),
            Endian::Little => LittleEndian::read_f64_into(src, &mut out),
            Endian::Native => NativeEndian::read_f64_into(src, &mut out),
        }
        out
    }

    pub fn encode_i32s(&self, values: &[i32]) -> Vec<u8> {
        let mut out = vec![0u8; values.len() * INT_WIDTH];
        match self.endian {
            Endian::Big => BigEndian::write_i32_into(values, &mut out),
            Endian::Little => LittleEndian::write_i32_into(values, &mut out),
            Endian::Native => NativeEndian::write_i32_into(values, &mut out),
        }
        out
    }

    pub fn encode_f64s(&self, values: &[f64]) -> Vec<u8> {
        let mut out = vec![0u8; values.len() * REAL_WIDTH];
        match self.endian {
            Endian::Big => BigEndian::write_f64_into(values, &mut out),
            Endian::Little => LittleEndian::write_f64_into(values, &mut out),
            Endian::Native => NativeEndian::write_f64_into(values, &mut out),
        }
        out
    }

    /// Read a whole file of ints; its size must be a whole number of records.
    pub fn read_i32s(&self, path: &Path) -> Result<Vec<i32>, MeshHaloError> {
        let bytes = read_whole(path, INT_WIDTH)?;
        Ok(self.decode_i32s(&bytes))
    }

    /// Read a whole file of reals; its size must be a whole number of records.
    pub fn read_f64s(&self, path: &Path) -> Result<Vec<f64>, MeshHaloError> {
        let bytes = read_whole(path, REAL_WIDTH)?;
        Ok(self.decode_f64s(&bytes))
    }

    /// Read `count` ints starting at int index `offset`.
    pub fn read_i32_range(
        &self,
        path: &Path,
        offset: usize,
        count: usize,
    ) -> Result<Vec<i32>, MeshHaloError> {
        let bytes = read_range(path, offset, count, INT_WIDTH)?;
        Ok(self.decode_i32s(&bytes))
    }

    /// Read `count` reals starting at real index `offset`.
    pub fn read_f64_range(
        &self,
        path: &Path,
        offset: usize,
        count: usize,
    ) -> Result<Vec<f64>, MeshHaloError> {
        let bytes = read_range(path, offset, count, REAL_WIDTH)?;
        Ok(self.decode_f64s(&bytes))
    }

    pub fn write_i32s(&self, path: &Path, values: &[i32]) -> Result<(), MeshHaloError> {
        fs::write(path, self.encode_i32s(values)).map_err(|e| MeshHaloError::io(path, e))
    }

    pub fn write_f64s(&self, path: &Path, values: &[f64]) -> Result<(), MeshHaloError> {
        fs::write(path, self.encode_f64s(values)).map_err(|e| MeshHaloError::io(path, e))
    }
}

fn read_whole(path: &Path, width: usize) -> Result<Vec<u8>, MeshHaloError> {
    let bytes = fs::read(path).map_err(|e| MeshHaloError::io(path, e))?;
    if bytes.len() % width != 0 {
        let whole = (bytes.len() / width + 1) * width;
        return Err(MeshHaloError::TruncatedFile {
            path: path.to_path_buf(),
            expected: whole as u64,
            found: bytes.len() as u64,
        });
    }
    Ok(bytes)
}

/// Records `[offset, offset + count)` of `width` bytes each. A range past the
/// end of the file, including one too large to address, is a truncation.
fn read_range(
    path: &Path,
    offset: usize,
    count: usize,
    width: usize,
) -> Result<Vec<u8>, MeshHaloError> {
    let mut file = File::open(path).map_err(|e| MeshHaloError::io(path, e))?;
    let size = file
        .metadata()
        .map_err(|e| MeshHaloError::io(path, e))?
        .len();
    let span = offset
        .checked_mul(width)
        .zip(count.checked_mul(width))
        .and_then(|(start, len)| Some((start, len, start.checked_add(len)?)));
    let (start, len) = match span {
        Some((start, len, end)) if end as u64 <= size => (start, len),
        Some((_, _, end)) => {
            return Err(MeshHaloError::TruncatedFile {
                path: path.to_path_buf(),
                expected: end as u64,
                found: size,
            });
        }
        None => {
            return Err(MeshHaloError::TruncatedFile {
                path: path.to_path_buf(),
                expected: u64::MAX,
                found: size,
            });
        }
    };
    file.seek(SeekFrom::Start(start as u64))
        .map_err(|e| MeshHaloError::io(path, e))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)
        .map_err(|e| MeshHaloError::io(path, e))?;
    Ok(buf)
}
