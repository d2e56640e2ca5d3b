//! Low-level binary encode/decode helpers shared by every sub-block writer
//! in `model.rs`. Every sub-block body is followed by a `crc32fast`
//! checksum of its bytes (§4.10).

use crate::error::{Result, StorageError};
use lm_math::{compress_zero_runs, decompress_zero_runs, dequantize_short, quantize_short, NumericFlags};

pub fn calculate_checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Appends `body` length-prefixed-by-nothing (the caller already knows
/// where the block ends) plus its checksum.
pub fn write_block(out: &mut Vec<u8>, magic: [u8; 4], body: &[u8]) {
    out.extend_from_slice(&magic);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&calculate_checksum(body).to_le_bytes());
}

pub struct Writer {
    pub buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }

    pub fn string(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    pub fn f32_slice_plain(&mut self, data: &[f32]) {
        self.u32(data.len() as u32);
        for v in data {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn u32_slice(&mut self, data: &[u32]) {
        self.u32(data.len() as u32);
        for v in data {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn i16_slice(&mut self, data: &[i16]) {
        self.u32(data.len() as u32);
        for v in data {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Encodes `data` under `flags`, writing the original element count
    /// first so the reader can size its output without re-deriving it from
    /// the codec's own lengths (zero-run compression changes run vs.
    /// nonzero counts independently).
    pub fn f32_slice_flagged(&mut self, flags: NumericFlags, data: &[f32]) {
        self.u32(data.len() as u32);
        if flags.contains(NumericFlags::SHORT_QUANTIZED) && flags.contains(NumericFlags::ZERO_COMPRESSED) {
            let (codes, scale) = quantize_short(data);
            self.buf.extend_from_slice(&scale.to_le_bytes());
            let as_f32: Vec<f32> = codes.iter().map(|&c| c as f32).collect();
            let (runs, nonzero) = compress_zero_runs(&as_f32);
            self.u32_slice(&runs);
            let nonzero_codes: Vec<i16> = nonzero.iter().map(|&v| v as i16).collect();
            self.i16_slice(&nonzero_codes);
        } else if flags.contains(NumericFlags::SHORT_QUANTIZED) {
            let (codes, scale) = quantize_short(data);
            self.buf.extend_from_slice(&scale.to_le_bytes());
            self.i16_slice(&codes);
        } else if flags.contains(NumericFlags::ZERO_COMPRESSED) {
            let (runs, nonzero) = compress_zero_runs(data);
            self.u32_slice(&runs);
            self.buf.extend_from_slice(&(nonzero.len() as u32).to_le_bytes());
            for v in &nonzero {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
        } else {
            for v in data {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor over a byte slice with typed read helpers; every read returns
/// `StorageError::InvalidFormat` on truncation instead of panicking.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(StorageError::invalid_format(format!(
                "truncated block: needed {n} bytes, {} remaining",
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StorageError::invalid_format(format!("invalid utf-8: {e}")))
    }

    pub fn f32_slice_plain(&mut self) -> Result<Vec<f32>> {
        let len = self.u32()? as usize;
        let bytes = self.take(len * 4)?;
        Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
    }

    pub fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn u32_slice(&mut self) -> Result<Vec<u32>> {
        let len = self.u32()? as usize;
        (0..len).map(|_| self.u32()).collect()
    }

    pub fn i16_slice(&mut self) -> Result<Vec<i16>> {
        let len = self.u32()? as usize;
        let bytes = self.take(len * 2)?;
        Ok(bytes.chunks_exact(2).map(|c| i16::from_le_bytes(c.try_into().unwrap())).collect())
    }

    /// Inverse of [`Writer::f32_slice_flagged`].
    pub fn f32_slice_flagged(&mut self, flags: NumericFlags) -> Result<Vec<f32>> {
        let len = self.u32()? as usize;
        if flags.contains(NumericFlags::SHORT_QUANTIZED) && flags.contains(NumericFlags::ZERO_COMPRESSED) {
            let scale = self.f32()?;
            let runs = self.u32_slice()?;
            let nonzero_codes = self.i16_slice()?;
            let nonzero: Vec<f32> = nonzero_codes.iter().map(|&c| c as f32).collect();
            let as_f32 = decompress_zero_runs(&runs, &nonzero);
            let codes: Vec<i16> = as_f32.iter().map(|&v| v as i16).collect();
            Ok(dequantize_short(&codes, scale))
        } else if flags.contains(NumericFlags::SHORT_QUANTIZED) {
            let scale = self.f32()?;
            let codes = self.i16_slice()?;
            Ok(dequantize_short(&codes, scale))
        } else if flags.contains(NumericFlags::ZERO_COMPRESSED) {
            let runs = self.u32_slice()?;
            let nonzero_len = self.u32()? as usize;
            let bytes = self.take(nonzero_len * 4)?;
            let nonzero: Vec<f32> = bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
            Ok(decompress_zero_runs(&runs, &nonzero))
        } else {
            let bytes = self.take(len * 4)?;
            Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
        }
    }

    pub fn magic(&mut self) -> Result<[u8; 4]> {
        let b = self.take(4)?;
        Ok(b.try_into().unwrap())
    }

    /// Reads a whole sub-block body given its expected length, then checks
    /// the trailing checksum.
    pub fn block_body(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        let body = self.take(len)?;
        let expected = self.u32()?;
        let actual = calculate_checksum(body);
        if expected != actual {
            return Err(StorageError::ChecksumMismatch { what: what.to_string(), expected, actual });
        }
        Ok(body)
    }
}

/// Packs a [`NumericFlags`] value into the single byte that precedes every
/// weight blob on disk (§4.1/§4.10), so `model.rs`'s reader knows which of
/// `Writer::f32_slice_flagged`'s four codecs to invert without guessing.
pub fn flags_byte(flags: NumericFlags) -> u8 {
    flags.bits()
}

pub fn flags_from_byte(byte: u8) -> NumericFlags {
    NumericFlags::from_bits(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trips_with_checksum() {
        let mut out = Vec::new();
        write_block(&mut out, *b"TEST", b"hello world");
        let mut r = Reader::new(&out);
        let magic = r.magic().unwrap();
        assert_eq!(&magic, b"TEST");
        let body = r.block_body("test").unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut out = Vec::new();
        write_block(&mut out, *b"TEST", b"hello world");
        out[8] = b'H'; // flip first body byte, after magic(4)+len(4)
        let mut r = Reader::new(&out);
        r.magic().unwrap();
        assert!(matches!(r.block_body("test"), Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn flagged_round_trip_plain() {
        let values = vec![0.0, 1.5, -3.25, 10.0, -10.0];
        let mut w = Writer::new();
        w.f32_slice_flagged(NumericFlags::PLAIN, &values);
        let mut r = Reader::new(&w.buf);
        assert_eq!(r.f32_slice_flagged(NumericFlags::PLAIN).unwrap(), values);
    }

    #[test]
    fn flagged_round_trip_short_quantized_within_step_error() {
        let values = vec![0.0, 1.5, -3.25, 10.0, -10.0];
        let mut w = Writer::new();
        w.f32_slice_flagged(NumericFlags::SHORT_QUANTIZED, &values);
        let mut r = Reader::new(&w.buf);
        let back = r.f32_slice_flagged(NumericFlags::SHORT_QUANTIZED).unwrap();
        let (_, scale) = quantize_short(&values);
        for (a, b) in values.iter().zip(&back) {
            assert!((a - b).abs() <= scale + 1e-6);
        }
    }

    #[test]
    fn flagged_round_trip_zero_compressed() {
        let values = vec![0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 3.0];
        let mut w = Writer::new();
        w.f32_slice_flagged(NumericFlags::ZERO_COMPRESSED, &values);
        let mut r = Reader::new(&w.buf);
        assert_eq!(r.f32_slice_flagged(NumericFlags::ZERO_COMPRESSED).unwrap(), values);
    }

    #[test]
    fn flagged_round_trip_both() {
        let values = vec![0.0, 0.0, 1.5, -3.25, 0.0, 10.0];
        let flags = NumericFlags::SHORT_QUANTIZED.union(NumericFlags::ZERO_COMPRESSED);
        let mut w = Writer::new();
        w.f32_slice_flagged(flags, &values);
        let mut r = Reader::new(&w.buf);
        let back = r.f32_slice_flagged(flags).unwrap();
        let (_, scale) = quantize_short(&values);
        for (a, b) in values.iter().zip(&back) {
            assert!((a - b).abs() <= scale + 1e-6);
        }
    }
}
