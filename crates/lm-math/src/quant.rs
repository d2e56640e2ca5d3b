/// Bitfield tagging how a numeric blob is stored on disk. Both bits may be
/// set: a block can be zero-run-compressed *after* quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NumericFlags(u8);

impl NumericFlags {
    pub const PLAIN: NumericFlags = NumericFlags(0);
    pub const SHORT_QUANTIZED: NumericFlags = NumericFlags(1 << 0);
    pub const ZERO_COMPRESSED: NumericFlags = NumericFlags(1 << 1);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: NumericFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: NumericFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Maps `values` to `int16` using a single scale chosen so the block's
/// largest-magnitude value maps to `i16::MAX`. Returns the quantized codes
/// and the scale needed to invert the mapping.
pub fn quantize_short(values: &[f32]) -> (Vec<i16>, f32) {
    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    let scale = if max_abs == 0.0 { 1.0 } else { max_abs / i16::MAX as f32 };
    let codes = values
        .iter()
        .map(|v| (v / scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect();
    (codes, scale)
}

/// Inverse of [`quantize_short`].
pub fn dequantize_short(codes: &[i16], scale: f32) -> Vec<f32> {
    codes.iter().map(|&c| c as f32 * scale).collect()
}

/// Run-length-encodes spans of exact `0.0`. The encoding alternates
/// `(run_of_zeros, run_of_nonzero_values...)`; a leading zero run of length
/// 0 is emitted when the block starts with a nonzero value.
pub fn compress_zero_runs(values: &[f32]) -> (Vec<u32>, Vec<f32>) {
    let mut run_lengths = Vec::new();
    let mut nonzero = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let zero_start = i;
        while i < values.len() && values[i] == 0.0 {
            i += 1;
        }
        run_lengths.push((i - zero_start) as u32);
        let nz_start = i;
        while i < values.len() && values[i] != 0.0 {
            nonzero.push(values[i]);
            i += 1;
        }
        run_lengths.push((i - nz_start) as u32);
    }
    (run_lengths, nonzero)
}

/// Inverse of [`compress_zero_runs`].
pub fn decompress_zero_runs(run_lengths: &[u32], nonzero: &[f32]) -> Vec<f32> {
    let mut out = Vec::new();
    let mut nz_cursor = 0usize;
    for pair in run_lengths.chunks(2) {
        let zeros = pair[0] as usize;
        out.extend(std::iter::repeat(0.0f32).take(zeros));
        if let Some(&nz_len) = pair.get(1) {
            let nz_len = nz_len as usize;
            out.extend_from_slice(&nonzero[nz_cursor..nz_cursor + nz_len]);
            nz_cursor += nz_len;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_round_trip_is_within_step_error() {
        let values = vec![0.0, 1.5, -3.25, 10.0, -10.0];
        let (codes, scale) = quantize_short(&values);
        let back = dequantize_short(&codes, scale);
        let max_err = scale;
        for (a, b) in values.iter().zip(back) {
            assert!((a - b).abs() <= max_err + 1e-6);
        }
    }

    #[test]
    fn zero_runs_round_trip() {
        let values = vec![0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 3.0];
        let (runs, nz) = compress_zero_runs(&values);
        let back = decompress_zero_runs(&runs, &nz);
        assert_eq!(values, back);
    }

    #[test]
    fn zero_runs_handles_all_zero_and_all_nonzero() {
        let all_zero = vec![0.0; 4];
        let (r, nz) = compress_zero_runs(&all_zero);
        assert_eq!(decompress_zero_runs(&r, &nz), all_zero);

        let all_nz = vec![1.0, 2.0, 3.0];
        let (r, nz) = compress_zero_runs(&all_nz);
        assert_eq!(decompress_zero_runs(&r, &nz), all_nz);
    }
}
