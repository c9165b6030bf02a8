//! Decoding of WASAPI shared-mode packets into interleaved f32.
//!
//! Kept free of any Windows types so the conversion can be tested on
//! every platform.

/// Sample encoding of an endpoint's mix format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
    /// Packed 24-bit little-endian integers.
    I24,
    I32,
}

impl SampleFormat {
    /// Pick the encoding from a format's float flag and container width.
    ///
    /// Returns `None` for layouts shared mode never reports (8-bit, 64-bit
    /// float).
    pub fn from_bits(is_float: bool, bits_per_sample: u16) -> Option<Self> {
        match (is_float, bits_per_sample) {
            (true, 32) => Some(Self::F32),
            (false, 16) => Some(Self::I16),
            (false, 24) => Some(Self::I24),
            (false, 32) => Some(Self::I32),
            _ => None,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::I16 => 2,
            Self::I24 => 3,
            Self::F32 | Self::I32 => 4,
        }
    }
}

/// Convert one packet of raw bytes to normalized f32 samples.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn decode_samples(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    match format {
        SampleFormat::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        SampleFormat::I16 => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        SampleFormat::I24 => bytes
            .chunks_exact(3)
            .map(|b| {
                // Sign-extend by placing the sample in the top three bytes.
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        SampleFormat::I32 => bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selection() {
        assert_eq!(SampleFormat::from_bits(true, 32), Some(SampleFormat::F32));
        assert_eq!(SampleFormat::from_bits(false, 16), Some(SampleFormat::I16));
        assert_eq!(SampleFormat::from_bits(false, 24), Some(SampleFormat::I24));
        assert_eq!(SampleFormat::from_bits(true, 64), None);
        assert_eq!(SampleFormat::from_bits(false, 8), None);
    }

    #[test]
    fn float_passthrough() {
        let mut bytes = Vec::new();
        for s in [0.5f32, -0.25, 1.0] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(decode_samples(&bytes, SampleFormat::F32), vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn int16_scaling() {
        let mut bytes = Vec::new();
        for s in [i16::MIN, 0, 16384] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let out = decode_samples(&bytes, SampleFormat::I16);
        assert_eq!(out, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn int24_sign_extension() {
        // -1 and the maximum positive value.
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let out = decode_samples(&bytes, SampleFormat::I24);
        approx::assert_relative_eq!(out[0], -1.0 / 8_388_608.0);
        approx::assert_relative_eq!(out[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn partial_sample_is_dropped() {
        let bytes = [0x00, 0x40, 0x01];
        assert_eq!(decode_samples(&bytes, SampleFormat::I16), vec![0.5]);
    }
}
