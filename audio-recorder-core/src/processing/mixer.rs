//! Saturating sum of two 16-bit PCM streams.

/// Mix two interleaved 16-bit little-endian PCM buffers sample by sample.
///
/// The output is `max(a.len(), b.len())` rounded down to a whole sample;
/// the shorter input is treated as silence past its end. Each output sample
/// is `a + b` clamped to the `i16` range, never wrapped.
///
/// Both inputs must share the same sample rate and channel layout.
pub fn mix(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len()) & !1;
    let mut out = Vec::with_capacity(len);
    for offset in (0..len).step_by(2) {
        let sum = sample_at(a, offset) as i32 + sample_at(b, offset) as i32;
        let mixed = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        out.extend_from_slice(&mixed.to_le_bytes());
    }
    out
}

fn sample_at(buf: &[u8], offset: usize) -> i16 {
    match buf.get(offset..offset + 2) {
        Some(pair) => i16::from_le_bytes([pair[0], pair[1]]),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pcm::{pcm16_to_samples, samples_to_pcm16};

    fn mix_samples(a: &[i16], b: &[i16]) -> Vec<i16> {
        pcm16_to_samples(&mix(&samples_to_pcm16(a), &samples_to_pcm16(b)))
    }

    #[test]
    fn sums_without_wraparound_across_the_range() {
        let values: Vec<i16> = (i16::MIN..=i16::MAX)
            .step_by(251)
            .chain([i16::MAX])
            .collect();
        for &x in &values {
            let ys: Vec<i16> = values.clone();
            let xs = vec![x; ys.len()];
            let mixed = mix_samples(&xs, &ys);
            for (&y, &m) in ys.iter().zip(&mixed) {
                let expected = (x as i32 + y as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                assert_eq!(m, expected, "mix({}, {})", x, y);
            }
        }
    }

    #[test]
    fn saturates_at_both_rails() {
        assert_eq!(mix_samples(&[i16::MAX, i16::MIN], &[1, -1]), vec![i16::MAX, i16::MIN]);
        assert_eq!(mix_samples(&[30000], &[30000]), vec![i16::MAX]);
        assert_eq!(mix_samples(&[-30000], &[-30000]), vec![i16::MIN]);
    }

    #[test]
    fn shorter_input_is_zero_padded() {
        let mixed = mix_samples(&[100, 200, 300, 400], &[1, 2]);
        assert_eq!(mixed, vec![101, 202, 300, 400]);

        let mixed = mix_samples(&[5], &[10, 20, 30]);
        assert_eq!(mixed, vec![15, 20, 30]);
    }

    #[test]
    fn output_length_is_even_rounded_max() {
        assert_eq!(mix(&[0; 7], &[0; 4]).len(), 6);
        assert_eq!(mix(&[0; 3], &[0; 8]).len(), 8);
        assert_eq!(mix(&[0; 1], &[]).len(), 0);
        assert!(mix(&[], &[]).is_empty());
    }

    #[test]
    fn odd_trailing_byte_counts_as_silence() {
        let a = [0x10, 0x00, 0x7f];
        let b = [0x01, 0x00, 0x02, 0x00];
        assert_eq!(pcm16_to_samples(&mix(&a, &b)), vec![0x11, 0x02]);
    }
}
