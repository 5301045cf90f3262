//! G.711 mu-law framing for captured microphone audio.

use bytes::Bytes;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Encode one signed 16-bit sample.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    let pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0f;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Average every `decimation` float samples into one and mu-law encode the
/// result. A trailing partial group is discarded.
pub fn encode_frame(input: &[f32], decimation: usize) -> Bytes {
    let step = decimation.max(1);
    input
        .chunks_exact(step)
        .map(|group| {
            let mean = group.iter().sum::<f32>() / step as f32;
            linear_to_ulaw((mean.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        })
        .collect::<Vec<u8>>()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulaw_reference_points() {
        assert_eq!(linear_to_ulaw(0), 0xff);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
        assert_eq!(linear_to_ulaw(-1) & 0x80, 0);
    }

    #[test]
    fn test_frame_of_20ms() {
        // 48 kHz capture, 8 kHz on the wire.
        let frame = encode_frame(&[0.0; 960], 6);
        assert_eq!(frame.len(), 160);
        assert!(frame.iter().all(|&b| b == 0xff));

        assert_eq!(encode_frame(&[0.5; 13], 6).len(), 2);
    }
}
