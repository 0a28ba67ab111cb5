/// Level meter divisor: one bar block per 100 units of RMS.
const RMS_PER_BLOCK: f32 = 100.0;

/// Root-mean-square amplitude of interleaved 16-bit little-endian samples.
///
/// All channels are pooled. A trailing odd byte (half a sample) is ignored.
pub fn pcm16_rms(frame: &[u8]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for pair in frame.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]]));
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt() as f32
}

/// Number of meter blocks to draw for `rms`, capped at `max_blocks`.
pub fn level_blocks(rms: f32, max_blocks: usize) -> usize {
    if !rms.is_finite() || rms <= 0.0 {
        return 0;
    }
    ((rms / RMS_PER_BLOCK) as usize).min(max_blocks)
}
