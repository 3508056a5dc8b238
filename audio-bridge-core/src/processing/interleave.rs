use crate::models::error::ConfigError;

/// Interleave per-channel arrays into `[c0f0, c1f0, ..., c0f1, c1f1, ...]`.
///
/// All arrays must share the same length; a ragged input is a caller error,
/// not something to pad.
pub fn interleave<C: AsRef<[f32]>>(channels: &[C]) -> Result<Vec<f32>, ConfigError> {
    let Some(first) = channels.first() else {
        return Ok(Vec::new());
    };
    let frame_count = first.as_ref().len();
    if channels.iter().any(|c| c.as_ref().len() != frame_count) {
        return Err(ConfigError::UnequalChannelLengths);
    }

    let channel_count = channels.len();
    let mut interleaved = vec![0.0f32; frame_count * channel_count];
    for (ch, samples) in channels.iter().enumerate() {
        for (frame, &sample) in samples.as_ref().iter().enumerate() {
            interleaved[frame * channel_count + ch] = sample;
        }
    }
    Ok(interleaved)
}

/// Copy one channel out of an interleaved block.
pub fn extract_channel(samples: &[f32], channels: u16, index: u16) -> Vec<f32> {
    if index >= channels {
        return Vec::new();
    }
    samples
        .iter()
        .skip(index as usize)
        .step_by(channels as usize)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_stereo() {
        let left = [1.0, 2.0, 3.0];
        let right = [4.0, 5.0, 6.0];
        let result = interleave(&[&left[..], &right[..]]).unwrap();
        assert_eq!(result, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn interleave_three_channels() {
        let channels = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let result = interleave(&channels).unwrap();
        assert_eq!(result, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn interleave_rejects_ragged_channels() {
        let channels = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            interleave(&channels),
            Err(ConfigError::UnequalChannelLengths)
        ));
    }

    #[test]
    fn interleave_empty() {
        let none: Vec<Vec<f32>> = Vec::new();
        assert!(interleave(&none).unwrap().is_empty());
        assert!(interleave(&[Vec::<f32>::new(), Vec::new()]).unwrap().is_empty());
    }

    #[test]
    fn extract_channel_inverts_interleave() {
        let samples = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        assert_eq!(extract_channel(&samples, 2, 0), vec![1.0, 2.0, 3.0]);
        assert_eq!(extract_channel(&samples, 2, 1), vec![4.0, 5.0, 6.0]);
        assert!(extract_channel(&samples, 2, 2).is_empty());
    }
}
