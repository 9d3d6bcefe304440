// ============================================================
// Layer 5 — Greedy CTC Decoding
// ============================================================
// Best-path decoding of the CRNN output:
//   argmax per timestep → collapse consecutive repeats → drop blanks
// The confidence of a path is the mean of its per-timestep maxima.

use burn::prelude::*;

/// One decoded sample: collapsed class indices and the mean of the
/// per-timestep maximum probability.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPath {
    pub indices:    Vec<usize>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct GreedyDecoder {
    blank: usize,
}

impl GreedyDecoder {
    pub fn new(blank: usize) -> Self {
        Self { blank }
    }

    /// Decoder for a model output with `num_classes` classes (blank last).
    pub fn for_classes(num_classes: usize) -> Self {
        Self::new(num_classes.saturating_sub(1))
    }

    /// probs: [batch, time, classes] → one DecodedPath per sample.
    pub fn decode_batch<B: Backend>(&self, probs: Tensor<B, 3>) -> Vec<DecodedPath> {
        let [batch, time, _] = probs.dims();
        if batch == 0 || time == 0 {
            return vec![DecodedPath { indices: Vec::new(), confidence: 0.0 }; batch];
        }

        let best: Vec<i64> = probs
            .clone()
            .argmax(2)
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap_or_default();
        let peak: Vec<f32> = probs
            .max_dim(2)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap_or_default();

        best.chunks(time)
            .zip(peak.chunks(time))
            .map(|(path, peaks)| {
                let path: Vec<usize> = path.iter().map(|&i| i as usize).collect();
                DecodedPath {
                    indices:    self.collapse(&path),
                    confidence: peaks.iter().sum::<f32>() / time as f32,
                }
            })
            .collect()
    }

    /// Remove consecutive duplicates, then blanks: "aa-ab-" → "aab".
    pub fn collapse(&self, path: &[usize]) -> Vec<usize> {
        let mut out  = Vec::with_capacity(path.len());
        let mut prev = None;
        for &k in path {
            if Some(k) != prev && k != self.blank {
                out.push(k);
            }
            prev = Some(k);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_collapse_repeats_then_blanks() {
        let d = GreedyDecoder::new(9);
        assert_eq!(d.collapse(&[2, 2, 9, 2, 3, 3, 9]), vec![2, 2, 3]);
        assert_eq!(d.collapse(&[9, 9, 9]), Vec::<usize>::new());
        assert_eq!(d.collapse(&[]), Vec::<usize>::new());
    }

    #[test]
    fn test_decode_batch() {
        // 2 samples, 3 steps, 3 classes (blank = 2)
        let values: Vec<f32> = vec![
            0.8, 0.1, 0.1,   0.1, 0.1, 0.8,   0.8, 0.1, 0.1,
            0.1, 0.7, 0.2,   0.1, 0.7, 0.2,   0.2, 0.2, 0.6,
        ];
        let probs = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(values, [2, 3, 3]),
            &Default::default(),
        );
        let decoded = GreedyDecoder::for_classes(3).decode_batch(probs);
        assert_eq!(decoded[0].indices, vec![0, 0]);
        assert_eq!(decoded[1].indices, vec![1]);
        assert!((decoded[0].confidence - 0.8).abs() < 1e-5);
        assert!((decoded[1].confidence - 2.0 / 3.0).abs() < 1e-5);
    }
}
