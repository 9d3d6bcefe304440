// ============================================================
// Layer 5 — CTC Loss
// ============================================================
// Connectionist Temporal Classification over the softmax output
// of the CRNN.
//
//   y_true  [N, L] Int   padded labels, 0 = padding
//   y_pred  [N, T, C]    per-timestep probabilities, blank = C-1
//
//   1. Collapse singleton axes of y_true down to [N, L]
//   2. input_length[n]  = Σ_t Σ_c y_pred[n, t, c]   (≈ T)
//   3. label_length[n]  = #non-zero entries of y_true[n]
//   4. Forward (alpha) recursion in log space over the
//      blank-augmented label l' = [b, l1, b, l2, ..., b]
//   5. Mean of the per-sample negative log-likelihoods
//
// A sample whose label cannot be aligned in its input length
// (label too long, or too many repeats) has no valid path and
// its loss is +inf. That value is returned as-is; callers detect
// it with `is_finite`.
//
// Reference: Graves et al. (2006), Connectionist Temporal
//            Classification, ICML — equation 6

use burn::{prelude::*, tensor::Bool};

use crate::domain::error::{HtrError, HtrResult};

/// Added to probabilities before the log, as the Keras backend does.
pub const PROB_EPSILON: f32 = 1e-7;

const NEG_INF: f32 = f32::NEG_INFINITY;

/// Collapse singleton axes of a label tensor to `[batch, max_label_len]`.
///
/// The first axis is always the batch. Of the remaining axes at most one
/// may be longer than 1; it becomes the label axis.
pub fn collapse_labels<B: Backend, const D: usize>(
    y_true: Tensor<B, D, Int>,
) -> HtrResult<Tensor<B, 2, Int>> {
    let dims = y_true.dims();
    if D < 2 {
        return Err(HtrError::shape(format!(
            "labels need at least 2 dimensions, got shape {dims:?}"
        )));
    }
    let batch = dims[0];
    let non_singleton: Vec<usize> = dims[1..].iter().copied().filter(|&d| d != 1).collect();
    let label_len = match non_singleton.as_slice() {
        [] => 1,
        [len] => *len,
        _ => {
            return Err(HtrError::shape(format!(
                "labels of shape {dims:?} have more than one non-singleton label axis"
            )))
        }
    };
    Ok(y_true.reshape([batch, label_len]))
}

/// Per-sample CTC cost, shape `[batch]`.
pub fn ctc_batch_cost<B: Backend, const D: usize>(
    y_true: Tensor<B, D, Int>,
    y_pred: Tensor<B, 3>,
) -> HtrResult<Tensor<B, 1>> {
    let targets = collapse_labels(y_true)?;
    let [batch, timesteps, num_classes] = y_pred.dims();
    let [label_batch, _] = targets.dims();

    if label_batch != batch {
        return Err(HtrError::shape(format!(
            "label batch {label_batch} does not match prediction batch {batch}"
        )));
    }
    if num_classes < 2 {
        return Err(HtrError::shape(format!(
            "predictions need at least 2 classes (one plus blank), got {num_classes}"
        )));
    }
    let blank = num_classes - 1;
    check_label_range(&targets, blank)?;

    // Preserved length proxy: total probability mass, ≈ timesteps for a
    // normalised softmax. Rounded, then clamped to the real time axis.
    let input_lengths = y_pred
        .clone()
        .sum_dim(2)
        .sum_dim(1)
        .reshape([batch])
        .round()
        .int()
        .clamp(0, timesteps as i64);
    let label_lengths = targets
        .clone()
        .not_equal_elem(0)
        .int()
        .sum_dim(1)
        .reshape([batch]);

    let log_probs = y_pred.add_scalar(PROB_EPSILON).log();
    Ok(CtcLoss::new(blank).forward(log_probs, targets, input_lengths, label_lengths))
}

/// Batch-mean CTC loss, shape `[1]`.
pub fn ctc_loss<B: Backend, const D: usize>(
    y_true: Tensor<B, D, Int>,
    y_pred: Tensor<B, 3>,
) -> HtrResult<Tensor<B, 1>> {
    Ok(ctc_batch_cost(y_true, y_pred)?.mean())
}

fn check_label_range<B: Backend>(targets: &Tensor<B, 2, Int>, blank: usize) -> HtrResult<()> {
    if targets.dims()[1] == 0 {
        return Ok(());
    }
    let min = targets.clone().min().into_scalar().elem::<i64>();
    let max = targets.clone().max().into_scalar().elem::<i64>();
    if min < 0 {
        return Err(HtrError::invalid_label(format!("negative class index {min}")));
    }
    if max >= blank as i64 {
        return Err(HtrError::invalid_label(format!(
            "class index {max} collides with or exceeds the blank index {blank}"
        )));
    }
    Ok(())
}

// ─── CtcLoss ──────────────────────────────────────────────────────────────────

/// CTC negative log-likelihood with explicit lengths.
#[derive(Debug, Clone, Copy)]
pub struct CtcLoss {
    blank: usize,
}

impl CtcLoss {
    pub fn new(blank: usize) -> Self {
        Self { blank }
    }

    /// - `log_probs`: `[batch, time, classes]` log-probabilities
    /// - `targets`: `[batch, max_label_len]`, no blanks
    /// - `input_lengths`, `target_lengths`: `[batch]`
    ///
    /// Returns the per-sample loss, `[batch]`.
    pub fn forward<B: Backend>(
        &self,
        log_probs:      Tensor<B, 3>,
        targets:        Tensor<B, 2, Int>,
        input_lengths:  Tensor<B, 1, Int>,
        target_lengths: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let device = log_probs.device();
        let [batch, max_time, num_classes] = log_probs.dims();
        let max_label = targets.dims()[1];
        let width     = 2 * max_label + 1;

        let l_prime   = self.insert_blanks(targets, &device);
        let skip_mask = self.skip_mask(l_prime.clone(), &device);
        let positions = Tensor::<B, 1, Int>::arange(0..width as i64, &device)
            .reshape([1, width])
            .expand([batch, width]);
        let in_label  = positions.clone().lower(
            target_lengths.clone().mul_scalar(2).add_scalar(1).reshape([batch, 1]).expand([batch, width]),
        );

        // t = 0: only the leading blank and the first label can start a path
        let started = positions
            .lower_elem(2)
            .bool_and(in_label.clone())
            .bool_and(time_mask(input_lengths.clone(), 0, width));
        let log_probs_0 = log_probs
            .clone()
            .slice([0..batch, 0..1, 0..num_classes])
            .reshape([batch, num_classes]);
        let mut log_alpha = log_probs_0
            .gather(1, l_prime.clone())
            .mask_fill(started.bool_not(), NEG_INF);

        for t in 1..max_time {
            let active = time_mask(input_lengths.clone(), t, width).bool_and(in_label.clone());

            let stay   = log_alpha.clone();
            let advance = shift_right(log_alpha.clone(), 1, &device);
            let skip   = shift_right(log_alpha.clone(), 2, &device);

            let merged = log_add_exp(stay, advance);
            let merged = merged.clone().mask_where(skip_mask.clone(), log_add_exp(merged, skip));

            let log_probs_t = log_probs
                .clone()
                .slice([0..batch, t..t + 1, 0..num_classes])
                .reshape([batch, num_classes]);
            let emitted = merged + log_probs_t.gather(1, l_prime.clone());

            // Samples past their input length keep their final alpha
            log_alpha = log_alpha.mask_where(active, emitted);
        }

        let last_blank = target_lengths.clone().mul_scalar(2).reshape([batch, 1]);
        let last_label = last_blank.clone().sub_scalar(1).clamp_min(0);
        let end_on_blank = log_alpha.clone().gather(1, last_blank).reshape([batch]);
        let end_on_label = log_alpha
            .gather(1, last_label)
            .reshape([batch])
            .mask_fill(target_lengths.equal_elem(0), NEG_INF);

        log_add_exp(end_on_blank, end_on_label).neg()
    }

    /// [l1, l2, ...] → [b, l1, b, l2, ..., b]
    fn insert_blanks<B: Backend>(
        &self,
        targets: Tensor<B, 2, Int>,
        device:  &B::Device,
    ) -> Tensor<B, 2, Int> {
        let [batch, max_label] = targets.dims();
        let blanks = Tensor::<B, 2, Int>::full([batch, max_label], self.blank as i64, device);
        let trailing = Tensor::<B, 2, Int>::full([batch, 1], self.blank as i64, device);
        let interleaved = Tensor::stack::<3>(vec![blanks, targets], 2).reshape([batch, 2 * max_label]);
        Tensor::cat(vec![interleaved, trailing], 1)
    }

    /// True where alpha_{t-1}(s-2) may also flow into alpha_t(s):
    /// l'(s) is a label and differs from l'(s-2).
    fn skip_mask<B: Backend>(
        &self,
        l_prime: Tensor<B, 2, Int>,
        device:  &B::Device,
    ) -> Tensor<B, 2, Bool> {
        let [batch, width] = l_prime.dims();
        let two_back = if width > 2 {
            Tensor::cat(
                vec![
                    Tensor::<B, 2, Int>::full([batch, 2], self.blank as i64, device),
                    l_prime.clone().slice([0..batch, 0..width - 2]),
                ],
                1,
            )
        } else {
            Tensor::<B, 2, Int>::full([batch, width], self.blank as i64, device)
        };
        l_prime
            .clone()
            .not_equal_elem(self.blank as i64)
            .bool_and(l_prime.not_equal(two_back))
    }
}

/// `[batch, width]` mask, true for samples whose input is longer than `t`.
fn time_mask<B: Backend>(input_lengths: Tensor<B, 1, Int>, t: usize, width: usize) -> Tensor<B, 2, Bool> {
    let [batch] = input_lengths.dims();
    input_lengths
        .greater_elem(t as i64)
        .reshape([batch, 1])
        .expand([batch, width])
}

/// Shift columns right by `by`, filling with -inf.
fn shift_right<B: Backend>(x: Tensor<B, 2>, by: usize, device: &B::Device) -> Tensor<B, 2> {
    let [rows, cols] = x.dims();
    if by >= cols {
        return Tensor::full([rows, cols], NEG_INF, device);
    }
    Tensor::cat(
        vec![
            Tensor::full([rows, by], NEG_INF, device),
            x.slice([0..rows, 0..cols - by]),
        ],
        1,
    )
}

/// ln(e^a + e^b), exact when either side is -inf and free of NaN
/// in both the value and its gradient.
fn log_add_exp<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, D> {
    let a_inf = a.clone().equal_elem(NEG_INF);
    let b_inf = b.clone().equal_elem(NEG_INF);
    let a_safe = a.clone().mask_fill(a_inf.clone(), 0.0);
    let b_safe = b.clone().mask_fill(b_inf.clone(), 0.0);

    let max = a_safe.clone().max_pair(b_safe.clone());
    let lse = max + (a_safe - b_safe).abs().neg().exp().add_scalar(1.0).log();

    lse.mask_where(a_inf, b.clone()).mask_where(b_inf, a)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn probs<B: Backend>(values: Vec<f32>, shape: [usize; 3]) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn uniform(batch: usize, time: usize, classes: usize) -> Tensor<TestBackend, 3> {
        probs(vec![1.0 / classes as f32; batch * time * classes], [batch, time, classes])
    }

    fn labels<const D: usize>(values: Vec<i64>, shape: [usize; D]) -> Tensor<TestBackend, D, Int> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    /// Rows of `0.97` on the given class and `0.01` elsewhere (4 classes).
    fn peaked(path: &[usize]) -> Tensor<TestBackend, 3> {
        let values = path
            .iter()
            .flat_map(|&k| (0..4).map(move |c| if c == k { 0.97 } else { 0.01 }))
            .collect();
        probs(values, [1, path.len(), 4])
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_scalar()
    }

    #[test]
    fn test_insert_blanks() {
        let ctc = CtcLoss::new(3);
        let l   = labels(vec![1, 2, 2, 0], [2, 2]);
        let out = ctc.insert_blanks(l, &Default::default());
        let out = out.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(out, vec![3, 1, 3, 2, 3, 3, 2, 3, 0, 3]);
    }

    #[test]
    fn test_repeated_label_needs_separating_blank() {
        // T=3, C=3 (pad, 1, blank), target [1, 1]: only path is 1 b 1
        let loss = scalar(ctc_loss(labels(vec![1, 1], [1, 2]), uniform(1, 3, 3)).unwrap());
        assert!((loss - 3.0 * 3.0f32.ln()).abs() < 1e-3, "loss = {loss}");
    }

    #[test]
    fn test_two_distinct_labels_uniform() {
        // T=3, C=4, target [1, 2]: 5 valid paths out of 4^3
        let loss = scalar(ctc_loss(labels(vec![1, 2], [1, 2]), uniform(1, 3, 4)).unwrap());
        let expected = -(5.0f32 / 64.0).ln();
        assert!((loss - expected).abs() < 1e-3, "loss = {loss}, expected {expected}");
    }

    #[test]
    fn test_empty_label_scores_all_blank_path() {
        let loss = scalar(ctc_loss(labels(vec![0, 0], [1, 2]), uniform(1, 2, 3)).unwrap());
        assert!((loss - 2.0 * 3.0f32.ln()).abs() < 1e-3, "loss = {loss}");
    }

    #[test]
    fn test_singleton_label_axes_are_collapsed() {
        let y_pred = probs::<TestBackend>(
            (0..2 * 4 * 4).map(|i| if i % 4 == 1 { 0.4 } else { 0.2 }).collect(),
            [2, 4, 4],
        );
        let flat   = ctc_loss(labels(vec![1, 2, 2, 1], [2, 2]), y_pred.clone()).unwrap();
        let nested = ctc_loss(labels(vec![1, 2, 2, 1], [2, 1, 2]), y_pred.clone()).unwrap();
        let tail   = ctc_loss(labels(vec![1, 2, 2, 1], [2, 2, 1]), y_pred).unwrap();
        let flat = scalar(flat);
        assert_eq!(flat, scalar(nested));
        assert_eq!(flat, scalar(tail));
    }

    #[test]
    fn test_two_label_axes_rejected() {
        let result = ctc_loss(labels(vec![1; 8], [2, 2, 2]), uniform(2, 4, 4));
        assert!(matches!(result, Err(HtrError::Shape(_))));
    }

    #[test]
    fn test_label_length_equal_to_input_length_is_finite() {
        // T=3 and three distinct-neighbour labels: exactly one path, no blanks
        let loss = scalar(ctc_loss(labels(vec![1, 2, 1], [1, 3]), uniform(1, 3, 4)).unwrap());
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
        assert!((loss - 3.0 * 4.0f32.ln()).abs() < 1e-3);
    }

    #[test]
    fn test_label_longer_than_input_is_infinite() {
        let loss = scalar(ctc_loss(labels(vec![1, 2, 1], [1, 3]), uniform(1, 2, 4)).unwrap());
        assert!(loss.is_infinite() && loss > 0.0, "loss = {loss}");
    }

    #[test]
    fn test_correct_peaked_prediction_beats_uniform() {
        let blank = 3;
        let target = labels(vec![1, 2], [1, 2]);
        let good = scalar(ctc_loss(target.clone(), peaked(&[1, blank, 2, blank, blank])).unwrap());
        let flat = scalar(ctc_loss(target, uniform(1, 5, 4)).unwrap());
        assert!(good < 0.2, "good = {good}");
        assert!(flat > 2.0, "flat = {flat}");
    }

    #[test]
    fn test_mixed_label_lengths_match_individual_samples() {
        let y_pred = uniform(2, 4, 4);
        let batch = ctc_batch_cost(labels(vec![1, 0, 1, 2], [2, 2]), y_pred)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let first  = scalar(ctc_loss(labels(vec![1], [1, 1]), uniform(1, 4, 4)).unwrap());
        let second = scalar(ctc_loss(labels(vec![1, 2], [1, 2]), uniform(1, 4, 4)).unwrap());
        assert!((batch[0] - first).abs() < 1e-4);
        assert!((batch[1] - second).abs() < 1e-4);
    }

    #[test]
    fn test_blank_index_in_labels_rejected() {
        let result = ctc_loss(labels(vec![3], [1, 1]), uniform(1, 2, 4));
        assert!(matches!(result, Err(HtrError::InvalidLabel(_))));
    }

    #[test]
    fn test_batch_mismatch_rejected() {
        let result = ctc_loss(labels(vec![1, 2], [2, 1]), uniform(3, 2, 4));
        assert!(matches!(result, Err(HtrError::Shape(_))));
    }

    #[test]
    fn test_gradients_are_finite() {
        let device = Default::default();
        let y_pred = Tensor::<TestAutodiffBackend, 3>::from_data(
            TensorData::new(vec![0.25f32; 2 * 5 * 4], [2, 5, 4]),
            &device,
        )
        .require_grad();
        let y_true = Tensor::<TestAutodiffBackend, 2, Int>::from_data(
            TensorData::new(vec![1i64, 2, 2, 0], [2, 2]),
            &device,
        );

        let loss  = ctc_loss(y_true, y_pred.clone()).unwrap();
        let grads = loss.backward();
        let grad  = y_pred.grad(&grads).expect("y_pred gradient");
        let values = grad.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|g| g.is_finite()));
        assert!(values.iter().any(|&g| g != 0.0));
    }
}
