use burn::prelude::*;

/// Mean binary cross-entropy on raw logits.
///
/// Uses `max(x, 0) - x * z + ln(1 + exp(-|x|))`, which never exponentiates a
/// large positive number and is non-negative for targets in [0, 1].
pub fn bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let loss = logits.clone().clamp_min(0.0) - logits.clone() * targets
        + logits.abs().neg().exp().log1p();
    loss.mean()
}

pub struct GeneratorLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub gan: Tensor<B, 1>,
    pub l1: Tensor<B, 1>,
}

/// Adversarial term (fakes should score as real) plus `l1_lambda` times the mean absolute error.
pub fn generator_loss<B: Backend>(
    disc_generated: Tensor<B, 4>,
    generated: Tensor<B, 4>,
    target: Tensor<B, 4>,
    l1_lambda: f32,
) -> GeneratorLoss<B> {
    let real_labels = disc_generated.ones_like();
    let gan = bce_with_logits(disc_generated, real_labels);
    let l1 = (target - generated).abs().mean();
    let total = gan.clone() + l1.clone().mul_scalar(l1_lambda);

    GeneratorLoss { total, gan, l1 }
}

/// Real pairs labelled 1 plus generated pairs labelled 0.
pub fn discriminator_loss<B: Backend>(
    disc_real: Tensor<B, 4>,
    disc_generated: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let real_labels = disc_real.ones_like();
    let fake_labels = disc_generated.zeros_like();
    bce_with_logits(disc_real, real_labels) + bce_with_logits(disc_generated, fake_labels)
}
