pub const CHANNELS: usize = 3;
pub const HEIGHT: usize = 256;
pub const WIDTH: usize = 256;

/// Stride-2 stages in the generator encoder; inputs must be a multiple of `2^DOWN_STAGES`.
pub const DOWN_STAGES: usize = 8;

pub const BATCH_SIZE: usize = 8;
pub const NUM_EPOCHS: usize = 250;
pub const LEARNING_RATE: f64 = 2e-4;
pub const ADAM_BETA_1: f32 = 0.5;
pub const ADAM_BETA_2: f32 = 0.999;
pub const ADAM_EPSILON: f32 = 1e-7;
pub const L1_LAMBDA: f32 = 100.0;

pub const LEAKY_RELU_SLOPE: f64 = 0.3;
pub const DROPOUT: f64 = 0.5;
pub const INIT_STD: f64 = 0.02;
