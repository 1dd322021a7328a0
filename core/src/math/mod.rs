pub mod fft;
pub mod matrix;
pub mod stats;

pub use fft::FftHelper;
pub use matrix::MatrixHelper;
pub use stats::{RunningStats, StatsHelper};
