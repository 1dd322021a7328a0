use crate::prelude::{FusionError, FusionResult};
use ndarray::{Array1, Array2, Axis};

pub struct MatrixHelper;

impl MatrixHelper {
    /// Reshapes interleaved `x, y, z` samples into an `n x 3` matrix.
    pub fn triples(samples: &[f32]) -> FusionResult<Array2<f64>> {
        if samples.is_empty() || samples.len() % 3 != 0 {
            return Err(FusionError::MalformedFrame(format!(
                "{} samples do not form xyz triples",
                samples.len()
            )));
        }
        let values = samples.iter().map(|&v| v as f64).collect();
        Array2::from_shape_vec((samples.len() / 3, 3), values)
            .map_err(|err| FusionError::MalformedFrame(err.to_string()))
    }

    /// Subtracts a per-axis offset from every row.
    pub fn subtract_bias(matrix: &mut Array2<f64>, bias: [f64; 3]) {
        let offset = Array1::from(bias.to_vec());
        for mut row in matrix.axis_iter_mut(Axis(0)) {
            row -= &offset;
        }
    }

    pub fn row_norms(matrix: &Array2<f64>) -> Array1<f64> {
        matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt())
    }

    pub fn column_means(matrix: &Array2<f64>) -> [f64; 3] {
        match matrix.mean_axis(Axis(0)) {
            Some(mean) if mean.len() == 3 => [mean[0], mean[1], mean[2]],
            _ => [0.0; 3],
        }
    }
}
