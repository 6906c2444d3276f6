//! Regressor heads mapping detector features to targets.
//!
//! A head is applied independently at every time step: `z[b, :, t]` in,
//! `y[b, :, t]` out. Input gradients are derived by hand. The order-`k`
//! gradient is the gradient of the sum of the order-`k - 1` gradient, where
//! the order-1 gradient differentiates the reduced output.

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use envelope_detector_signal::Reduction;

use crate::error::{NnError, NnResult};

/// A differentiable head on top of a [`FilterModel`](crate::detector::FilterModel).
pub trait Regressor {
    /// Number of input features.
    fn input_dim(&self) -> usize;

    /// Number of outputs.
    fn output_dim(&self) -> usize;

    /// Map (batch, feature, time) to (batch, output, time).
    fn forward(&self, z: ArrayView3<f64>) -> NnResult<Array3<f64>>;

    /// Order-`order` gradient of the reduced output with respect to `z`,
    /// shaped like `z`.
    fn input_gradient(&self, z: ArrayView3<f64>, order: usize, reduction: Reduction) -> NnResult<Array3<f64>>;
}

fn check_input(context: &'static str, z: &ArrayView3<f64>, input_dim: usize) -> NnResult<()> {
    let (_, nfeatures, _) = z.dim();
    if nfeatures != input_dim {
        return Err(NnError::shape_mismatch(
            context,
            vec![usize::MAX, input_dim, usize::MAX],
            z.shape(),
        ));
    }
    Ok(())
}

fn check_order(order: usize) -> NnResult<()> {
    if order == 0 {
        return Err(NnError::invalid_config("order", "gradient order must be >= 1"));
    }
    Ok(())
}

/// Factor applied to the order-1 gradient by `reduction`, given an output
/// with `output_len` elements.
fn reduction_scale(reduction: Reduction, output_len: usize) -> f64 {
    match reduction {
        Reduction::Sum => 1.0,
        Reduction::Mean if output_len > 0 => 1.0 / output_len as f64,
        Reduction::Mean => 0.0,
    }
}

/// `out[b, o, t] = Σ_i w[o, i] z[b, i, t] + bias[o]`.
fn pointwise_affine(w: &Array2<f64>, bias: &Array1<f64>, z: ArrayView3<f64>) -> Array3<f64> {
    let (nbatch, _, ntimes) = z.dim();
    let mut out = Array3::zeros((nbatch, w.nrows(), ntimes));
    for (sample, mut slot) in z.outer_iter().zip(out.outer_iter_mut()) {
        slot.assign(&w.dot(&sample));
        for (mut row, &b) in slot.outer_iter_mut().zip(bias.iter()) {
            row += b;
        }
    }
    out
}

fn fan_in_uniform<R: Rng + ?Sized>(rng: &mut R, len: usize, fan_in: usize) -> Vec<f64> {
    let bound = 1.0 / (fan_in as f64).sqrt();
    (0..len).map(|_| rng.gen_range(-bound..bound)).collect()
}

// ---------------------------------------------------------------------------
// Linear head
// ---------------------------------------------------------------------------

/// Linear head, weight (output, feature) and bias (output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl LinearRegressor {
    /// Create a linear head.
    pub fn new(weight: Array2<f64>, bias: Array1<f64>) -> NnResult<Self> {
        if bias.len() != weight.nrows() {
            return Err(NnError::shape_mismatch("linear bias", vec![weight.nrows()], bias.shape()));
        }
        Ok(Self { weight, bias })
    }

    /// Fan-in uniform initialization.
    pub fn random<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> NnResult<Self> {
        let weight = Array2::from_shape_vec((output_dim, input_dim), fan_in_uniform(rng, output_dim * input_dim, input_dim))
            .map_err(|_| NnError::invalid_config("input_dim", "weight shape overflow"))?;
        let bias = Array1::from_vec(fan_in_uniform(rng, output_dim, input_dim));
        Self::new(weight, bias)
    }

    /// Weight matrix, (output, input).
    pub fn weight(&self) -> &Array2<f64> {
        &self.weight
    }
}

impl Regressor for LinearRegressor {
    fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    fn forward(&self, z: ArrayView3<f64>) -> NnResult<Array3<f64>> {
        check_input("linear regressor input", &z, self.input_dim())?;
        Ok(pointwise_affine(&self.weight, &self.bias, z))
    }

    fn input_gradient(&self, z: ArrayView3<f64>, order: usize, reduction: Reduction) -> NnResult<Array3<f64>> {
        check_order(order)?;
        check_input("linear regressor input", &z, self.input_dim())?;
        if order > 1 {
            return Err(NnError::non_differentiable(
                order,
                "a linear head has a constant input gradient",
            ));
        }

        let (nbatch, _, ntimes) = z.dim();
        let scale = reduction_scale(reduction, nbatch * self.output_dim() * ntimes);
        let column_sums = self.weight.sum_axis(Axis(0)) * scale;
        let mut grad = Array3::zeros(z.raw_dim());
        for mut sample in grad.outer_iter_mut() {
            for (mut row, &g) in sample.outer_iter_mut().zip(column_sums.iter()) {
                row.fill(g);
            }
        }
        Ok(grad)
    }
}

// ---------------------------------------------------------------------------
// Tanh MLP head
// ---------------------------------------------------------------------------

/// Coefficients (lowest degree first) of `P_k` with
/// `d^k/da^k tanh(a) = P_k(tanh(a))`.
///
/// Built from `P_0(y) = y` and `P_{k+1}(y) = P_k'(y) (1 - y²)`.
pub fn tanh_derivative_poly(order: usize) -> Vec<f64> {
    let mut poly = vec![0.0, 1.0];
    for _ in 0..order {
        let derivative: Vec<f64> = poly.iter().enumerate().skip(1).map(|(i, c)| i as f64 * c).collect();
        let mut next = vec![0.0; derivative.len() + 2];
        for (i, &c) in derivative.iter().enumerate() {
            next[i] += c;
            next[i + 2] -= c;
        }
        poly = next;
    }
    poly
}

fn eval_poly(poly: &[f64], y: f64) -> f64 {
    poly.iter().rev().fold(0.0, |acc, &c| acc * y + c)
}

/// One-hidden-layer head: `y = W2 tanh(W1 z + b1) + b2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpRegressor {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
}

impl MlpRegressor {
    /// Create an MLP head from (hidden, input), (hidden), (output, hidden), (output).
    pub fn new(w1: Array2<f64>, b1: Array1<f64>, w2: Array2<f64>, b2: Array1<f64>) -> NnResult<Self> {
        let hidden = w1.nrows();
        if b1.len() != hidden {
            return Err(NnError::shape_mismatch("mlp hidden bias", vec![hidden], b1.shape()));
        }
        if w2.ncols() != hidden {
            return Err(NnError::shape_mismatch("mlp output weight", vec![usize::MAX, hidden], w2.shape()));
        }
        if b2.len() != w2.nrows() {
            return Err(NnError::shape_mismatch("mlp output bias", vec![w2.nrows()], b2.shape()));
        }
        Ok(Self { w1, b1, w2, b2 })
    }

    /// Fan-in uniform initialization.
    pub fn random<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, output_dim: usize, rng: &mut R) -> NnResult<Self> {
        let shape_err = |_| NnError::invalid_config("hidden_dim", "weight shape overflow");
        let w1 = Array2::from_shape_vec((hidden_dim, input_dim), fan_in_uniform(rng, hidden_dim * input_dim, input_dim))
            .map_err(shape_err)?;
        let b1 = Array1::from_vec(fan_in_uniform(rng, hidden_dim, input_dim));
        let w2 = Array2::from_shape_vec((output_dim, hidden_dim), fan_in_uniform(rng, output_dim * hidden_dim, hidden_dim))
            .map_err(shape_err)?;
        let b2 = Array1::from_vec(fan_in_uniform(rng, output_dim, hidden_dim));
        Self::new(w1, b1, w2, b2)
    }

    /// Number of hidden units.
    pub fn hidden_dim(&self) -> usize {
        self.w1.nrows()
    }
}

impl Regressor for MlpRegressor {
    fn input_dim(&self) -> usize {
        self.w1.ncols()
    }

    fn output_dim(&self) -> usize {
        self.w2.nrows()
    }

    fn forward(&self, z: ArrayView3<f64>) -> NnResult<Array3<f64>> {
        check_input("mlp regressor input", &z, self.input_dim())?;
        let hidden = pointwise_affine(&self.w1, &self.b1, z).mapv_into(f64::tanh);
        Ok(pointwise_affine(&self.w2, &self.b2, hidden.view()))
    }

    /// For hidden pre-activation `a_h`, `v_h = Σ_o W2[o, h]` and
    /// `s_h = Σ_f W1[h, f]`:
    ///
    /// ```text
    /// g_k[f] = c · Σ_h v_h · s_h^(k-1) · tanh^(k)(a_h) · W1[h, f]
    /// ```
    ///
    /// where `c` is the reduction scale.
    fn input_gradient(&self, z: ArrayView3<f64>, order: usize, reduction: Reduction) -> NnResult<Array3<f64>> {
        check_order(order)?;
        check_input("mlp regressor input", &z, self.input_dim())?;
        let order_i32 = i32::try_from(order).map_err(|_| NnError::invalid_config("order", "gradient order is too large"))?;

        let (nbatch, _, ntimes) = z.dim();
        let scale = reduction_scale(reduction, nbatch * self.output_dim() * ntimes);
        let v = self.w2.sum_axis(Axis(0));
        let s = self.w1.sum_axis(Axis(1));
        let coef = Zip::from(&v).and(&s).map_collect(|&v, &s| scale * v * s.powi(order_i32 - 1));
        let poly = tanh_derivative_poly(order);

        let pre = pointwise_affine(&self.w1, &self.b1, z);
        let mut weighted = pre.mapv_into(|a| eval_poly(&poly, a.tanh()));
        for mut sample in weighted.outer_iter_mut() {
            for (mut row, &c) in sample.outer_iter_mut().zip(coef.iter()) {
                row *= c;
            }
        }

        let w1t = self.w1.t();
        let mut grad = Array3::zeros(z.raw_dim());
        for (sample, mut slot) in weighted.outer_iter().zip(grad.outer_iter_mut()) {
            slot.assign(&w1t.dot(&sample));
        }
        Ok(grad)
    }
}
