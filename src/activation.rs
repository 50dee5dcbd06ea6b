use burn::tensor::{activation::gelu, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

// sqrt(2 / pi)
const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const TANH_COEF: f64 = 0.044_715;

/// Which GELU formulation the feedforward layer uses.
///
/// The two variants differ numerically (by up to ~1e-3 around |x| = 2), so
/// fixtures computed with one will not match the other.
///
/// - `Exact`: `x * 0.5 * (1 + erf(x / sqrt(2)))`
/// - `Tanh`: `0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GeluKind {
    #[default]
    Exact,
    Tanh,
}

impl GeluKind {
    pub fn apply<B: Backend, const D: usize>(self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            GeluKind::Exact => gelu(tensor),
            GeluKind::Tanh => gelu_tanh(tensor),
        }
    }
}

// burn only ships the erf version
fn gelu_tanh<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    let cube = tensor.clone() * tensor.clone() * tensor.clone();
    let inner = (tensor.clone() + cube * TANH_COEF) * SQRT_2_OVER_PI;

    tensor * (inner.tanh() + 1.0) * 0.5
}
