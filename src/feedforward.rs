use crate::{activation::GeluKind, FeedForwardError, DEFAULT_DROPOUT, DEFAULT_MIDDLE_DIM};
use burn::{
    config::Config,
    module::{Module, Param},
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

#[derive(Config, Debug)]
pub struct FeedForwardConfig {
    /// Width of the token representations going in and out.
    pub d_model: usize,
    /// Width of the hidden expansion layer.
    #[config(default = "DEFAULT_MIDDLE_DIM")]
    pub middle_dim: usize,
    /// Dropout probability applied after the activation, in `[0, 1)`.
    #[config(default = "DEFAULT_DROPOUT")]
    pub dropout: f64,
    #[config(default = "GeluKind::Exact")]
    pub gelu: GeluKind,
}

impl FeedForwardConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.d_model == 0 {
            return Err(FeedForwardError::Configuration(
                "d_model must be positive".to_string(),
            ));
        }
        if self.middle_dim == 0 {
            return Err(FeedForwardError::Configuration(
                "middle_dim must be positive".to_string(),
            ));
        }
        // also rejects NaN
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(FeedForwardError::Configuration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }

        Ok(())
    }

    /// Allocates a block with burn's default (Kaiming uniform) initialization.
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<FeedForward<B>> {
        self.validate()?;

        log::debug!(
            "initializing feedforward {} -> {} -> {} (dropout {}, gelu {:?})",
            self.d_model,
            self.middle_dim,
            self.d_model,
            self.dropout,
            self.gelu
        );

        Ok(FeedForward {
            fc1: LinearConfig::new(self.d_model, self.middle_dim).init(device),
            fc2: LinearConfig::new(self.middle_dim, self.d_model).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            dropout_rate: self.dropout,
            gelu_tanh: self.gelu == GeluKind::Tanh,
        })
    }

    /// Builds a block from known parameters. The device is the one the given
    /// tensors live on.
    pub fn init_with_weights<B: Backend>(
        &self,
        fc1: LinearWeights<B>,
        fc2: LinearWeights<B>,
    ) -> crate::Result<FeedForward<B>> {
        self.validate()?;
        fc1.check("fc1", self.d_model, self.middle_dim)?;
        fc2.check("fc2", self.middle_dim, self.d_model)?;

        log::debug!(
            "loading feedforward {} -> {} -> {} from explicit weights",
            self.d_model,
            self.middle_dim,
            self.d_model
        );

        Ok(FeedForward {
            fc1: fc1.into_linear(),
            fc2: fc2.into_linear(),
            dropout: DropoutConfig::new(self.dropout).init(),
            dropout_rate: self.dropout,
            gelu_tanh: self.gelu == GeluKind::Tanh,
        })
    }
}

/// Weight and bias of one affine transform, weight laid out as `[d_input, d_output]`.
#[derive(Debug, Clone)]
pub struct LinearWeights<B: Backend> {
    pub weight: Tensor<B, 2>,
    pub bias: Tensor<B, 1>,
}

impl<B: Backend> LinearWeights<B> {
    pub fn new(weight: Tensor<B, 2>, bias: Tensor<B, 1>) -> Self {
        Self { weight, bias }
    }

    /// Takes a weight stored as `[d_output, d_input]` (torch's nn.Linear layout).
    pub fn from_torch_layout(weight: Tensor<B, 2>, bias: Tensor<B, 1>) -> Self {
        Self {
            weight: weight.transpose(),
            bias,
        }
    }

    fn check(&self, name: &str, d_input: usize, d_output: usize) -> crate::Result<()> {
        let weight = self.weight.dims();
        let bias = self.bias.dims();

        if weight != [d_input, d_output] || bias != [d_output] {
            return Err(FeedForwardError::Configuration(format!(
                "{name} expects weight {:?} and bias {:?}, got {:?} and {:?}",
                [d_input, d_output],
                [d_output],
                weight,
                bias
            )));
        }

        Ok(())
    }

    fn into_linear(self) -> Linear<B> {
        Linear {
            weight: Param::from_tensor(self.weight),
            bias: Some(Param::from_tensor(self.bias)),
        }
    }
}

/// `fc2(dropout(gelu(fc1(x))))` over the last dimension.
///
/// Dropout is only active on an autodiff backend; call `valid()` on the
/// module to get the evaluation version.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    dropout: Dropout,
    dropout_rate: f64,
    gelu_tanh: bool,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward<const D: usize>(&self, tensor: Tensor<B, D>) -> crate::Result<Tensor<B, D>> {
        let shape = tensor.shape();
        let d_model = self.d_model();

        let actual = shape.dims.last().copied().unwrap_or(0);
        if actual != d_model {
            return Err(FeedForwardError::ShapeMismatch {
                expected: d_model,
                actual,
            });
        }

        // a zero-sized leading dim has nothing to project
        if shape.num_elements() == 0 {
            return Ok(tensor);
        }

        // collapse the leading dims so any rank goes through the same matmul
        let rows = shape.num_elements() / d_model;
        let x: Tensor<B, 2> = tensor.reshape([rows, d_model]);

        let x = self.fc1.forward(x);
        let x = self.gelu().apply(x);
        let x = self.dropout.forward(x);
        let x = self.fc2.forward(x);

        Ok(x.reshape(shape))
    }

    /// Moves both projections to `device`. Dropout and activation settings
    /// are carried over untouched.
    pub fn to_device(self, device: &B::Device) -> Self {
        log::debug!("moving feedforward to {device:?}");

        Self {
            fc1: self.fc1.to_device(device),
            fc2: self.fc2.to_device(device),
            dropout: self.dropout,
            dropout_rate: self.dropout_rate,
            gelu_tanh: self.gelu_tanh,
        }
    }

    pub fn d_model(&self) -> usize {
        self.fc1.weight.val().dims()[0]
    }

    pub fn middle_dim(&self) -> usize {
        self.fc1.weight.val().dims()[1]
    }

    pub fn dropout_rate(&self) -> f64 {
        self.dropout_rate
    }

    pub fn gelu(&self) -> GeluKind {
        if self.gelu_tanh {
            GeluKind::Tanh
        } else {
            GeluKind::Exact
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn defaults() {
        let config = FeedForwardConfig::new(512);

        assert_eq!(config.middle_dim, 2048);
        assert_eq!(config.dropout, 0.1);
        assert_eq!(config.gelu, GeluKind::Exact);
    }

    #[test]
    fn rejects_bad_config() {
        let device = Default::default();
        let bad = [
            FeedForwardConfig::new(0),
            FeedForwardConfig::new(4).with_middle_dim(0),
            FeedForwardConfig::new(4).with_dropout(1.0),
            FeedForwardConfig::new(4).with_dropout(-0.1),
            FeedForwardConfig::new(4).with_dropout(f64::NAN),
        ];

        for config in bad {
            assert!(matches!(
                config.init::<B>(&device),
                Err(FeedForwardError::Configuration(_))
            ));
        }
    }

    #[test]
    fn init_allocates_both_projections() {
        let ff = FeedForwardConfig::new(4)
            .with_middle_dim(8)
            .init::<B>(&Default::default())
            .unwrap();

        assert_eq!(ff.d_model(), 4);
        assert_eq!(ff.middle_dim(), 8);
        assert_eq!(ff.num_params(), 4 * 8 + 8 + 8 * 4 + 4);
    }

    #[test]
    fn init_keeps_dropout_rate() {
        let ff = FeedForwardConfig::new(4)
            .with_middle_dim(8)
            .with_dropout(0.3)
            .init::<B>(&Default::default())
            .unwrap();

        assert_eq!(ff.dropout_rate(), 0.3);
        assert_eq!(ff.gelu(), GeluKind::Exact);
    }

    #[test]
    fn explicit_weights_are_used_as_given() {
        let device = Default::default();
        let w1 = Tensor::<B, 2>::ones([2, 3], &device);
        let b1 = Tensor::<B, 1>::from_floats([0.1, 0.2, 0.3], &device);
        let w2 = Tensor::<B, 2>::zeros([3, 2], &device);
        let b2 = Tensor::<B, 1>::from_floats([1.0, -1.0], &device);

        let ff = FeedForwardConfig::new(2)
            .with_middle_dim(3)
            .with_dropout(0.2)
            .init_with_weights(
                LinearWeights::new(w1.clone(), b1.clone()),
                LinearWeights::new(w2, b2.clone()),
            )
            .unwrap();

        assert_eq!(ff.dropout_rate(), 0.2);
        assert_eq!(ff.fc1.weight.val().into_data(), w1.into_data());
        assert_eq!(
            ff.fc1.bias.as_ref().map(|bias| bias.val().into_data()),
            Some(b1.into_data())
        );
        // fc2 is all zeros, so the output is its bias
        let out = ff.forward(Tensor::<B, 2>::ones([1, 2], &device)).unwrap();
        out.into_data().assert_approx_eq(&b2.reshape([1, 2]).into_data(), 6);
    }

    #[test]
    fn shape_mismatch() {
        let ff = FeedForwardConfig::new(4)
            .with_middle_dim(8)
            .init::<B>(&Default::default())
            .unwrap();
        let input = Tensor::<B, 2>::zeros([3, 5], &Default::default());

        assert_eq!(
            ff.forward(input).unwrap_err(),
            FeedForwardError::ShapeMismatch {
                expected: 4,
                actual: 5
            }
        );
    }

    #[test]
    fn weights_must_match_config() {
        let device = Default::default();
        let config = FeedForwardConfig::new(4).with_middle_dim(8);
        let fc1 = LinearWeights::<B>::new(
            Tensor::zeros([4, 8], &device),
            Tensor::zeros([8], &device),
        );
        // wrong orientation
        let fc2 = LinearWeights::new(
            Tensor::zeros([4, 8], &device),
            Tensor::zeros([4], &device),
        );

        assert!(matches!(
            config.init_with_weights(fc1, fc2),
            Err(FeedForwardError::Configuration(_))
        ));
    }

    #[test]
    fn torch_layout_is_transposed() {
        let weights = LinearWeights::<B>::from_torch_layout(
            Tensor::zeros([8, 4], &Default::default()),
            Tensor::zeros([8], &Default::default()),
        );

        assert_eq!(weights.weight.dims(), [4, 8]);
    }
}
