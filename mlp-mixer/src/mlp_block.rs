use dfdx::prelude::{Device, Dtype};

use crate::{
    dropout::Dropout,
    gelu::GeLU,
    linear::{DeviceLinear, Linear},
    BuildOnDevice, ConfigError, ForwardMode, MixerError, Module, ResetParams,
};

/// Two linear maps with a GELU between them: `dim -> hidden -> dim`.
///
/// Acts on the last axis only, so the same block mixes tokens when it is
/// handed a transposed `(batch, channels, tokens)` view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MlpBlock {
    pub fc1: Linear,
    pub act: GeLU,
    pub fc2: Linear,
    pub dropout: Dropout,
}

impl MlpBlock {
    pub fn new(dim: usize, hidden: usize) -> Self {
        Self {
            fc1: Linear::new(dim, hidden),
            act: GeLU,
            fc2: Linear::new(hidden, dim),
            dropout: Dropout::default(),
        }
    }

    pub fn with_dropout(mut self, p: f64) -> Self {
        self.dropout = Dropout::new(p);
        self
    }

    pub fn dim(&self) -> usize {
        self.fc1.matmul.inp
    }

    pub fn hidden(&self) -> usize {
        self.fc1.matmul.out
    }

    pub fn num_params(&self) -> usize {
        2 * self.dim() * self.hidden() + self.dim() + self.hidden()
    }
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for MlpBlock {
    type Built = DeviceMlpBlock<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        ConfigError::check_nonzero("dim", self.dim()).map_err(MixerError::Config)?;
        ConfigError::check_nonzero("hidden", self.hidden()).map_err(MixerError::Config)?;
        Ok(DeviceMlpBlock {
            fc1: self.fc1.try_build_on_device(device)?,
            act: self.act,
            fc2: self.fc2.try_build_on_device(device)?,
            dropout: self.dropout.try_build_on_device(device)?,
        })
    }
}

#[derive(Clone, Debug, ResetParams)]
pub struct DeviceMlpBlock<E: Dtype, D: Device<E>> {
    pub fc1: DeviceLinear<E, D>,
    pub act: GeLU,
    pub fc2: DeviceLinear<E, D>,
    pub dropout: Dropout,
}

impl<X, E: Dtype, D: Device<E>> Module<X> for DeviceMlpBlock<E, D>
where
    DeviceLinear<E, D>: Module<X, Output = X, Error = MixerError<D::Err>>,
    GeLU: Module<X, Output = X, Error = D::Err>,
    Dropout: Module<X, Output = X, Error = D::Err>,
{
    type Output = X;
    type Error = MixerError<D::Err>;

    fn try_forward(&self, x: X) -> Result<Self::Output, Self::Error> {
        self.try_forward_mode(x, ForwardMode::Inference)
    }

    fn try_forward_mode(&self, x: X, mode: ForwardMode) -> Result<Self::Output, Self::Error> {
        let x = self.fc1.try_forward(x)?;
        let x = self.act.try_forward(x)?;
        let x = self.dropout.try_forward_mode(x, mode)?;
        let x = self.fc2.try_forward(x)?;
        Ok(self.dropout.try_forward_mode(x, mode)?)
    }
}
