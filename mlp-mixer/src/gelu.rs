use dfdx::prelude::{Device, Dtype, Shape, Tape, Tensor};

use crate::{BuildOnDevice, MixerError, Module, ResetParams};

/// Gaussian error linear unit, `x * Phi(x)` computed with `erf`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeLU;

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for GeLU {
    type Built = GeLU;
    fn try_build_on_device(&self, _: &D) -> Result<Self::Built, MixerError<D::Err>> {
        Ok(*self)
    }
}

impl<E: Dtype, D: Device<E>> ResetParams<E, D> for GeLU {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        Ok(())
    }
}

impl<S: Shape, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<S, E, D, T>> for GeLU {
    type Output = Tensor<S, E, D, T>;
    type Error = D::Err;
    fn try_forward(&self, x: Tensor<S, E, D, T>) -> Result<Self::Output, Self::Error> {
        x.try_accurate_gelu()
    }
}
