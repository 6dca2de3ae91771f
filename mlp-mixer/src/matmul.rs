use dfdx::prelude::{Device, Dtype, Tape, Tensor};
use dfdx::shapes::{HasShape, Shape};
use dfdx::tensor::HasErr;
use dfdx::tensor_ops::TryMatMul;
use rand_distr::Uniform;

use crate::{BuildOnDevice, ConfigError, MixerError, Module, ResetParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatMul {
    pub inp: usize,
    pub out: usize,
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for MatMul {
    type Built = DeviceMatMul<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        ConfigError::check_nonzero("inp", self.inp).map_err(MixerError::Config)?;
        ConfigError::check_nonzero("out", self.out).map_err(MixerError::Config)?;
        Ok(DeviceMatMul {
            weight: device.try_zeros_like(&(self.inp, self.out))?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct DeviceMatMul<E: Dtype, D: Device<E>> {
    pub weight: Tensor<(usize, usize), E, D>,
}

impl<E: Dtype, D: Device<E>> DeviceMatMul<E, D> {
    pub fn inp(&self) -> usize {
        self.weight.shape().0
    }

    pub fn out(&self) -> usize {
        self.weight.shape().1
    }
}

// NOTE: uniform in +-1/sqrt(fan_in), the same bound for every linear map
impl<E, D: Device<E>> ResetParams<E, D> for DeviceMatMul<E, D>
where
    E: Dtype + num_traits::Float + rand_distr::uniform::SampleUniform,
{
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        let scale = E::from_f64(1.0 / (self.inp() as f64).sqrt()).unwrap();
        self.weight
            .try_fill_with_distr(Uniform::new(-scale, scale))
    }
}

impl<S: Shape, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<S, E, D, T>>
    for DeviceMatMul<E, D>
where
    Tensor<S, E, D, T>: TryMatMul<Tensor<(usize, usize), E, D, T>>,
{
    type Output = <Tensor<S, E, D, T> as TryMatMul<Tensor<(usize, usize), E, D, T>>>::Output;
    type Error = <Tensor<S, E, D, T> as HasErr>::Err;
    fn try_forward(&self, x: Tensor<S, E, D, T>) -> Result<Self::Output, Self::Error> {
        x.try_matmul(self.weight.retaped::<T>())
    }
}
