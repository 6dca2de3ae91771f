use dfdx::{
    prelude::{Axes2, Axis, Device, Dim, Dtype, Tape, Tensor},
    shapes::HasShape,
    tensor_ops::{BroadcastTo, TryAdd},
};

use crate::{BuildOnDevice, MixerError, Module, ResetParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bias1D(pub usize);

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for Bias1D {
    type Built = DeviceBias1D<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        Ok(DeviceBias1D {
            bias: device.try_zeros_like(&(self.0,))?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct DeviceBias1D<E: Dtype, D: Device<E>> {
    pub bias: Tensor<(usize,), E, D>,
}

impl<E: Dtype, D: Device<E>> ResetParams<E, D> for DeviceBias1D<E, D> {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        self.bias.try_fill_with_zeros()
    }
}

impl<Batch: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<(Batch, usize), E, D, T>>
    for DeviceBias1D<E, D>
{
    type Output = Tensor<(Batch, usize), E, D, T>;
    type Error = D::Err;
    fn try_forward(&self, x: Tensor<(Batch, usize), E, D, T>) -> Result<Self::Output, Self::Error> {
        let shape = *x.shape();
        self.bias
            .retaped::<T>()
            .try_broadcast_like::<_, Axis<0>>(&shape)?
            .try_add(x)
    }
}

impl<Batch: Dim, Seq: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(Batch, Seq, usize), E, D, T>> for DeviceBias1D<E, D>
{
    type Output = Tensor<(Batch, Seq, usize), E, D, T>;
    type Error = D::Err;
    fn try_forward(
        &self,
        x: Tensor<(Batch, Seq, usize), E, D, T>,
    ) -> Result<Self::Output, Self::Error> {
        let shape = *x.shape();
        self.bias
            .retaped::<T>()
            .try_broadcast_like::<_, Axes2<0, 1>>(&shape)?
            .try_add(x)
    }
}
