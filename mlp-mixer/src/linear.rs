use crate::{
    bias1d::{Bias1D, DeviceBias1D},
    matmul::{DeviceMatMul, MatMul},
    BuildOnDevice, MixerError, Module, ResetParams, ShapeError,
};

use dfdx::prelude::{Device, Dim, Dtype, HasShape, Tape, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Linear {
    pub matmul: MatMul,
    pub bias: Bias1D,
}

impl Linear {
    pub fn new(inp: usize, out: usize) -> Self {
        Self {
            matmul: MatMul { inp, out },
            bias: Bias1D(out),
        }
    }
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for Linear {
    type Built = DeviceLinear<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        Ok(DeviceLinear {
            matmul: self.matmul.try_build_on_device(device)?,
            bias: self.bias.try_build_on_device(device)?,
        })
    }
}

#[derive(Clone, Debug, ResetParams)]
pub struct DeviceLinear<E: Dtype, D: Device<E>> {
    pub matmul: DeviceMatMul<E, D>,
    pub bias: DeviceBias1D<E, D>,
}

impl<E: Dtype, D: Device<E>> DeviceLinear<E, D> {
    pub fn inp(&self) -> usize {
        self.matmul.inp()
    }

    pub fn out(&self) -> usize {
        self.matmul.out()
    }

    fn check_features<Err>(&self, axis: usize, features: usize) -> Result<(), MixerError<Err>> {
        ShapeError::check("linear", axis, self.inp(), features).map_err(|err| {
            tracing::trace!(%err, "rejecting input");
            MixerError::Shape(err)
        })
    }
}

impl<Batch: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<(Batch, usize), E, D, T>>
    for DeviceLinear<E, D>
{
    type Output = Tensor<(Batch, usize), E, D, T>;
    type Error = MixerError<D::Err>;
    fn try_forward(&self, x: Tensor<(Batch, usize), E, D, T>) -> Result<Self::Output, Self::Error> {
        self.check_features(1, x.shape().1)?;
        let x = self.matmul.try_forward(x)?;
        Ok(self.bias.try_forward(x)?)
    }
}

impl<Batch: Dim, Seq: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(Batch, Seq, usize), E, D, T>> for DeviceLinear<E, D>
{
    type Output = Tensor<(Batch, Seq, usize), E, D, T>;
    type Error = MixerError<D::Err>;
    fn try_forward(
        &self,
        x: Tensor<(Batch, Seq, usize), E, D, T>,
    ) -> Result<Self::Output, Self::Error> {
        self.check_features(2, x.shape().2)?;
        let x = self.matmul.try_forward(x)?;
        Ok(self.bias.try_forward(x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildModuleExt;
    use dfdx::{shapes::*, tensor::*};

    #[test]
    fn test_linear_2d_known_values() {
        let dev: Cpu = Default::default();
        let mut m = Linear::new(2, 3).build_on_device(&dev);
        m.matmul.weight = dev.tensor_from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        m.bias.bias = dev.tensor_from_vec(vec![0.5f32, -0.5, 0.0], (3,));
        let x = dev.tensor_from_vec(vec![1.0f32, 1.0], (Const::<1>, 2));
        let y = m.forward(x);
        assert_eq!(y.as_vec(), vec![5.5, 6.5, 9.0]);
    }

    #[test]
    fn test_linear_3d_shape() {
        let dev: Cpu = Default::default();
        let m = dev.build_module_ext::<f32>(Linear::new(128, 256));
        let x: Tensor<(usize, usize, usize), f32, _> = dev.sample_normal_like(&(2, 16, 128));
        let y = m.forward(x);
        assert_eq!(*y.shape(), (2, 16, 256));
    }

    #[test]
    fn test_linear_rejects_wrong_features() {
        let dev: Cpu = Default::default();
        let m = dev.build_module_ext::<f32>(Linear::new(8, 4));
        let x: Tensor<(usize, usize, usize), f32, _> = dev.zeros_like(&(2, 5, 7));
        let err = m.try_forward(x).unwrap_err();
        assert_eq!(
            err.as_shape(),
            Some(&ShapeError {
                layer: "linear",
                axis: 2,
                expected: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn test_reset_params_bounds() {
        let dev: Cpu = Cpu::seed_from_u64(0);
        let m = dev.build_module_ext::<f32>(Linear::new(16, 32));
        let bound = 1.0 / 4.0;
        let w = m.matmul.weight.as_vec();
        assert!(w.iter().all(|v| v.abs() <= bound));
        assert!(w.iter().any(|v| *v != 0.0));
        assert!(m.bias.bias.as_vec().iter().all(|v| *v == 0.0));
    }
}
