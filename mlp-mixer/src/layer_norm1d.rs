use dfdx::prelude::*;

use crate::{BuildOnDevice, MixerError, Module, ResetParams, ShapeError};

/// Normalizes the last axis to zero mean and unit variance, then applies a
/// learned per-feature scale and shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerNorm1D(pub usize);

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for LayerNorm1D {
    type Built = DeviceLayerNorm1D<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        Ok(DeviceLayerNorm1D {
            gamma: device.try_ones_like(&(self.0,))?,
            beta: device.try_zeros_like(&(self.0,))?,
            epsilon: 1e-5,
        })
    }
}

#[derive(Clone, Debug)]
pub struct DeviceLayerNorm1D<E: Dtype, D: Device<E>> {
    pub gamma: Tensor<(usize,), E, D>,
    pub beta: Tensor<(usize,), E, D>,
    pub epsilon: f64,
}

impl<E: Dtype, D: Device<E>> DeviceLayerNorm1D<E, D> {
    pub fn features(&self) -> usize {
        self.gamma.shape().0
    }

    fn check_features<Err>(&self, axis: usize, features: usize) -> Result<(), MixerError<Err>> {
        ShapeError::check("layer_norm", axis, self.features(), features).map_err(|err| {
            tracing::trace!(%err, "rejecting input");
            MixerError::Shape(err)
        })
    }
}

impl<E: Dtype, D: Device<E>> ResetParams<E, D> for DeviceLayerNorm1D<E, D> {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        self.gamma.try_fill_with_ones()?;
        self.beta.try_fill_with_zeros()
    }
}

impl<Batch: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(Batch, usize), E, D, T>> for DeviceLayerNorm1D<E, D>
{
    type Output = Tensor<(Batch, usize), E, D, T>;
    type Error = MixerError<D::Err>;
    fn try_forward(&self, x: Tensor<(Batch, usize), E, D, T>) -> Result<Self::Output, Self::Error> {
        let shape = *x.shape();
        self.check_features(1, shape.1)?;
        let x = x.try_normalize::<Axis<1>>(self.epsilon)?;
        let x = self
            .gamma
            .retaped::<T>()
            .try_broadcast_like::<_, Axis<0>>(&shape)?
            .try_mul(x)?;
        Ok(self
            .beta
            .retaped::<T>()
            .try_broadcast_like::<_, Axis<0>>(&shape)?
            .try_add(x)?)
    }
}

impl<Batch: Dim, Seq: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(Batch, Seq, usize), E, D, T>> for DeviceLayerNorm1D<E, D>
{
    type Output = Tensor<(Batch, Seq, usize), E, D, T>;
    type Error = MixerError<D::Err>;
    fn try_forward(
        &self,
        x: Tensor<(Batch, Seq, usize), E, D, T>,
    ) -> Result<Self::Output, Self::Error> {
        let shape = *x.shape();
        self.check_features(2, shape.2)?;
        let x = x.try_normalize::<Axis<2>>(self.epsilon)?;
        let x = self
            .gamma
            .retaped::<T>()
            .try_broadcast_like::<_, Axes2<0, 1>>(&shape)?
            .try_mul(x)?;
        Ok(self
            .beta
            .retaped::<T>()
            .try_broadcast_like::<_, Axes2<0, 1>>(&shape)?
            .try_add(x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildModuleExt;

    #[test]
    fn test_layer_norm_normalizes_last_axis() {
        let dev: Cpu = Cpu::seed_from_u64(1);
        let m = dev.build_module_ext::<f32>(LayerNorm1D(16));
        let x: Tensor<(usize, usize, usize), f32, _> = dev.sample_normal_like(&(2, 3, 16));
        let y = m.forward(x).as_vec();
        for row in y.chunks(16) {
            let mean = row.iter().sum::<f32>() / 16.0;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 16.0;
            assert!(mean.abs() < 1e-4, "{mean}");
            assert!((var - 1.0).abs() < 1e-3, "{var}");
        }
    }

    #[test]
    fn test_layer_norm_affine() {
        let dev: Cpu = Default::default();
        let mut m = LayerNorm1D(2).build_on_device(&dev);
        m.gamma = dev.tensor_from_vec(vec![2.0f32, 3.0], (2,));
        m.beta = dev.tensor_from_vec(vec![0.5f32, -0.5], (2,));
        m.epsilon = 0.0;
        let x = dev.tensor_from_vec(vec![1.0f32, 3.0], (Const::<1>, 2));
        let y = m.forward(x).as_vec();
        assert_eq!(y, vec![-1.5, 2.5]);
    }

    #[test]
    fn test_layer_norm_of_zeros_is_beta() {
        let dev: Cpu = Default::default();
        let m = dev.build_module_ext::<f32>(LayerNorm1D(8));
        let x: Tensor<(usize, usize, usize), f32, _> = dev.zeros_like(&(2, 4, 8));
        assert!(m.forward(x).as_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_layer_norm_rejects_wrong_features() {
        let dev: Cpu = Default::default();
        let m = dev.build_module_ext::<f32>(LayerNorm1D(8));
        let x: Tensor<(usize, usize), f32, _> = dev.zeros_like(&(2, 9));
        let err = m.try_forward(x).unwrap_err();
        assert_eq!(err.as_shape().map(|e| (e.axis, e.actual)), Some((1, 9)));
    }
}
