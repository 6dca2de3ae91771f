use dfdx::{
    prelude::{Axis, Device, Dim, Dtype, Tape, Tensor},
    tensor_ops::MeanTo,
};

use crate::{BuildOnDevice, MixerError, ResetParams};

/// Global average pooling over the token axis: `(batch, tokens, channels)`
/// becomes `(batch, channels)`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvgPoolTokens;

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for AvgPoolTokens {
    type Built = AvgPoolTokens;
    fn try_build_on_device(&self, _: &D) -> Result<Self::Built, MixerError<D::Err>> {
        Ok(*self)
    }
}

impl<E: Dtype, D: Device<E>> ResetParams<E, D> for AvgPoolTokens {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        Ok(())
    }
}

impl<B: Dim, S: Dim, C: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    crate::Module<Tensor<(B, S, C), E, D, T>> for AvgPoolTokens
{
    type Output = Tensor<(B, C), E, D, T>;
    type Error = D::Err;

    fn try_forward(&self, input: Tensor<(B, S, C), E, D, T>) -> Result<Self::Output, D::Err> {
        input.try_mean::<(B, C), Axis<1>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Module;
    use dfdx::{shapes::*, tensor::*};

    #[test]
    fn test_pools_over_tokens() {
        let dev: Cpu = Default::default();
        let x = dev.tensor_from_vec(
            vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
            (2usize, 3usize, 2usize),
        );
        let y = AvgPoolTokens.forward(x);
        assert_eq!(*y.shape(), (2, 2));
        assert_eq!(y.as_vec(), vec![3.0, 4.0, 30.0, 40.0]);
    }
}
