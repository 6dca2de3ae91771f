use dfdx::prelude::{Device, Dtype, Shape, Tape, Tensor};

use crate::{BuildOnDevice, ConfigError, ForwardMode, MixerError, Module, ResetParams};

/// Zeroes each element with probability `p` during training and scales the
/// survivors by `1 / (1 - p)`. The identity otherwise.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    pub p: f64,
}

impl Dropout {
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for Dropout {
    type Built = Dropout;
    fn try_build_on_device(&self, _: &D) -> Result<Self::Built, MixerError<D::Err>> {
        ConfigError::check_dropout(self.p).map_err(MixerError::Config)?;
        Ok(*self)
    }
}

impl<E: Dtype, D: Device<E>> ResetParams<E, D> for Dropout {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        Ok(())
    }
}

impl<S: Shape, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<S, E, D, T>> for Dropout {
    type Output = Tensor<S, E, D, T>;
    type Error = D::Err;

    fn try_forward(&self, x: Tensor<S, E, D, T>) -> Result<Self::Output, Self::Error> {
        Ok(x)
    }

    fn try_forward_mode(
        &self,
        x: Tensor<S, E, D, T>,
        mode: ForwardMode,
    ) -> Result<Self::Output, Self::Error> {
        match mode {
            ForwardMode::Training if self.p > 0.0 => x.try_dropout(self.p),
            _ => Ok(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfdx::tensor::*;

    #[test]
    fn test_dropout_is_identity_in_inference() {
        let dev: Cpu = Cpu::seed_from_u64(0);
        let x: Tensor<(usize, usize), f32, _> = dev.sample_normal_like(&(4, 32));
        let y = Dropout::new(0.5).forward_mode(x.clone(), ForwardMode::Inference);
        assert_eq!(x.as_vec(), y.as_vec());
    }

    #[test]
    fn test_dropout_zero_probability_is_identity_in_training() {
        let dev: Cpu = Cpu::seed_from_u64(0);
        let x: Tensor<(usize, usize), f32, _> = dev.sample_normal_like(&(4, 32));
        let y = Dropout::new(0.0).forward_mode(x.clone(), ForwardMode::Training);
        assert_eq!(x.as_vec(), y.as_vec());
    }

    #[test]
    fn test_dropout_training_drops_and_rescales() {
        let dev: Cpu = Cpu::seed_from_u64(0);
        let x: Tensor<(usize, usize), f32, _> = dev.ones_like(&(8, 64));
        let y = Dropout::new(0.5)
            .forward_mode(x, ForwardMode::Training)
            .as_vec();
        assert!(y.iter().all(|v| *v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(y.iter().any(|v| *v == 0.0));
        assert!(y.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_invalid_probability_fails_to_build() {
        let dev: Cpu = Default::default();
        let res = BuildOnDevice::<f32, Cpu>::try_build_on_device(&Dropout::new(1.0), &dev);
        assert!(matches!(
            res,
            Err(MixerError::Config(ConfigError::InvalidDropout { .. }))
        ));
    }
}
