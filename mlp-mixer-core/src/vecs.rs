use dfdx::prelude::{Device, Dtype};

use crate::{ForwardMode, MixerError};

impl<E: Dtype, D: Device<E>, T: crate::BuildOnDevice<E, D>> crate::BuildOnDevice<E, D> for Vec<T> {
    type Built = Vec<T::Built>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        self.iter()
            .map(|m_i| m_i.try_build_on_device(device))
            .collect()
    }
}

impl<E: Dtype, D: Device<E>, T: crate::ResetParams<E, D>> crate::ResetParams<E, D> for Vec<T> {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        for m_i in self.iter_mut() {
            m_i.try_reset_params()?;
        }
        Ok(())
    }
}

impl<Input, T: crate::Module<Input, Output = Input>> crate::Module<Input> for Vec<T> {
    type Output = T::Output;
    type Error = T::Error;

    fn try_forward(&self, x: Input) -> Result<Self::Output, T::Error> {
        self.try_forward_mode(x, ForwardMode::Inference)
    }

    fn try_forward_mode(&self, mut x: Input, mode: ForwardMode) -> Result<Self::Output, T::Error> {
        for m_i in self.iter() {
            x = m_i.try_forward_mode(x, mode)?;
        }
        Ok(x)
    }
}

impl<E: Dtype, D: Device<E>, T: crate::BuildOnDevice<E, D>> crate::BuildOnDevice<E, D>
    for Option<T>
{
    type Built = Option<T::Built>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        self.as_ref()
            .map(|m| m.try_build_on_device(device))
            .transpose()
    }
}

impl<E: Dtype, D: Device<E>, T: crate::ResetParams<E, D>> crate::ResetParams<E, D> for Option<T> {
    fn try_reset_params(&mut self) -> Result<(), D::Err> {
        match self {
            Some(m) => m.try_reset_params(),
            None => Ok(()),
        }
    }
}

/// An absent module is the identity.
impl<Input, T: crate::Module<Input, Output = Input>> crate::Module<Input> for Option<T> {
    type Output = T::Output;
    type Error = T::Error;

    fn try_forward(&self, x: Input) -> Result<Self::Output, T::Error> {
        self.try_forward_mode(x, ForwardMode::Inference)
    }

    fn try_forward_mode(&self, x: Input, mode: ForwardMode) -> Result<Self::Output, T::Error> {
        match self {
            Some(m) => m.try_forward_mode(x, mode),
            None => Ok(x),
        }
    }
}
