//! Capability traits shared by every layer of the mixer network.
//!
//! A layer is described by a small configuration value implementing
//! [BuildOnDevice]. Building it allocates the parameter tensors on a dfdx
//! device; the built value implements [Module] for the tensor shapes it
//! accepts and [ResetParams] for (re)initialisation.

mod error;
mod vecs;

pub use error::{ConfigError, MixerError, ShapeError};

use dfdx::prelude::{Device, Dtype};
use dfdx::tensor::HasErr;

/// Selects the behaviour of mode dependent layers (dropout) for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ForwardMode {
    #[default]
    Inference,
    Training,
}

pub trait Module<X> {
    type Output;
    type Error: std::fmt::Debug;

    /// Forward pass in [ForwardMode::Inference].
    fn try_forward(&self, x: X) -> Result<Self::Output, Self::Error>;

    /// Forward pass with an explicit mode. Layers without mode dependent
    /// behaviour only need [Module::try_forward]; composite layers must pass
    /// `mode` down to their children.
    fn try_forward_mode(&self, x: X, mode: ForwardMode) -> Result<Self::Output, Self::Error> {
        let _ = mode;
        self.try_forward(x)
    }

    fn forward(&self, x: X) -> Self::Output {
        self.try_forward(x).unwrap()
    }

    fn forward_mode(&self, x: X, mode: ForwardMode) -> Self::Output {
        self.try_forward_mode(x, mode).unwrap()
    }
}

pub trait BuildOnDevice<E: Dtype, D: Device<E>>: Clone {
    type Built: Clone;
    fn build_on_device(&self, device: &D) -> Self::Built {
        self.try_build_on_device(device).unwrap()
    }
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>>;
}

pub trait ResetParams<E: Dtype, D: Device<E>> {
    fn reset_params(&mut self) {
        self.try_reset_params().unwrap()
    }
    fn try_reset_params(&mut self) -> Result<(), D::Err>;
}

/// Builds a module and initialises its parameters in one step.
///
/// [BuildOnDevice] alone leaves every weight at zero, which is what the
/// degenerate sanity checks want; this is what everything else wants.
pub trait BuildModuleExt<M>: Sized {
    fn build_module_ext<E: Dtype>(&self, m: M) -> M::Built
    where
        M: BuildOnDevice<E, Self>,
        M::Built: ResetParams<E, Self>,
        Self: Device<E>,
    {
        self.try_build_module_ext(m).unwrap()
    }

    fn try_build_module_ext<E: Dtype>(
        &self,
        m: M,
    ) -> Result<M::Built, MixerError<<Self as HasErr>::Err>>
    where
        M: BuildOnDevice<E, Self>,
        M::Built: ResetParams<E, Self>,
        Self: Device<E>,
    {
        let mut module = m.try_build_on_device(self)?;
        module.try_reset_params()?;
        Ok(module)
    }
}
impl<D, M> BuildModuleExt<M> for D {}
