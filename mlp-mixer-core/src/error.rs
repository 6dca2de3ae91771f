use thiserror::Error;

/// An architecture description that can never produce a working network.
///
/// Raised while building, before any parameter is allocated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    ZeroDimension { field: &'static str },

    #[error("patch size {patch_size} does not divide image size {height}x{width}")]
    PatchSizeMismatch {
        patch_size: usize,
        height: usize,
        width: usize,
    },

    #[error("dropout probability must be in [0, 1), got {p}")]
    InvalidDropout { p: f64 },

    #[error("mixer layer borrows its channel MLP from its network and cannot run alone")]
    SharedChannelMlp,
}

impl ConfigError {
    /// Returns [ConfigError::ZeroDimension] if `value` is zero.
    pub fn check_nonzero(field: &'static str, value: usize) -> Result<(), Self> {
        if value == 0 {
            Err(Self::ZeroDimension { field })
        } else {
            Ok(())
        }
    }

    pub fn check_dropout(p: f64) -> Result<(), Self> {
        if (0.0..1.0).contains(&p) {
            Ok(())
        } else {
            Err(Self::InvalidDropout { p })
        }
    }
}

/// A tensor reached a layer with an axis of the wrong size.
///
/// For an empty batch axis `expected` is the smallest accepted size.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{layer}: axis {axis} expected size {expected}, got {actual}")]
pub struct ShapeError {
    pub layer: &'static str,
    pub axis: usize,
    pub expected: usize,
    pub actual: usize,
}

impl ShapeError {
    pub fn check(
        layer: &'static str,
        axis: usize,
        expected: usize,
        actual: usize,
    ) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self {
                layer,
                axis,
                expected,
                actual,
            })
        }
    }

    /// Rejects a zero sized axis, typically the batch.
    pub fn check_nonempty(layer: &'static str, axis: usize, actual: usize) -> Result<(), Self> {
        if actual == 0 {
            Err(Self {
                layer,
                axis,
                expected: 1,
                actual,
            })
        } else {
            Ok(())
        }
    }
}

/// Error returned by building and by composite forward passes.
///
/// `E` is the device error of the dfdx backend the module lives on.
#[derive(Error, Debug)]
pub enum MixerError<E> {
    #[error("configuration error: {0}")]
    Config(ConfigError),

    #[error("shape error: {0}")]
    Shape(ShapeError),

    #[error("device error: {0:?}")]
    Device(E),
}

impl<E> MixerError<E> {
    pub fn as_config(&self) -> Option<&ConfigError> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&ShapeError> {
        match self {
            Self::Shape(err) => Some(err),
            _ => None,
        }
    }
}

impl<E> From<E> for MixerError<E> {
    fn from(err: E) -> Self {
        Self::Device(err)
    }
}
