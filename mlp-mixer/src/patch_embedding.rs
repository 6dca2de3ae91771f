use dfdx::prelude::*;

use crate::{
    linear::{DeviceLinear, Linear},
    BuildOnDevice, ConfigError, MixerError, Module, ResetParams, ShapeError,
};

/// Cuts an image into non-overlapping `patch_size x patch_size` patches and
/// projects every flattened patch with one shared linear map.
///
/// The projection is shared across patch positions, so the parameter count
/// does not depend on the image size. A flattened patch is laid out channel
/// first, then row, then column within the patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchEmbedding {
    pub in_channels: usize,
    pub height: usize,
    pub width: usize,
    pub patch_size: usize,
    pub hidden_dim: usize,
}

impl PatchEmbedding {
    pub fn new(
        in_channels: usize,
        image_size: (usize, usize),
        patch_size: usize,
        hidden_dim: usize,
    ) -> Self {
        Self {
            in_channels,
            height: image_size.0,
            width: image_size.1,
            patch_size,
            hidden_dim,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_nonzero("in_channels", self.in_channels)?;
        ConfigError::check_nonzero("height", self.height)?;
        ConfigError::check_nonzero("width", self.width)?;
        ConfigError::check_nonzero("patch_size", self.patch_size)?;
        ConfigError::check_nonzero("hidden_dim", self.hidden_dim)?;
        if self.height % self.patch_size != 0 || self.width % self.patch_size != 0 {
            return Err(ConfigError::PatchSizeMismatch {
                patch_size: self.patch_size,
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }

    /// Patches per column and per row.
    pub fn grid(&self) -> (usize, usize) {
        (self.height / self.patch_size, self.width / self.patch_size)
    }

    pub fn num_patches(&self) -> usize {
        let (rows, cols) = self.grid();
        rows * cols
    }

    pub fn patch_features(&self) -> usize {
        self.in_channels * self.patch_size * self.patch_size
    }

    pub fn num_params(&self) -> usize {
        (self.patch_features() + 1) * self.hidden_dim
    }
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for PatchEmbedding {
    type Built = DevicePatchEmbedding<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        if let Err(err) = self.validate() {
            tracing::warn!(%err, "rejecting patch embedding");
            return Err(MixerError::Config(err));
        }
        tracing::debug!(
            patches = self.num_patches(),
            patch_features = self.patch_features(),
            hidden_dim = self.hidden_dim,
            "building patch embedding"
        );
        Ok(DevicePatchEmbedding {
            proj: Linear::new(self.patch_features(), self.hidden_dim).try_build_on_device(device)?,
            in_channels: self.in_channels,
            height: self.height,
            width: self.width,
            patch_size: self.patch_size,
        })
    }
}

#[derive(Clone, Debug, ResetParams)]
pub struct DevicePatchEmbedding<E: Dtype, D: Device<E>> {
    pub proj: DeviceLinear<E, D>,
    pub in_channels: usize,
    pub height: usize,
    pub width: usize,
    pub patch_size: usize,
}

impl<E: Dtype, D: Device<E>> DevicePatchEmbedding<E, D> {
    pub fn num_patches(&self) -> usize {
        (self.height / self.patch_size) * (self.width / self.patch_size)
    }

    pub fn hidden_dim(&self) -> usize {
        self.proj.out()
    }

    fn check_image<B: Dim>(
        &self,
        shape: &(B, usize, usize, usize),
    ) -> Result<(), MixerError<D::Err>> {
        ShapeError::check_nonempty("patch_embedding", 0, shape.0.size())
            .and_then(|_| ShapeError::check("patch_embedding", 1, self.in_channels, shape.1))
            .and_then(|_| ShapeError::check("patch_embedding", 2, self.height, shape.2))
            .and_then(|_| ShapeError::check("patch_embedding", 3, self.width, shape.3))
            .map_err(|err| {
                tracing::trace!(%err, "rejecting image");
                MixerError::Shape(err)
            })
    }
}

impl<B: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(B, usize, usize, usize), E, D, T>> for DevicePatchEmbedding<E, D>
{
    type Output = Tensor<(B, usize, usize), E, D, T>;
    type Error = MixerError<D::Err>;

    fn try_forward(
        &self,
        x: Tensor<(B, usize, usize, usize), E, D, T>,
    ) -> Result<Self::Output, Self::Error> {
        self.check_image(x.shape())?;
        let (batch, channels, height, width) = *x.shape();
        let p = self.patch_size;
        let (rows, cols) = (height / p, width / p);

        // (b c r p) x cols x p  ->  (b c r) x cols x p x p
        let patches = x
            .try_reshape_like(&(batch.size() * channels * rows, p, cols, p))?
            .try_permute::<_, Axes4<0, 2, 1, 3>>()?;
        // b x c x (r cols) x (p p)  ->  b x (r cols) x (c p p)
        let patches = patches
            .try_reshape_like(&(batch, channels, rows * cols, p * p))?
            .try_permute::<_, Axes4<0, 2, 1, 3>>()?
            .try_reshape_like(&(batch, rows * cols, channels * p * p))?;

        self.proj.try_forward(patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildModuleExt;

    #[test]
    fn test_patch_embedding_shape() {
        let dev: Cpu = Cpu::seed_from_u64(0);
        let m = dev.build_module_ext::<f32>(PatchEmbedding::new(3, (32, 32), 8, 64));
        let x: Tensor<(usize, usize, usize, usize), f32, _> =
            dev.sample_normal_like(&(2, 3, 32, 32));
        let y = m.forward(x);
        assert_eq!(*y.shape(), (2, 16, 64));
    }

    #[test]
    fn test_non_rectangular_grid() {
        let dev: Cpu = Cpu::seed_from_u64(0);
        let m = dev.build_module_ext::<f32>(PatchEmbedding::new(1, (8, 12), 4, 5));
        let x: Tensor<(Const<3>, usize, usize, usize), f32, _> =
            dev.sample_normal_like(&(Const, 1, 8, 12));
        let y = m.forward(x);
        assert_eq!(*y.shape(), (Const::<3>, 6, 5));
    }

    #[test]
    fn test_non_dividing_patch_size_is_config_error() {
        let dev: Cpu = Default::default();
        let cfg = PatchEmbedding::new(3, (33, 32), 8, 64);
        let res = BuildOnDevice::<f32, Cpu>::try_build_on_device(&cfg, &dev);
        assert!(matches!(
            res,
            Err(MixerError::Config(ConfigError::PatchSizeMismatch {
                patch_size: 8,
                height: 33,
                width: 32
            }))
        ));
    }

    #[test]
    fn test_wrong_image_size_is_shape_error() {
        let dev: Cpu = Default::default();
        let m = dev.build_module_ext::<f32>(PatchEmbedding::new(3, (32, 32), 8, 64));
        let x: Tensor<(usize, usize, usize, usize), f32, _> = dev.zeros_like(&(1, 3, 40, 32));
        let err = m.try_forward(x).unwrap_err();
        assert_eq!(err.as_shape().map(|e| (e.axis, e.actual)), Some((2, 40)));

        let x: Tensor<(usize, usize, usize, usize), f32, _> = dev.zeros_like(&(1, 1, 32, 32));
        let err = m.try_forward(x).unwrap_err();
        assert_eq!(err.as_shape().map(|e| (e.axis, e.actual)), Some((1, 1)));
    }

    #[test]
    fn test_empty_batch_is_shape_error() {
        let dev: Cpu = Default::default();
        let m = dev.build_module_ext::<f32>(PatchEmbedding::new(3, (16, 12), 4, 16));
        let x: Tensor<(usize, usize, usize, usize), f32, _> = dev.zeros_like(&(0, 3, 16, 12));
        let err = m.try_forward(x).unwrap_err();
        assert_eq!(
            err.as_shape(),
            Some(&ShapeError {
                layer: "patch_embedding",
                axis: 0,
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_patches_are_extracted_in_order() {
        let dev: Cpu = Default::default();
        let (c, h, w, p) = (2, 4, 6, 2);
        let features = c * p * p;
        let mut m = PatchEmbedding::new(c, (h, w), p, features).build_on_device(&dev);
        let mut eye = vec![0.0f32; features * features];
        for i in 0..features {
            eye[i * features + i] = 1.0;
        }
        m.proj.matmul.weight = dev.tensor_from_vec(eye, (features, features));

        let pixel = |ch: usize, y: usize, x: usize| (ch * 100 + y * 10 + x) as f32;
        let mut image = Vec::new();
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    image.push(pixel(ch, y, x));
                }
            }
        }
        let x = dev.tensor_from_vec(image, (Const::<1>, c, h, w));

        let mut expected = Vec::new();
        for r in 0..h / p {
            for col in 0..w / p {
                for ch in 0..c {
                    for u in 0..p {
                        for v in 0..p {
                            expected.push(pixel(ch, r * p + u, col * p + v));
                        }
                    }
                }
            }
        }
        assert_eq!(m.forward(x).as_vec(), expected);
    }

    #[test]
    fn test_params_independent_of_resolution() {
        let small = PatchEmbedding::new(3, (32, 32), 8, 64);
        let large = PatchEmbedding::new(3, (256, 128), 8, 64);
        assert_eq!(small.num_params(), large.num_params());
        assert_eq!(small.num_params(), (3 * 8 * 8 + 1) * 64);
    }
}
