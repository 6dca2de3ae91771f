use dfdx::prelude::{Device, Dim, Dtype, Tape, Tensor};
use serde::{Deserialize, Serialize};

use crate::{
    avg_pool_tokens::AvgPoolTokens,
    layer_norm1d::{DeviceLayerNorm1D, LayerNorm1D},
    linear::{DeviceLinear, Linear},
    mixer_layer::{DeviceMixerLayer, MixerLayer},
    mlp_block::DeviceMlpBlock,
    patch_embedding::{DevicePatchEmbedding, PatchEmbedding},
    BuildOnDevice, ConfigError, ForwardMode, MixerError, Module, ResetParams,
};

/// The published model sizes, all at 224x224 input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixerVariant {
    Small,
    Base,
    Large,
    Huge,
}

impl MixerVariant {
    /// `(num_blocks, hidden_dim, token_hidden, channel_hidden)`
    pub fn dims(self) -> (usize, usize, usize, usize) {
        match self {
            Self::Small => (8, 512, 256, 2048),
            Self::Base => (12, 768, 384, 3072),
            Self::Large => (24, 1024, 512, 4096),
            Self::Huge => (32, 1280, 640, 5120),
        }
    }
}

fn default_in_channels() -> usize {
    3
}

/// Architecture of a full classifier:
/// patch embedding, `num_blocks` mixer layers, mean pooling over tokens and a
/// linear head producing unnormalized logits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixerNetwork {
    pub num_classes: usize,
    pub num_blocks: usize,
    pub patch_size: usize,
    pub hidden_dim: usize,
    pub token_hidden: usize,
    pub channel_hidden: usize,
    /// `(height, width)`
    pub image_size: (usize, usize),
    #[serde(default = "default_in_channels")]
    pub in_channels: usize,
    #[serde(default)]
    pub dropout: f64,
    /// Every layer uses the channel mixing parameters of the first layer.
    #[serde(default)]
    pub tie_channel_mixing: bool,
    /// Layer norm between the last mixer layer and pooling.
    #[serde(default)]
    pub pre_head_norm: bool,
}

impl MixerNetwork {
    pub fn new(
        num_classes: usize,
        num_blocks: usize,
        patch_size: usize,
        hidden_dim: usize,
        token_hidden: usize,
        channel_hidden: usize,
        image_size: (usize, usize),
    ) -> Self {
        Self {
            num_classes,
            num_blocks,
            patch_size,
            hidden_dim,
            token_hidden,
            channel_hidden,
            image_size,
            in_channels: default_in_channels(),
            dropout: 0.0,
            tie_channel_mixing: false,
            pre_head_norm: false,
        }
    }

    pub fn preset(variant: MixerVariant, patch_size: usize, num_classes: usize) -> Self {
        let (num_blocks, hidden_dim, token_hidden, channel_hidden) = variant.dims();
        Self::new(
            num_classes,
            num_blocks,
            patch_size,
            hidden_dim,
            token_hidden,
            channel_hidden,
            (224, 224),
        )
        .with_pre_head_norm(true)
    }

    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    pub fn with_dropout(mut self, p: f64) -> Self {
        self.dropout = p;
        self
    }

    pub fn with_tied_channel_mixing(mut self, tie: bool) -> Self {
        self.tie_channel_mixing = tie;
        self
    }

    pub fn with_pre_head_norm(mut self, enabled: bool) -> Self {
        self.pre_head_norm = enabled;
        self
    }

    pub fn patch_embedding(&self) -> PatchEmbedding {
        PatchEmbedding::new(
            self.in_channels,
            self.image_size,
            self.patch_size,
            self.hidden_dim,
        )
    }

    pub fn mixer_layer(&self) -> MixerLayer {
        MixerLayer::new(
            self.num_tokens(),
            self.hidden_dim,
            self.token_hidden,
            self.channel_hidden,
        )
        .with_dropout(self.dropout)
    }

    pub fn num_tokens(&self) -> usize {
        self.patch_embedding().num_patches()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_nonzero("num_classes", self.num_classes)?;
        ConfigError::check_nonzero("num_blocks", self.num_blocks)?;
        ConfigError::check_nonzero("token_hidden", self.token_hidden)?;
        ConfigError::check_nonzero("channel_hidden", self.channel_hidden)?;
        ConfigError::check_dropout(self.dropout)?;
        self.patch_embedding().validate()
    }

    /// Number of trainable scalars, counting tied parameters once.
    pub fn num_params(&self) -> usize {
        let layer = self.mixer_layer();
        let layers = if self.tie_channel_mixing {
            self.num_blocks * layer.num_params(false) + layer.channel_mlp.num_params()
        } else {
            self.num_blocks * layer.num_params(true)
        };
        let pre_head = if self.pre_head_norm {
            2 * self.hidden_dim
        } else {
            0
        };
        let head = (self.hidden_dim + 1) * self.num_classes;
        self.patch_embedding().num_params() + layers + pre_head + head
    }
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for MixerNetwork {
    type Built = DeviceMixerNetwork<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        if let Err(err) = self.validate() {
            tracing::warn!(%err, "rejecting mixer network");
            return Err(MixerError::Config(err));
        }
        tracing::debug!(
            num_blocks = self.num_blocks,
            tokens = self.num_tokens(),
            hidden_dim = self.hidden_dim,
            num_classes = self.num_classes,
            tied = self.tie_channel_mixing,
            params = self.num_params(),
            "building mixer network"
        );

        let mut layers = vec![self.mixer_layer(); self.num_blocks].try_build_on_device(device)?;
        let mut shared_channel_mlp = None;
        if self.tie_channel_mixing {
            for layer in layers.iter_mut() {
                let own = layer.channel_mlp.take();
                if shared_channel_mlp.is_none() {
                    shared_channel_mlp = own;
                }
            }
        }

        Ok(DeviceMixerNetwork {
            patch_embed: self.patch_embedding().try_build_on_device(device)?,
            layers,
            shared_channel_mlp,
            pre_head_norm: self
                .pre_head_norm
                .then_some(LayerNorm1D(self.hidden_dim))
                .try_build_on_device(device)?,
            pool: AvgPoolTokens,
            head: Linear::new(self.hidden_dim, self.num_classes).try_build_on_device(device)?,
        })
    }
}

/// With tied channel mixing the layers hold no channel MLP of their own and
/// every one of them runs `shared_channel_mlp`, so updates and gradients land
/// in a single set of tensors.
#[derive(Clone, Debug, ResetParams)]
pub struct DeviceMixerNetwork<E: Dtype, D: Device<E>> {
    pub patch_embed: DevicePatchEmbedding<E, D>,
    pub layers: Vec<DeviceMixerLayer<E, D>>,
    pub shared_channel_mlp: Option<DeviceMlpBlock<E, D>>,
    pub pre_head_norm: Option<DeviceLayerNorm1D<E, D>>,
    pub pool: AvgPoolTokens,
    pub head: DeviceLinear<E, D>,
}

impl<E: Dtype, D: Device<E>> DeviceMixerNetwork<E, D> {
    pub fn num_classes(&self) -> usize {
        self.head.out()
    }

    pub fn is_channel_mixing_tied(&self) -> bool {
        self.shared_channel_mlp.is_some()
    }
}

impl<B: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>>
    Module<Tensor<(B, usize, usize, usize), E, D, T>> for DeviceMixerNetwork<E, D>
{
    type Output = Tensor<(B, usize), E, D, T>;
    type Error = MixerError<D::Err>;

    fn try_forward(
        &self,
        x: Tensor<(B, usize, usize, usize), E, D, T>,
    ) -> Result<Self::Output, Self::Error> {
        self.try_forward_mode(x, ForwardMode::Inference)
    }

    fn try_forward_mode(
        &self,
        x: Tensor<(B, usize, usize, usize), E, D, T>,
        mode: ForwardMode,
    ) -> Result<Self::Output, Self::Error> {
        let mut x = self.patch_embed.try_forward(x)?;
        for layer in self.layers.iter() {
            x = match &self.shared_channel_mlp {
                Some(channel_mlp) => layer.try_forward_with(x, channel_mlp, mode)?,
                None => layer.try_forward_mode(x, mode)?,
            };
        }
        let x = self.pre_head_norm.try_forward(x)?;
        let x = self.pool.try_forward(x)?;
        self.head.try_forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_sizes() {
        let cfg = MixerNetwork::new(10, 2, 16, 128, 256, 512, (64, 64));
        assert_eq!(cfg.num_tokens(), 16);
        assert_eq!(cfg.in_channels, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_small_16_param_count() {
        let cfg = MixerNetwork::preset(MixerVariant::Small, 16, 1000);
        assert_eq!(cfg.num_tokens(), 196);
        assert_eq!(cfg.num_params(), 18_528_264);
    }

    #[test]
    fn test_tying_shrinks_param_count() {
        let untied = MixerNetwork::new(10, 4, 4, 32, 16, 64, (16, 16));
        let tied = untied.clone().with_tied_channel_mixing(true);
        let channel_mlp = untied.mixer_layer().channel_mlp.num_params();
        assert_eq!(untied.num_params() - tied.num_params(), 3 * channel_mlp);
    }

    #[test]
    fn test_validate_rejects() {
        let cfg = MixerNetwork::new(10, 2, 16, 128, 256, 512, (64, 60));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PatchSizeMismatch { .. })
        ));
        let cfg = MixerNetwork::new(0, 2, 16, 128, 256, 512, (64, 64));
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDimension {
                field: "num_classes"
            })
        );
        let cfg = MixerNetwork::new(10, 2, 16, 128, 256, 512, (64, 64)).with_dropout(1.5);
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidDropout { p: 1.5 }));
    }
}
