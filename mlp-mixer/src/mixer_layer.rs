use dfdx::prelude::*;

use crate::{
    layer_norm1d::{DeviceLayerNorm1D, LayerNorm1D},
    mlp_block::{DeviceMlpBlock, MlpBlock},
    BuildOnDevice, ConfigError, ForwardMode, MixerError, Module, ResetParams, ShapeError,
};

/// One mixer layer: token mixing, then channel mixing, each applied to a
/// layer-normalized input and added back onto the stream.
///
/// ```text
/// x1  = x  + T(mlp_tokens(T(norm1(x))))
/// out = x1 + mlp_channels(norm2(x1))
/// ```
/// where `T` swaps the token and channel axes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixerLayer {
    pub tokens: usize,
    pub channels: usize,
    pub token_norm: LayerNorm1D,
    pub token_mlp: MlpBlock,
    pub channel_norm: LayerNorm1D,
    pub channel_mlp: MlpBlock,
}

impl MixerLayer {
    pub fn new(tokens: usize, channels: usize, token_hidden: usize, channel_hidden: usize) -> Self {
        Self {
            tokens,
            channels,
            token_norm: LayerNorm1D(channels),
            token_mlp: MlpBlock::new(tokens, token_hidden),
            channel_norm: LayerNorm1D(channels),
            channel_mlp: MlpBlock::new(channels, channel_hidden),
        }
    }

    pub fn with_dropout(mut self, p: f64) -> Self {
        self.token_mlp = self.token_mlp.with_dropout(p);
        self.channel_mlp = self.channel_mlp.with_dropout(p);
        self
    }

    /// Parameter count, optionally leaving out the channel mixing MLP.
    pub fn num_params(&self, include_channel_mlp: bool) -> usize {
        let norms = 4 * self.channels;
        let channel_mlp = if include_channel_mlp {
            self.channel_mlp.num_params()
        } else {
            0
        };
        norms + self.token_mlp.num_params() + channel_mlp
    }
}

impl<E: Dtype, D: Device<E>> BuildOnDevice<E, D> for MixerLayer {
    type Built = DeviceMixerLayer<E, D>;
    fn try_build_on_device(&self, device: &D) -> Result<Self::Built, MixerError<D::Err>> {
        ConfigError::check_nonzero("tokens", self.tokens).map_err(MixerError::Config)?;
        ConfigError::check_nonzero("channels", self.channels).map_err(MixerError::Config)?;
        Ok(DeviceMixerLayer {
            token_norm: self.token_norm.try_build_on_device(device)?,
            token_mlp: self.token_mlp.try_build_on_device(device)?,
            channel_norm: self.channel_norm.try_build_on_device(device)?,
            channel_mlp: Some(self.channel_mlp.try_build_on_device(device)?),
        })
    }
}

#[derive(Clone, Debug, ResetParams)]
pub struct DeviceMixerLayer<E: Dtype, D: Device<E>> {
    pub token_norm: DeviceLayerNorm1D<E, D>,
    pub token_mlp: DeviceMlpBlock<E, D>,
    pub channel_norm: DeviceLayerNorm1D<E, D>,
    /// `None` when the enclosing network owns one channel MLP for all layers.
    pub channel_mlp: Option<DeviceMlpBlock<E, D>>,
}

impl<E: Dtype, D: Device<E>> DeviceMixerLayer<E, D> {
    pub fn tokens(&self) -> usize {
        self.token_mlp.fc1.inp()
    }

    pub fn channels(&self) -> usize {
        self.channel_norm.features()
    }

    fn check_input<B: Dim>(&self, shape: &(B, usize, usize)) -> Result<(), MixerError<D::Err>> {
        ShapeError::check_nonempty("mixer_layer", 0, shape.0.size())
            .and_then(|_| ShapeError::check("mixer_layer", 1, self.tokens(), shape.1))
            .and_then(|_| ShapeError::check("mixer_layer", 2, self.channels(), shape.2))
            .map_err(|err| {
                tracing::trace!(%err, "rejecting input");
                MixerError::Shape(err)
            })
    }

    /// Forward pass with the channel mixing step done by `channel_mlp`
    /// instead of the layer's own.
    pub fn try_forward_with<B: Dim, T: Tape<E, D>>(
        &self,
        x: Tensor<(B, usize, usize), E, D, T>,
        channel_mlp: &DeviceMlpBlock<E, D>,
        mode: ForwardMode,
    ) -> Result<Tensor<(B, usize, usize), E, D, T>, MixerError<D::Err>> {
        self.check_input(x.shape())?;
        ShapeError::check("mixer_layer", 2, channel_mlp.fc1.inp(), x.shape().2)
            .map_err(MixerError::Shape)?;

        // token mixing: the MLP runs along the token axis of the transposed view
        let (x, tape) = x.split_tape();
        let normed = self.token_norm.try_forward(x.clone().put_tape(tape))?;
        let mixed = self
            .token_mlp
            .try_forward_mode(normed.try_permute::<_, Axes3<0, 2, 1>>()?, mode)?;
        let x = mixed.try_permute::<_, Axes3<0, 2, 1>>()?.try_add(x)?;

        // channel mixing, with the token mixed stream as the skip path
        let (x, tape) = x.split_tape();
        let normed = self.channel_norm.try_forward(x.clone().put_tape(tape))?;
        let mixed = channel_mlp.try_forward_mode(normed, mode)?;
        Ok(mixed.try_add(x)?)
    }
}

impl<B: Dim, E: Dtype, D: Device<E>, T: Tape<E, D>> Module<Tensor<(B, usize, usize), E, D, T>>
    for DeviceMixerLayer<E, D>
{
    type Output = Tensor<(B, usize, usize), E, D, T>;
    type Error = MixerError<D::Err>;

    fn try_forward(
        &self,
        x: Tensor<(B, usize, usize), E, D, T>,
    ) -> Result<Self::Output, Self::Error> {
        self.try_forward_mode(x, ForwardMode::Inference)
    }

    fn try_forward_mode(
        &self,
        x: Tensor<(B, usize, usize), E, D, T>,
        mode: ForwardMode,
    ) -> Result<Self::Output, Self::Error> {
        let channel_mlp = self
            .channel_mlp
            .as_ref()
            .ok_or(MixerError::Config(ConfigError::SharedChannelMlp))?;
        self.try_forward_with(x, channel_mlp, mode)
    }
}
