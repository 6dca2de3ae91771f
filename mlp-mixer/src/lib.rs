//! MLP-Mixer image classifier built from dfdx tensors.
//!
//! Images `(batch, channels, height, width)` are cut into patches, embedded,
//! passed through a stack of [mixer_layer::MixerLayer]s and pooled into
//! `(batch, num_classes)` logits. See [mixer::MixerNetwork] for the entry point.

pub mod avg_pool_tokens;
pub mod bias1d;
pub mod dropout;
pub mod gelu;
pub mod layer_norm1d;
pub mod linear;
pub mod matmul;
pub mod mixer;
pub mod mixer_layer;
pub mod mlp_block;
pub mod patch_embedding;

pub use mixer::{DeviceMixerNetwork, MixerNetwork, MixerVariant};
pub use mixer_layer::{DeviceMixerLayer, MixerLayer};
pub use mlp_block::{DeviceMlpBlock, MlpBlock};
pub use patch_embedding::{DevicePatchEmbedding, PatchEmbedding};

pub use mlp_mixer_core::*;
pub use mlp_mixer_derives::*;
