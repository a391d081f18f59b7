//! # natten
//!
//! **Neighborhood attention AV kernels built on numr: forward, backward, autograd.**
//!
//! In 2D neighborhood attention every query attends to a `K x K` window of keys
//! around it. This crate implements the attention-value step: given the window
//! weights (`attn`, produced by the QK step) and the value tensor, it computes the
//! output and, for training, the gradients with respect to both inputs.
//!
//! ```text
//! attn [B, heads, H, W, K*K] ─┐
//!                             ├─► natten_av_fwd ─► out [B, heads, H, W, dim]
//! value [B, heads, H, W, dim] ┘
//!
//! d_out + attn + value ─► natten_av_bwd ─► (d_attn, d_value)
//! ```
//!
//! ## Design
//!
//! - **Extension traits**: [`NeighborhoodAttentionOps`] implemented on numr's clients
//! - **impl_generic**: window geometry, precision units, tile table and validation,
//!   shared by every backend
//! - **Kernels**: specialized per kernel size (5, 7, 9, 11, 13) and dilation mode,
//!   with a tiled backward-to-attention path for head dim 32
//! - **Autograd**: [`var_natten_av`] registers the backward pass on numr's graph

pub mod error;
pub mod ops;

// Re-export primary natten API
pub use ops::{NattenConfig, NeighborhoodAttentionOps, var_natten_av};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
