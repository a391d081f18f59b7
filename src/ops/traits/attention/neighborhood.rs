//! Neighborhood attention AV traits

use crate::error::Result;
use crate::ops::impl_generic::neighborhood::NattenConfig;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// 2D neighborhood attention, attention-value step
///
/// Every output position aggregates a `K x K` window of value vectors with weights
/// produced upstream by the QK step. Windows near a border are shifted inward, never
/// padded, so every output reads exactly `K * K` valid values. With `dilation > 1` the
/// window samples every `dilation`-th position and the clamp happens inside each
/// residue group.
///
/// This is a PRIMITIVE op: each backend ships its own kernels.
///
/// # Layout contract
///
/// - `value`: `[B, heads, H, W, dim]`, F32 or F16, contiguous
/// - `attn`: `[B, heads, H, W, K*K]`, same dtype, window offsets row-major
/// - Output: `[B, heads, H, W, dim]`
///
/// `K` is inferred from `attn` and must be one of 5, 7, 9, 11, 13. `H` and `W` must
/// be at least `K * dilation`. Under F16, `dim` must be even.
pub trait NeighborhoodAttentionOps<R: Runtime> {
    /// AV forward: `out[b,h,i,j,:] = sum_k attn[b,h,i,j,k] * value[b,h,window(i,j,k),:]`
    fn natten_av_fwd(
        &self,
        attn: &Tensor<R>,
        value: &Tensor<R>,
        dilation: usize,
        config: &NattenConfig,
    ) -> Result<Tensor<R>>;

    /// AV backward
    ///
    /// # Arguments
    /// - `d_out`: gradient of the forward output, shaped like `value`
    /// - `attn`, `value`: forward inputs
    ///
    /// # Returns
    /// `(d_attn, d_value)`, shaped like `attn` and `value`
    fn natten_av_bwd(
        &self,
        d_out: &Tensor<R>,
        attn: &Tensor<R>,
        value: &Tensor<R>,
        dilation: usize,
        config: &NattenConfig,
    ) -> Result<(Tensor<R>, Tensor<R>)>;
}
