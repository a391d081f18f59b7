//! CPU implementation of NeighborhoodAttentionOps
//!
//! Kernels are instantiated per kernel size and per dilation mode (`1` for the fast
//! path, `0` to read the dilation at runtime) and selected by `dispatch_av_kernel!`.
//! Blocks of logical threads map onto rayon tasks.

pub mod backward;
pub mod forward;
pub mod host;
pub mod launch;
pub mod tiled;

pub use launch::LaunchGrid;

use crate::error::{Error, Result};
use crate::ops::impl_generic::neighborhood::{
    AvProblem, AvUnit, Half2, NattenConfig, TILED_HEAD_DIM, validate_av_inputs,
};
use crate::ops::traits::NeighborhoodAttentionOps;
use backward::{av_backward_attn, av_backward_value};
use forward::av_forward;
use numr::dtype::DType;
use numr::runtime::cpu::{CpuClient, CpuRuntime};
use numr::tensor::Tensor;
use tiled::av_backward_attn_tiled;
use tracing::debug;

/// Dilation seen by a kernel instantiated with `DILATION` (0 = runtime value).
#[inline]
pub(crate) const fn resolve_dilation<const DILATION: usize>(runtime: usize) -> usize {
    if DILATION == 0 { runtime } else { DILATION }
}

/// Run `$kernel::<$unit, K, D>(args...)` for the problem's kernel size, using the
/// `D = 1` instantiation when the dilation is 1. Evaluates to `Result<()>`.
macro_rules! dispatch_av_kernel {
    ($kernel:ident, $unit:ty, $problem:expr, $($arg:expr),+ $(,)?) => {
        match ($problem.kernel_size, $problem.dilation == 1) {
            (5, true) => { $kernel::<$unit, 5, 1>($($arg),+); Ok(()) }
            (5, false) => { $kernel::<$unit, 5, 0>($($arg),+); Ok(()) }
            (7, true) => { $kernel::<$unit, 7, 1>($($arg),+); Ok(()) }
            (7, false) => { $kernel::<$unit, 7, 0>($($arg),+); Ok(()) }
            (9, true) => { $kernel::<$unit, 9, 1>($($arg),+); Ok(()) }
            (9, false) => { $kernel::<$unit, 9, 0>($($arg),+); Ok(()) }
            (11, true) => { $kernel::<$unit, 11, 1>($($arg),+); Ok(()) }
            (11, false) => { $kernel::<$unit, 11, 0>($($arg),+); Ok(()) }
            (13, true) => { $kernel::<$unit, 13, 1>($($arg),+); Ok(()) }
            (13, false) => { $kernel::<$unit, 13, 0>($($arg),+); Ok(()) }
            (kernel_size, _) => Err(Error::UnsupportedKernelSize { kernel_size }),
        }
    };
}

fn log_launch<U: AvUnit>(kernel: &'static str, problem: &AvProblem, tiled: bool, launch: &LaunchGrid) {
    debug!(
        kernel,
        kernel_size = problem.kernel_size,
        dilation = problem.dilation,
        precision = U::NAME,
        tiled,
        grid = ?launch.grid,
        block = ?launch.block,
        "natten launch"
    );
}

impl NeighborhoodAttentionOps<CpuRuntime> for CpuClient {
    fn natten_av_fwd(
        &self,
        attn: &Tensor<CpuRuntime>,
        value: &Tensor<CpuRuntime>,
        dilation: usize,
        config: &NattenConfig,
    ) -> Result<Tensor<CpuRuntime>> {
        config.validate()?;
        let problem = validate_av_inputs(attn, value, None, dilation)?;
        match problem.dtype {
            DType::F32 => av_forward_impl::<f32>(self, &problem, attn, value, config),
            DType::F16 => av_forward_impl::<Half2>(self, &problem, attn, value, config),
            dtype => Err(Error::UnsupportedDType {
                tensor: "value",
                dtype,
            }),
        }
    }

    fn natten_av_bwd(
        &self,
        d_out: &Tensor<CpuRuntime>,
        attn: &Tensor<CpuRuntime>,
        value: &Tensor<CpuRuntime>,
        dilation: usize,
        config: &NattenConfig,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        config.validate()?;
        let problem = validate_av_inputs(attn, value, Some(d_out), dilation)?;
        match problem.dtype {
            DType::F32 => av_backward_impl::<f32>(self, &problem, d_out, attn, value, config),
            DType::F16 => av_backward_impl::<Half2>(self, &problem, d_out, attn, value, config),
            dtype => Err(Error::UnsupportedDType {
                tensor: "value",
                dtype,
            }),
        }
    }
}

fn av_forward_impl<U: AvUnit>(
    client: &CpuClient,
    problem: &AvProblem,
    attn: &Tensor<CpuRuntime>,
    value: &Tensor<CpuRuntime>,
    config: &NattenConfig,
) -> Result<Tensor<CpuRuntime>> {
    let units = problem.head_dim / U::LANES;
    let attn_data = host::read_scalars::<U>(client, attn)?;
    let value_data = host::read_units::<U>(client, value)?;
    let mut out = vec![U::zero(); value_data.len()];

    let threads = config.threads_for_lanes(U::LANES);
    log_launch::<U>("av_forward", problem, false, &LaunchGrid::linear(out.len(), threads));
    dispatch_av_kernel!(
        av_forward,
        U,
        problem,
        &attn_data,
        &value_data,
        &mut out,
        problem.height,
        problem.width,
        units,
        problem.dilation,
        threads,
    )?;

    host::write_units::<U>(client, &out, &problem.value_shape(), value.device())
}

fn av_backward_impl<U: AvUnit>(
    client: &CpuClient,
    problem: &AvProblem,
    d_out: &Tensor<CpuRuntime>,
    attn: &Tensor<CpuRuntime>,
    value: &Tensor<CpuRuntime>,
    config: &NattenConfig,
) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
    let units = problem.head_dim / U::LANES;
    let d_out_data = host::read_units::<U>(client, d_out)?;
    let attn_data = host::read_scalars::<U>(client, attn)?;
    let value_data = host::read_units::<U>(client, value)?;
    let mut d_attn = vec![U::Scalar::default(); attn_data.len()];
    let mut d_value = vec![U::zero(); value_data.len()];

    let threads = config.threads_for_lanes(U::LANES);
    let tile = config
        .tile(problem.kernel_size)
        .filter(|_| config.tiled && problem.head_dim == TILED_HEAD_DIM);

    // The two kernels write disjoint outputs.
    let (attn_result, value_result) = rayon::join(
        || match &tile {
            Some(tile) => {
                log_launch::<U>(
                    "av_backward_attn",
                    problem,
                    true,
                    &LaunchGrid::tiled(problem, tile),
                );
                dispatch_av_kernel!(
                    av_backward_attn_tiled,
                    U,
                    problem,
                    &d_out_data,
                    &value_data,
                    &mut d_attn,
                    problem.height,
                    problem.width,
                    units,
                    problem.dilation,
                    tile,
                )
            }
            None => {
                log_launch::<U>(
                    "av_backward_attn",
                    problem,
                    false,
                    &LaunchGrid::linear(d_attn.len(), threads),
                );
                dispatch_av_kernel!(
                    av_backward_attn,
                    U,
                    problem,
                    &d_out_data,
                    &value_data,
                    &mut d_attn,
                    problem.height,
                    problem.width,
                    units,
                    problem.dilation,
                    threads,
                )
            }
        },
        || {
            log_launch::<U>(
                "av_backward_value",
                problem,
                false,
                &LaunchGrid::linear(d_value.len(), threads),
            );
            dispatch_av_kernel!(
                av_backward_value,
                U,
                problem,
                &d_out_data,
                &attn_data,
                &mut d_value,
                problem.height,
                problem.width,
                units,
                problem.dilation,
                threads,
            )
        },
    );
    attn_result?;
    value_result?;

    let device = value.device();
    let d_attn = host::write_scalars::<U>(client, &d_attn, &problem.attn_shape(), device)?;
    let d_value = host::write_units::<U>(client, &d_value, &problem.value_shape(), device)?;
    Ok((d_attn, d_value))
}
