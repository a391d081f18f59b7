//! Host staging: tensors in and out of unit buffers.
//!
//! Half tensors are staged through F32 with numr's cast, so packing into
//! [`Half2`](crate::ops::impl_generic::neighborhood::Half2) is exact in both directions.

use crate::error::{Error, Result};
use crate::ops::impl_generic::neighborhood::AvUnit;
use numr::dtype::DType;
use numr::ops::TypeConversionOps;
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;

fn to_f32_vec(client: &CpuClient, t: &Tensor<CpuRuntime>) -> Result<Vec<f32>> {
    if t.dtype() == DType::F32 {
        return Ok(t.to_vec::<f32>());
    }
    let t = client.cast(t, DType::F32).map_err(Error::Numr)?;
    Ok(t.to_vec::<f32>())
}

fn from_f32_vec(
    client: &CpuClient,
    data: &[f32],
    shape: &[usize],
    dtype: DType,
    device: &CpuDevice,
) -> Result<Tensor<CpuRuntime>> {
    let t = Tensor::<CpuRuntime>::from_slice(data, shape, device);
    if dtype == DType::F32 {
        return Ok(t);
    }
    client.cast(&t, dtype).map_err(Error::Numr)
}

/// Read a `[..., dim]` tensor as `dim / LANES` units per position.
pub fn read_units<U: AvUnit>(client: &CpuClient, t: &Tensor<CpuRuntime>) -> Result<Vec<U>> {
    Ok(U::pack(&to_f32_vec(client, t)?))
}

/// Read a tensor as one scalar per element.
pub fn read_scalars<U: AvUnit>(
    client: &CpuClient,
    t: &Tensor<CpuRuntime>,
) -> Result<Vec<U::Scalar>> {
    Ok(to_f32_vec(client, t)?
        .into_iter()
        .map(U::scalar_from_f32)
        .collect())
}

pub fn write_units<U: AvUnit>(
    client: &CpuClient,
    units: &[U],
    shape: &[usize],
    device: &CpuDevice,
) -> Result<Tensor<CpuRuntime>> {
    from_f32_vec(client, &U::unpack(units), shape, U::DTYPE, device)
}

pub fn write_scalars<U: AvUnit>(
    client: &CpuClient,
    scalars: &[U::Scalar],
    shape: &[usize],
    device: &CpuDevice,
) -> Result<Tensor<CpuRuntime>> {
    let data: Vec<f32> = scalars.iter().map(|&s| U::scalar_to_f32(s)).collect();
    from_f32_vec(client, &data, shape, U::DTYPE, device)
}
