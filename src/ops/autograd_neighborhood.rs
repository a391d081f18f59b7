//! Autograd integration for neighborhood attention AV
//!
//! Wraps NeighborhoodAttentionOps (Tensor-level) into a Var-level operation
//! for numr's autograd graph.

use crate::error::Result;
use crate::ops::impl_generic::neighborhood::NattenConfig;
use crate::ops::traits::NeighborhoodAttentionOps;
use numr::autograd::{GradFn, TensorId, Var};
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::sync::Arc;

/// Backward function for the AV step.
///
/// Saved state: attn and value from the forward pass.
/// Computes d_attn, d_value via `NeighborhoodAttentionOps::natten_av_bwd`.
struct NattenAvBackward<R: Runtime> {
    input_ids: [TensorId; 2],      // attn, value
    saved_tensors: Vec<Tensor<R>>, // [attn, value]
    input_grad_fns: [Option<Arc<dyn GradFn<R>>>; 2],
    dilation: usize,
    config: NattenConfig,
}

impl<R: Runtime> GradFn<R> for NattenAvBackward<R>
where
    R::Client: NeighborhoodAttentionOps<R>,
{
    fn backward(&self, grad_output: &Tensor<R>) -> numr::error::Result<Vec<Option<Tensor<R>>>> {
        let client = R::default_client(grad_output.device());
        let attn = &self.saved_tensors[0];
        let value = &self.saved_tensors[1];

        // the kernels read d_out as a dense buffer
        let grad_output = grad_output.contiguous();
        let (d_attn, d_value) = client
            .natten_av_bwd(&grad_output, attn, value, self.dilation, &self.config)
            .map_err(|e| numr::error::Error::Internal(format!("natten_av_bwd failed: {}", e)))?;

        Ok(vec![Some(d_attn), Some(d_value)])
    }

    fn backward_var(&self, grad_output: &Var<R>) -> numr::error::Result<Vec<Option<Var<R>>>> {
        // First-order only
        let grads = self.backward(grad_output.tensor())?;
        Ok(grads
            .into_iter()
            .map(|g| g.map(|t| Var::new(t, false)))
            .collect())
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn<R>>>> {
        self.input_grad_fns.to_vec()
    }

    fn saved_tensors(&self) -> &[Tensor<R>] {
        &self.saved_tensors
    }

    fn name(&self) -> &'static str {
        "NattenAvBackward"
    }
}

/// Neighborhood attention AV forward with autograd tracking.
///
/// When `attn` or `value` requires grad, the backward pass is registered and
/// yields gradients for both.
pub fn var_natten_av<R>(
    attn: &Var<R>,
    value: &Var<R>,
    dilation: usize,
    config: &NattenConfig,
) -> Result<Var<R>>
where
    R: Runtime,
    R::Client: NeighborhoodAttentionOps<R>,
{
    let client = R::default_client(value.tensor().device());
    let output = client.natten_av_fwd(attn.tensor(), value.tensor(), dilation, config)?;

    if attn.requires_grad() || value.requires_grad() {
        let grad_fn = NattenAvBackward {
            input_ids: [attn.id(), value.id()],
            saved_tensors: vec![attn.tensor().clone(), value.tensor().clone()],
            input_grad_fns: [attn.grad_fn().cloned(), value.grad_fn().cloned()],
            dilation,
            config: config.clone(),
        };
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::autograd::{backward, var_sum};
    use numr::runtime::cpu::CpuRuntime;

    #[test]
    fn test_var_natten_av_backward() {
        let (client, device) = cpu_setup();
        let attn_data: Vec<f32> = (0..49 * 25).map(|i| (i as f32 * 0.3).sin() * 0.5).collect();
        let value_data: Vec<f32> = (0..49 * 4).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        let attn = Var::new(
            Tensor::<CpuRuntime>::from_slice(&attn_data, &[1, 1, 7, 7, 25], &device),
            true,
        );
        let value = Var::new(
            Tensor::<CpuRuntime>::from_slice(&value_data, &[1, 1, 7, 7, 4], &device),
            true,
        );

        let out = var_natten_av(&attn, &value, 1, &NattenConfig::default()).unwrap();
        let loss = var_sum(&out, &[0, 1, 2, 3, 4], false, &client).unwrap();
        let grads = backward(&loss, &client).unwrap();

        let d_attn: Vec<f32> = grads.get(attn.id()).unwrap().to_vec();
        let d_value: Vec<f32> = grads.get(value.id()).unwrap().to_vec();
        assert_eq!(d_attn.len(), 49 * 25);
        assert_eq!(d_value.len(), 49 * 4);

        // d(sum out)/d attn[pos, k] is the channel sum of the value in slot k
        let slot0: f32 = value_data[..4].iter().sum();
        assert!((d_attn[0] - slot0).abs() < 1e-5);
    }

    #[test]
    fn test_var_natten_av_without_grad() {
        let (_client, device) = cpu_setup();
        let attn = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[0.04f32; 49 * 25], &[1, 1, 7, 7, 25], &device),
            false,
        );
        let value = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32; 49 * 2], &[1, 1, 7, 7, 2], &device),
            false,
        );
        let out = var_natten_av(&attn, &value, 1, &NattenConfig::default()).unwrap();
        assert!(!out.requires_grad());
        for v in out.tensor().to_vec::<f32>() {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
