//! Gradient clipping utilities

use crate::model::ParameterStore;

/// Clip gradients by global norm
///
/// Computes the global norm of all gradients and scales them down if the norm
/// exceeds `max_norm`.
///
/// Returns the global norm before clipping.
pub fn clip_grad_norm(params: &mut ParameterStore, max_norm: f32) -> f32 {
    let total_norm_sq: f32 = params.iter().map(|(_, p)| p.grad.iter().map(|g| g * g).sum::<f32>()).sum();
    let global_norm = total_norm_sq.sqrt();

    if global_norm > max_norm && global_norm > 0.0 {
        let clip_coef = max_norm / global_norm;
        for (_, param) in params.iter_mut() {
            param.grad.mapv_inplace(|g| g * clip_coef);
        }
    }

    global_norm
}
