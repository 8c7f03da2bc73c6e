//! Autoregressive multi-step rollout

use std::collections::VecDeque;

use super::network::RecurrentNetwork;
use super::scaler::MinMaxScaler;

/// Predict `steps` future values from `last_window` (raw units).
///
/// Each prediction is made in normalized space, appended to the window and
/// the oldest value dropped, so the window length never changes. Outputs are
/// returned in raw units. The model is not retrained between steps.
pub fn forecast(
    network: &RecurrentNetwork,
    scaler: &MinMaxScaler,
    last_window: &[f64],
    steps: usize,
) -> Vec<f64> {
    let mut window: VecDeque<f64> = last_window.iter().map(|&v| scaler.normalize(v)).collect();
    let mut outputs = Vec::with_capacity(steps);

    for _ in 0..steps {
        let input: Vec<f64> = window.iter().copied().collect();
        let next = network.predict(&input);
        outputs.push(scaler.denormalize(next));

        window.push_back(next);
        if window.len() > last_window.len() {
            window.pop_front();
        }
    }

    outputs
}
