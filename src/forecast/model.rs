//! A trained network bundled with the scaler it was fitted with

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::network::RecurrentNetwork;
use super::rollout;
use super::scaler::MinMaxScaler;
use super::{ForecastError, ModelFamily};

/// Network and scaler always travel together; a forecast made with one and
/// not the other would be meaningless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedForecaster {
    network: RecurrentNetwork,
    scaler: MinMaxScaler,
    /// Number of supervised windows the network was fitted on
    pub training_samples: usize,
    /// Mean squared error (normalized units) of the last epoch
    pub final_loss: Option<f64>,
    pub trained_at: DateTime<Utc>,
}

impl TrainedForecaster {
    pub fn new(
        network: RecurrentNetwork,
        scaler: MinMaxScaler,
        training_samples: usize,
        final_loss: Option<f64>,
        trained_at: DateTime<Utc>,
    ) -> Self {
        Self {
            network,
            scaler,
            training_samples,
            final_loss,
            trained_at,
        }
    }

    pub fn network(&self) -> &RecurrentNetwork {
        &self.network
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    pub fn family(&self) -> ModelFamily {
        self.network.family()
    }

    pub fn look_back(&self) -> usize {
        self.network.shape().look_back
    }

    /// Roll `steps` predictions forward from the tail of `series`.
    pub fn forecast(&self, series: &[f64], steps: usize) -> Result<Vec<f64>, ForecastError> {
        let look_back = self.look_back();
        if series.len() < look_back {
            return Err(ForecastError::InsufficientData {
                required: look_back,
                actual: series.len(),
            });
        }
        let tail = &series[series.len() - look_back..];
        Ok(rollout::forecast(&self.network, &self.scaler, tail, steps))
    }

    pub fn info(&self) -> String {
        format!(
            "TrainedForecaster(family={}, samples={}, loss={}, trained={})",
            self.family().label(),
            self.training_samples,
            self.final_loss
                .map(|l| format!("{:.5}", l))
                .unwrap_or_else(|| "N/A".to_string()),
            self.trained_at.format("%Y-%m-%d %H:%M")
        )
    }
}
