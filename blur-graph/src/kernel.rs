//! Normalized 1-D Gaussian weights shared by every blur pass.

use crate::{error::ConfigError, uniforms::MAX_TAPS};

/// A validated, normalized Gaussian kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    sigma: f32,
    weights: Vec<f32>,
}

impl GaussianKernel {
    /// Samples the Gaussian with standard deviation `sigma` at the integer
    /// offsets `-(tap_count - 1) / 2 ..= (tap_count - 1) / 2` and normalizes the
    /// samples to sum to one.
    pub fn new(sigma: f32, tap_count: u32) -> Result<Self, ConfigError> {
        let weights = gaussian_weights(sigma, tap_count)?;
        Ok(Self { sigma, weights })
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    pub fn tap_count(&self) -> u32 {
        self.weights.len() as u32
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Number of texels sampled on each side of the center tap.
    pub fn radius(&self) -> u32 {
        (self.tap_count() - 1) / 2
    }
}

/// Computes `tap_count` normalized Gaussian weights for standard deviation
/// `sigma`.
///
/// The density is evaluated in `f64` and only narrowed after normalization, so
/// the returned weights sum to one within `f32` rounding.
pub fn gaussian_weights(sigma: f32, tap_count: u32) -> Result<Vec<f32>, ConfigError> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(ConfigError::InvalidParameter {
            name: "sigma",
            reason: format!("must be a finite value greater than zero, got {sigma}"),
        });
    }
    if tap_count == 0 || tap_count % 2 == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "tap_count",
            reason: format!("must be an odd positive integer, got {tap_count}"),
        });
    }
    if tap_count as usize > MAX_TAPS {
        return Err(ConfigError::InvalidParameter {
            name: "tap_count",
            reason: format!("{tap_count} exceeds the kernel buffer capacity of {MAX_TAPS}"),
        });
    }

    let variance = f64::from(sigma) * f64::from(sigma);
    let scale = 1.0 / (2.0 * std::f64::consts::PI * variance).sqrt();
    let radius = f64::from((tap_count - 1) / 2);
    let densities: Vec<f64> = (0..tap_count)
        .map(|i| {
            let x = f64::from(i) - radius;
            scale * (-(x * x) / (2.0 * variance)).exp()
        })
        .collect();
    let sum: f64 = densities.iter().sum();

    Ok(densities.iter().map(|g| (g / sum) as f32).collect())
}
