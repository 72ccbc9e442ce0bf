//! Time-driven value patterns for dynamic registers.

use std::{f64::consts::PI, time::Duration};

use rand::{distr::Uniform, Rng as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Parameter `{name}` must be finite, got {value}")]
    NonFiniteParameter { name: &'static str, value: f64 },
    #[error("Period must be positive, got {0}")]
    InvalidPeriod(f64),
    #[error("Random walk step must not be negative, got {0}")]
    NegativeStep(f64),
    #[error("Random walk step {step} overflows around base {base}")]
    StepTooLarge { base: f64, step: f64 },
    #[error("Pattern produced a non-finite value")]
    NonFiniteValue,
}

fn default_amplitude() -> f64 {
    1000.0
}

fn default_sine_period() -> f64 {
    60.0
}

fn default_base() -> f64 {
    500.0
}

fn default_step() -> f64 {
    50.0
}

fn default_low() -> f64 {
    100.0
}

fn default_high() -> f64 {
    900.0
}

fn default_step_period() -> f64 {
    30.0
}

fn default_max() -> f64 {
    1000.0
}

fn default_ramp_period() -> f64 {
    120.0
}

/// A value-generating pattern and its parameters.
///
/// Periods are in seconds. Every pattern except [`Pattern::RandomWalk`] is a
/// pure function of the elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    /// `amplitude * sin(2π·t/period) + amplitude`
    SineWave {
        #[serde(default = "default_amplitude")]
        amplitude: f64,
        #[serde(default = "default_sine_period")]
        period: f64,
    },
    /// Running value starting at `base`, moved by a uniform step in
    /// `[-step, step]` on every evaluation.
    RandomWalk {
        #[serde(default = "default_base")]
        base: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
    /// `high` during the second half of every period, `low` otherwise.
    StepFunction {
        #[serde(default = "default_low")]
        low: f64,
        #[serde(default = "default_high")]
        high: f64,
        #[serde(default = "default_step_period")]
        period: f64,
    },
    /// Sawtooth from `min` to `max` repeating every `period`.
    LinearRamp {
        #[serde(default)]
        min: f64,
        #[serde(default = "default_max")]
        max: f64,
        #[serde(default = "default_ramp_period")]
        period: f64,
    },
}

fn finite(name: &'static str, value: f64) -> Result<(), GeneratorError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GeneratorError::NonFiniteParameter { name, value })
    }
}

fn positive_period(period: f64) -> Result<(), GeneratorError> {
    finite("period", period)?;
    if period > 0.0 {
        Ok(())
    } else {
        Err(GeneratorError::InvalidPeriod(period))
    }
}

/// Position inside the current cycle, in `[0, 1)`.
fn cycle_position(t: f64, period: f64) -> f64 {
    (t % period) / period
}

/// 截断到寄存器范围 [0, 65535]
pub fn clamp_to_register(value: f64) -> Result<u16, GeneratorError> {
    if !value.is_finite() {
        return Err(GeneratorError::NonFiniteValue);
    }
    Ok(value.floor().clamp(0.0, f64::from(u16::MAX)) as u16)
}

impl Pattern {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        match *self {
            Pattern::SineWave { amplitude, period } => {
                finite("amplitude", amplitude)?;
                positive_period(period)
            }
            Pattern::RandomWalk { base, step } => {
                finite("base", base)?;
                finite("step", step)?;
                if step < 0.0 {
                    return Err(GeneratorError::NegativeStep(step));
                }
                // 步长区间宽度和 base ± step 都必须是有限值
                if !((2.0 * step).is_finite()
                    && (base + step).is_finite()
                    && (base - step).is_finite())
                {
                    return Err(GeneratorError::StepTooLarge { base, step });
                }
                Ok(())
            }
            Pattern::StepFunction { low, high, period } => {
                finite("low", low)?;
                finite("high", high)?;
                positive_period(period)
            }
            Pattern::LinearRamp { min, max, period } => {
                finite("min", min)?;
                finite("max", max)?;
                positive_period(period)
            }
        }
    }

    /// Short name used in logs and configuration.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Pattern::SineWave { .. } => "sine_wave",
            Pattern::RandomWalk { .. } => "random_walk",
            Pattern::StepFunction { .. } => "step_function",
            Pattern::LinearRamp { .. } => "linear_ramp",
        }
    }
}

/// A pattern bound to one address, together with the state it carries
/// between evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pattern: Pattern,
    walk: Option<f64>,
}

impl Generator {
    pub fn new(pattern: Pattern) -> Result<Self, GeneratorError> {
        pattern.validate()?;
        Ok(Self {
            pattern,
            walk: None,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Evaluates the pattern at `elapsed` since server start.
    pub fn sample(&mut self, elapsed: Duration) -> Result<u16, GeneratorError> {
        let value = match self.pattern {
            Pattern::RandomWalk { base, step } => {
                let current = self.walk.unwrap_or(base);
                let change = if step > 0.0 {
                    let dist = Uniform::new_inclusive(-step, step)
                        .map_err(|_| GeneratorError::NonFiniteValue)?;
                    rand::rng().sample(dist)
                } else {
                    0.0
                };
                let next = (current + change).clamp(0.0, f64::from(u16::MAX));
                self.walk = Some(next);
                next
            }
            _ => self.value_at(elapsed),
        };
        clamp_to_register(value)
    }

    /// Like [`Self::sample`] but leaves random walk state untouched: the
    /// walk reports its current value.
    pub fn peek(&self, elapsed: Duration) -> Result<u16, GeneratorError> {
        clamp_to_register(self.value_at(elapsed))
    }

    fn value_at(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        match self.pattern {
            Pattern::SineWave { amplitude, period } => {
                amplitude * (2.0 * PI * t / period).sin() + amplitude
            }
            Pattern::RandomWalk { base, .. } => self.walk.unwrap_or(base),
            Pattern::StepFunction { low, high, period } => {
                if cycle_position(t, period) > 0.5 {
                    high
                } else {
                    low
                }
            }
            Pattern::LinearRamp { min, max, period } => {
                min + (max - min) * cycle_position(t, period)
            }
        }
    }
}
