//! Automatic time stepping around the equilibrium driver.
//!
//! After an accepted increment the step is scaled by
//! `sqrt(iteopt / iterations)`; a recoverable failure halves it and retries
//! from the last converged state. The stepper gives up when the step falls
//! below `dtmin` or an increment fails `max_retries` times in a row.

use crate::config::StepperConfig;
use crate::driver::{EquilibriumDriver, StepReport};
use crate::error::{Error, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AutoStepper {
    config: StepperConfig,
    dt: f64,
}

impl AutoStepper {
    pub fn new(config: StepperConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { dt: config.dt0, config })
    }

    /// Step size the next increment will try.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Scale the step after an increment that took `iterations`.
    fn adapt(&mut self, iterations: usize) {
        let ratio = self.config.iteopt as f64 / iterations.max(1) as f64;
        self.dt = (self.dt * ratio.sqrt()).clamp(self.config.dtmin, self.config.dtmax);
    }

    /// Advance `driver` from its current time to `t_end`.
    pub fn run(&mut self, driver: &mut EquilibriumDriver, t_end: f64) -> Result<Vec<StepReport>> {
        let eps = 1e-12 * t_end.abs().max(1.0);
        let mut reports = Vec::new();
        let mut retries = 0;

        while t_end - driver.state().time > eps {
            let t0 = driver.state().time;
            let dt = self.dt.min(t_end - t0);
            match driver.solve_step(t0 + dt) {
                Ok(report) => {
                    retries = 0;
                    // a step clipped at t_end says nothing about the right size
                    if dt >= self.dt {
                        self.adapt(report.iterations);
                    }
                    info!(time = report.time, dt, next_dt = self.dt, "time step accepted");
                    reports.push(report);
                }
                Err(e) if e.is_recoverable() => {
                    retries += 1;
                    self.dt = 0.5 * dt;
                    warn!(time = t0 + dt, retries, next_dt = self.dt, error = %e, "cutting time step");
                    if self.dt < self.config.dtmin || retries > self.config.max_retries {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        if reports.is_empty() && driver.state().time < t_end - eps {
            return Err(Error::Config(format!("could not advance to t = {}", t_end)));
        }
        Ok(reports)
    }
}
