// LinkedOut — Sequential setup step runner

use super::{SetupError, SetupStep, Status, StepContext, StepError};
use std::time::Instant;

/// Runs a fixed list of steps in order and tracks one [`Status`] per step.
///
/// The first failing step is marked `error` and the remaining steps stay
/// `idle`. [`SetupRunner::retry`] resets everything and starts again from the
/// first step; completed upstream operations are re-submitted.
pub struct SetupRunner {
    steps: Vec<Box<dyn SetupStep>>,
    statuses: Vec<Status>,
    last_error: Option<String>,
}

impl SetupRunner {
    pub fn new(steps: Vec<Box<dyn SetupStep>>) -> Self {
        let statuses = vec![Status::Idle; steps.len()];
        Self {
            steps,
            statuses,
            last_error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `(name, description, status)` for every step, in run order.
    pub fn statuses(&self) -> Vec<(&str, &str, Status)> {
        self.steps
            .iter()
            .zip(&self.statuses)
            .map(|(s, st)| (s.name(), s.description(), *st))
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<Status> {
        self.steps
            .iter()
            .position(|s| s.name() == name)
            .map(|i| self.statuses[i])
    }

    /// Success only when every step succeeded; any error wins over loading.
    pub fn overall(&self) -> Status {
        if self.statuses.iter().any(|s| *s == Status::Error) {
            Status::Error
        } else if self.statuses.iter().any(|s| *s == Status::Loading) {
            Status::Loading
        } else if !self.statuses.is_empty() && self.statuses.iter().all(|s| *s == Status::Success)
        {
            Status::Success
        } else {
            Status::Idle
        }
    }

    /// Message of the most recent failure, shown next to the step list.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Put every step back to `idle` and clear the error.
    pub fn reset(&mut self) {
        self.statuses.iter_mut().for_each(|s| *s = Status::Idle);
        self.last_error = None;
    }

    fn transition(&mut self, idx: usize, to: Status) -> Result<(), StepError> {
        let from = self.statuses[idx];
        if !from.can_transition_to(to) {
            return Err(StepError::InvalidTransition {
                step: self.steps[idx].name().to_string(),
                from,
                to,
            });
        }
        self.statuses[idx] = to;
        Ok(())
    }

    /// Run every step from the first one, halting at the first failure.
    pub async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<(), SetupError> {
        self.last_error = None;

        for idx in 0..self.steps.len() {
            let name = self.steps[idx].name().to_string();

            self.transition(idx, Status::Loading)
                .map_err(|source| SetupError::StepFailed {
                    step: name.clone(),
                    source,
                })?;

            tracing::info!(step = %name, "Running setup step");
            let start = Instant::now();
            let result = self.steps[idx].run(ctx).await;
            let duration_ms = start.elapsed().as_millis();

            match result {
                Ok(()) => {
                    self.statuses[idx] = Status::Success;
                    tracing::info!(step = %name, duration_ms = %duration_ms, "Setup step completed");
                }
                Err(source) => {
                    self.statuses[idx] = Status::Error;
                    tracing::error!(step = %name, duration_ms = %duration_ms, error = %source, "Setup step failed");
                    self.last_error = Some(source.to_string());
                    return Err(SetupError::StepFailed { step: name, source });
                }
            }
        }

        Ok(())
    }

    /// Reset and re-run the whole sequence.
    pub async fn retry(&mut self, ctx: &mut StepContext<'_>) -> Result<(), SetupError> {
        tracing::info!("Retrying setup from the first step");
        self.reset();
        self.run(ctx).await
    }
}
