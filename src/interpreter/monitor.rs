//! Host-side bounds on how long a script may run.

use std::time::{Duration, Instant};

use super::RuntimeErrorKind;

/// Where the evaluator consults the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    LoopIteration,
    FunctionEntry,
}

pub trait ExecutionMonitor {
    fn check(&mut self, checkpoint: Checkpoint) -> Result<(), RuntimeErrorKind>;

    /// Called whenever the host starts a new top-level execution.
    fn reset(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl ExecutionMonitor for Unbounded {
    fn check(&mut self, _: Checkpoint) -> Result<(), RuntimeErrorKind> {
        Ok(())
    }
}

/// Fails once more than `limit` checkpoints have been passed.
#[derive(Debug, Clone)]
pub struct StepBudget {
    limit: u64,
    used: u64,
}

impl StepBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

impl ExecutionMonitor for StepBudget {
    fn check(&mut self, _: Checkpoint) -> Result<(), RuntimeErrorKind> {
        self.used += 1;
        if self.used > self.limit {
            Err(RuntimeErrorKind::StepLimitExceeded(self.limit))
        } else {
            Ok(())
        }
    }

    fn reset(&mut self) {
        self.used = 0;
    }
}

/// Fails once the wall clock passes a deadline.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    /// Set when the deadline is relative to the start of each execution.
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at, timeout: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout: Some(timeout),
        }
    }
}

impl ExecutionMonitor for Deadline {
    fn check(&mut self, _: Checkpoint) -> Result<(), RuntimeErrorKind> {
        if Instant::now() >= self.at {
            Err(RuntimeErrorKind::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    fn reset(&mut self) {
        if let Some(timeout) = self.timeout {
            self.at = Instant::now() + timeout;
        }
    }
}

/// Consults every monitor in order; the first failure wins.
#[derive(Default)]
pub struct Composite(pub Vec<Box<dyn ExecutionMonitor>>);

impl ExecutionMonitor for Composite {
    fn check(&mut self, checkpoint: Checkpoint) -> Result<(), RuntimeErrorKind> {
        self.0
            .iter_mut()
            .try_for_each(|monitor| monitor.check(checkpoint))
    }

    fn reset(&mut self) {
        self.0.iter_mut().for_each(|monitor| monitor.reset());
    }
}

/// Fits a 2 MiB thread stack in unoptimized builds. Each script call costs
/// several evaluator frames.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_steps: Option<u64>,
    pub timeout: Option<Duration>,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: None,
            timeout: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl Limits {
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn monitor(&self) -> Box<dyn ExecutionMonitor> {
        let mut monitors: Vec<Box<dyn ExecutionMonitor>> = Vec::new();
        if let Some(steps) = self.max_steps {
            monitors.push(Box::new(StepBudget::new(steps)));
        }
        if let Some(timeout) = self.timeout {
            monitors.push(Box::new(Deadline::after(timeout)));
        }

        match monitors.len() {
            0 => Box::new(Unbounded),
            1 => monitors.remove(0),
            _ => Box::new(Composite(monitors)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_depth_is_bounded() {
        assert_eq!(Limits::default().max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(DEFAULT_MAX_CALL_DEPTH, 64);
    }

    #[test]
    fn step_budget_trips_after_the_limit_and_resets() {
        let mut budget = StepBudget::new(2);
        assert!(budget.check(Checkpoint::LoopIteration).is_ok());
        assert!(budget.check(Checkpoint::FunctionEntry).is_ok());
        assert!(matches!(
            budget.check(Checkpoint::LoopIteration),
            Err(RuntimeErrorKind::StepLimitExceeded(2))
        ));

        budget.reset();
        assert_eq!(budget.used(), 0);
        assert!(budget.check(Checkpoint::LoopIteration).is_ok());
    }

    #[test]
    fn passed_deadlines_fail_immediately() {
        let mut deadline = Deadline::at(Instant::now());
        assert!(matches!(
            deadline.check(Checkpoint::LoopIteration),
            Err(RuntimeErrorKind::DeadlineExceeded)
        ));
        assert!(Deadline::after(Duration::from_secs(60))
            .check(Checkpoint::LoopIteration)
            .is_ok());
    }

    #[test]
    fn composite_reports_the_first_failure() {
        let mut monitor = Limits::default()
            .with_max_steps(0)
            .with_timeout(Duration::from_secs(60))
            .monitor();
        assert!(matches!(
            monitor.check(Checkpoint::FunctionEntry),
            Err(RuntimeErrorKind::StepLimitExceeded(0))
        ));
        assert!(Limits::default().monitor().check(Checkpoint::LoopIteration).is_ok());
    }
}
