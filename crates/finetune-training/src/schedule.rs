//! Learning-rate schedules with linear warmup.
//!
//! `step` is the number of optimizer steps already taken, so the first
//! update of a warmed-up schedule runs at a learning rate of zero.

use crate::job::SchedulerKind;
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy)]
pub struct LrSchedule {
    kind: SchedulerKind,
    base_lr: f64,
    warmup_steps: u64,
    total_steps: u64,
}

impl LrSchedule {
    #[must_use]
    pub fn new(kind: SchedulerKind, base_lr: f64, warmup_steps: u64, total_steps: u64) -> Self {
        Self { kind, base_lr, warmup_steps, total_steps }
    }

    #[must_use]
    pub fn lr_at(&self, step: u64) -> f64 {
        self.base_lr * self.factor(step)
    }

    fn factor(&self, step: u64) -> f64 {
        if self.kind == SchedulerKind::Constant {
            return 1.0;
        }

        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps.max(1) as f64;
        }

        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1);
        let progress = ((step - self.warmup_steps) as f64 / decay_steps as f64).min(1.0);

        match self.kind {
            SchedulerKind::Linear => (1.0 - progress).max(0.0),
            SchedulerKind::Cosine => 0.5 * (1.0 + (PI * progress).cos()),
            SchedulerKind::Constant | SchedulerKind::ConstantWithWarmup => 1.0,
        }
    }
}
