//! Learning rate schedulers
//!
//! All schedules are stepped once per training iteration:
//! - `ConstantLR` - fixed learning rate
//! - `CosineAnnealingLR` - smooth cosine decay to zero
//! - `PiecewiseLR` - fixed values between step boundaries
//! - `PolynomialLR` - linear decay to an end value
//! - `LinearWarmupLR` - linear warm-up from 0 wrapping any of the above

use std::f32::consts::PI;

/// Learning rate scheduler trait
pub trait LRScheduler: Send {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Advance by one iteration
    fn step(&mut self);

    /// Iterations taken so far
    fn current_step(&self) -> usize;

    /// Jump to an iteration, used when resuming
    fn set_step(&mut self, step: usize);
}

/// Fixed learning rate
pub struct ConstantLR {
    lr: f32,
    current_step: usize,
}

impl ConstantLR {
    pub fn new(lr: f32) -> Self {
        Self { lr, current_step: 0 }
    }
}

impl LRScheduler for ConstantLR {
    fn get_lr(&self) -> f32 {
        self.lr
    }

    fn step(&mut self) {
        self.current_step += 1;
    }

    fn current_step(&self) -> usize {
        self.current_step
    }

    fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }
}

/// Cosine Annealing Learning Rate Scheduler
///
/// Formula: lr_t = lr_min + 0.5 * (lr_max - lr_min) * (1 + cos(pi * t / T))
pub struct CosineAnnealingLR {
    lr_max: f32,
    lr_min: f32,
    t_max: usize,
    current_step: usize,
}

impl CosineAnnealingLR {
    /// # Arguments
    /// * `lr_max` - Initial (maximum) learning rate
    /// * `t_max` - Total number of steps for the schedule
    /// * `lr_min` - Minimum learning rate
    pub fn new(lr_max: f32, t_max: usize, lr_min: f32) -> Self {
        Self { lr_max, lr_min, t_max, current_step: 0 }
    }
}

impl LRScheduler for CosineAnnealingLR {
    fn get_lr(&self) -> f32 {
        if self.current_step >= self.t_max {
            return self.lr_min;
        }

        let progress = self.current_step as f32 / self.t_max as f32;
        let cosine_decay = 0.5 * (1.0 + (PI * progress).cos());
        self.lr_min + (self.lr_max - self.lr_min) * cosine_decay
    }

    fn step(&mut self) {
        self.current_step += 1;
    }

    fn current_step(&self) -> usize {
        self.current_step
    }

    fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }
}

/// Piecewise constant schedule
///
/// `values[i]` applies from `boundaries[i - 1]` (inclusive) to
/// `boundaries[i]` (exclusive); `values` has one more entry than `boundaries`.
pub struct PiecewiseLR {
    boundaries: Vec<usize>,
    values: Vec<f32>,
    current_step: usize,
}

impl PiecewiseLR {
    pub fn new(boundaries: Vec<usize>, values: Vec<f32>) -> Self {
        Self { boundaries, values, current_step: 0 }
    }
}

impl LRScheduler for PiecewiseLR {
    fn get_lr(&self) -> f32 {
        let passed = self.boundaries.iter().filter(|b| self.current_step >= **b).count();
        self.values.get(passed).or(self.values.last()).copied().unwrap_or(0.0)
    }

    fn step(&mut self) {
        self.current_step += 1;
    }

    fn current_step(&self) -> usize {
        self.current_step
    }

    fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }
}

/// Linear decay from `lr_initial` to `lr_end` over `total_steps`
pub struct PolynomialLR {
    lr_initial: f32,
    lr_end: f32,
    total_steps: usize,
    current_step: usize,
}

impl PolynomialLR {
    pub fn new(lr_initial: f32, lr_end: f32, total_steps: usize) -> Self {
        Self { lr_initial, lr_end, total_steps, current_step: 0 }
    }
}

impl LRScheduler for PolynomialLR {
    fn get_lr(&self) -> f32 {
        if self.total_steps == 0 || self.current_step >= self.total_steps {
            return self.lr_end;
        }
        let progress = self.current_step as f32 / self.total_steps as f32;
        self.lr_initial + (self.lr_end - self.lr_initial) * progress
    }

    fn step(&mut self) {
        self.current_step += 1;
    }

    fn current_step(&self) -> usize {
        self.current_step
    }

    fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }
}

/// Linear Warmup Learning Rate Scheduler
///
/// Linearly increases the learning rate from 0 to the wrapped schedule's
/// starting value over `warmup_steps`, then follows the wrapped schedule
/// offset by the warm-up length.
pub struct LinearWarmupLR {
    inner: Box<dyn LRScheduler>,
    warmup_steps: usize,
    current_step: usize,
}

impl LinearWarmupLR {
    pub fn new(inner: Box<dyn LRScheduler>, warmup_steps: usize) -> Self {
        Self { inner, warmup_steps, current_step: 0 }
    }
}

impl LRScheduler for LinearWarmupLR {
    fn get_lr(&self) -> f32 {
        if self.current_step < self.warmup_steps {
            let progress = self.current_step as f32 / self.warmup_steps as f32;
            return self.inner.get_lr() * progress;
        }
        self.inner.get_lr()
    }

    fn step(&mut self) {
        self.current_step += 1;
        if self.current_step > self.warmup_steps {
            self.inner.step();
        }
    }

    fn current_step(&self) -> usize {
        self.current_step
    }

    fn set_step(&mut self, step: usize) {
        self.current_step = step;
        self.inner.set_step(step.saturating_sub(self.warmup_steps));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_endpoints() {
        let mut s = CosineAnnealingLR::new(1.0, 10, 0.0);
        assert_relative_eq!(s.get_lr(), 1.0);
        s.set_step(5);
        assert_relative_eq!(s.get_lr(), 0.5, epsilon = 1e-6);
        s.set_step(10);
        assert_relative_eq!(s.get_lr(), 0.0);
    }

    #[test]
    fn test_piecewise_boundaries() {
        let mut s = PiecewiseLR::new(vec![2, 4], vec![0.1, 0.01, 0.001]);
        let lrs: Vec<f32> = (0..6)
            .map(|_| {
                let lr = s.get_lr();
                s.step();
                lr
            })
            .collect();
        assert_eq!(lrs, vec![0.1, 0.1, 0.01, 0.01, 0.001, 0.001]);
    }

    #[test]
    fn test_polynomial_decay() {
        let mut s = PolynomialLR::new(1.0, 0.0, 4);
        s.set_step(1);
        assert_relative_eq!(s.get_lr(), 0.75);
        s.set_step(8);
        assert_relative_eq!(s.get_lr(), 0.0);
    }

    #[test]
    fn test_warmup_then_inner() {
        let mut s = LinearWarmupLR::new(Box::new(CosineAnnealingLR::new(1.0, 4, 0.0)), 2);
        assert_relative_eq!(s.get_lr(), 0.0);
        s.step();
        assert_relative_eq!(s.get_lr(), 0.5);
        s.step();
        assert_relative_eq!(s.get_lr(), 1.0);
        s.step();
        assert_relative_eq!(s.get_lr(), CosineAnnealingLR::new(1.0, 4, 0.0).get_lr_at(1), epsilon = 1e-6);
    }

    #[test]
    fn test_warmup_resume_matches_stepping() {
        let mut stepped = LinearWarmupLR::new(Box::new(PolynomialLR::new(1.0, 0.0, 10)), 3);
        for _ in 0..7 {
            stepped.step();
        }
        let mut jumped = LinearWarmupLR::new(Box::new(PolynomialLR::new(1.0, 0.0, 10)), 3);
        jumped.set_step(7);
        assert_relative_eq!(stepped.get_lr(), jumped.get_lr());
    }

    impl CosineAnnealingLR {
        fn get_lr_at(mut self, step: usize) -> f32 {
            self.set_step(step);
            self.get_lr()
        }
    }
}
