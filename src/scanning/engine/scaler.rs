use crate::config::QueryScalingConfig;

/// Per-round search budget: starts small, grows geometrically, then caps.
///
/// With the default config this yields 10, 15, 22, 33, 49, 73, 100, 100, ...
#[derive(Debug, Clone)]
pub struct QueryScaler {
    next: usize,
    factor: f64,
    max: usize,
}

impl QueryScaler {
    pub fn new(config: &QueryScalingConfig) -> Self {
        let max = config.max.max(1);
        Self {
            next: config.initial.clamp(1, max),
            factor: config.factor,
            max,
        }
    }

    /// Returns the budget for this round and steps to the next.
    pub fn next_budget(&mut self) -> usize {
        let current = self.next;
        // `as` saturates on overflow, and the clamp keeps a shrinking factor
        // from ever reaching zero.
        let scaled = (current as f64 * self.factor).floor() as usize;
        self.next = scaled.clamp(1, self.max);
        current
    }
}

impl Iterator for QueryScaler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.next_budget())
    }
}
