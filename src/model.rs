#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetrics {
    pub workers: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PoolMetrics {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.finished();
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }

    /// Outstanding tasks per worker.
    pub fn queue_pressure(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.pending as f64 / self.workers as f64
    }
}
