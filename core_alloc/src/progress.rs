/// Percentage of the queue placed so far, logged at coarse intervals.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    queue_len: u64,
    placed: u64,
    last_percent: u64,
}

impl ProgressTracker {
    pub fn new(queue_len: u64) -> Self {
        Self {
            queue_len,
            placed: 0,
            last_percent: 0,
        }
    }

    pub fn placed(&self) -> u64 {
        self.placed
    }

    /// `floor(100 * placed / queue_len)`; an empty queue counts as done.
    pub fn percent(&self) -> u64 {
        if self.queue_len == 0 {
            return 100;
        }
        ((u128::from(self.placed) * 100) / u128::from(self.queue_len)) as u64
    }

    /// Records `amount` more units. Emits an info event on each new tenth and
    /// a debug event on each new fiftieth. Returns the current percentage.
    pub fn advance(&mut self, amount: u64) -> u64 {
        self.placed = self.placed.saturating_add(amount);
        let percent = self.percent();
        if percent / 10 > self.last_percent / 10 {
            tracing::info!(
                target: "landuse_alloc::progress",
                percent,
                placed = self.placed,
                queue_len = self.queue_len,
                "allocation.progress"
            );
        } else if percent / 2 > self.last_percent / 2 {
            tracing::debug!(
                target: "landuse_alloc::progress",
                percent,
                "allocation.progress"
            );
        }
        self.last_percent = percent;
        percent
    }
}
