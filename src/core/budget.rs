

use std::time::{Duration, Instant};

/// Step and wall-clock allowance for one graph traversal.
#[derive(Debug, Clone)]
pub struct TraversalBudget {
    max_steps: usize,
    steps: usize,
    deadline: Option<Instant>,
    exhausted: bool,
}

impl TraversalBudget {
    pub fn new(max_steps: usize, timeout: Option<Duration>) -> Self {
        Self {
            max_steps,
            steps: 0,
            deadline: timeout.map(|t| Instant::now() + t),
            exhausted: false,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX, None)
    }

    /// Charges one step. Returns false once the budget is spent.
    pub fn tick(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        self.steps += 1;
        if self.steps > self.max_steps {
            self.exhausted = true;
        } else if self.steps % 64 == 0 {
            if let Some(deadline) = self.deadline {
                self.exhausted = Instant::now() >= deadline;
            }
        }
        !self.exhausted
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Default for TraversalBudget {
    fn default() -> Self {
        Self::new(10_000, Some(Duration::from_secs(2)))
    }
}
