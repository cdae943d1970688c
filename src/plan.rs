use std::sync::Arc;
use std::time::Duration;

use crate::steps::Phase;

/// Priority class a phase executes under (§4.2). Classes run strictly in
/// this declared order; `derive(Ord)` gives us that ordering for free since
/// variants are declared from highest to lowest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityClass {
    First,
    Early,
    Normal,
    Late,
}

impl PriorityClass {
    pub const ALL: [PriorityClass; 4] = [PriorityClass::First, PriorityClass::Early, PriorityClass::Normal, PriorityClass::Late];
}

/// One compiled, ready-to-run pipeline: an ordered set of phases plus the
/// execution parameters derived from [`crate::config::ValidatorConfig`].
pub struct ValidationPlan {
    pub phases: Vec<Arc<dyn Phase>>,
    pub max_errors: usize,
    pub parallel_phases: bool,
    pub phase_timeout: Duration,
    pub worker_count: usize,
    pub pooling: bool,
}

impl ValidationPlan {
    /// Phases in `class`, preserving registration order (stable sort is not
    /// needed here since `phases` is already built in registration order and
    /// we simply filter).
    pub fn phases_in(&self, class: PriorityClass) -> Vec<Arc<dyn Phase>> {
        self.phases.iter().filter(|p| p.priority() == class).cloned().collect()
    }

    pub fn fail_fast(&self) -> bool {
        self.max_errors == 1
    }
}
