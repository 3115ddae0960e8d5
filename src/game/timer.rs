//! Timer Scheduler
//!
//! Deferred work driven by the simulation clock. Each task carries the
//! generation it was scheduled for (a round number or a player's effect
//! generation); the handler compares it against the live value and drops
//! stale tasks instead of acting on them.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::state::PlayerId;

/// Deferred work item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerTask {
    /// End an activated power-up effect.
    ExpirePowerUp {
        player_id: PlayerId,
        effect_generation: u32,
    },

    /// End the round after the all-tagged grace delay.
    EndRound { round_number: u32 },

    /// Start the next round after intermission.
    RestartRound { after_round: u32 },
}

/// Ordered timer queue keyed by (due time, insertion order).
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    queue: BTreeMap<(u64, u64), TimerTask>,
    next_seq: u64,
}

impl Scheduler {
    /// Schedule a task to fire at `due_at` (ms).
    pub fn schedule(&mut self, due_at: u64, task: TimerTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((due_at, seq), task);
    }

    /// Remove and return every task due at or before `now`, earliest first.
    pub fn drain_due(&mut self, now: u64) -> Vec<TimerTask> {
        let pending = match now.checked_add(1) {
            Some(bound) => self.queue.split_off(&(bound, 0)),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.queue, pending);
        due.into_values().collect()
    }

    /// Drop every task matching a predicate.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&TimerTask) -> bool) {
        self.queue.retain(|_, task| !predicate(task));
    }

    /// Due time of the earliest task.
    pub fn next_due(&self) -> Option<u64> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    /// Number of scheduled tasks.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_due_in_order() {
        let mut timers = Scheduler::default();
        timers.schedule(300, TimerTask::EndRound { round_number: 3 });
        timers.schedule(100, TimerTask::EndRound { round_number: 1 });
        timers.schedule(100, TimerTask::EndRound { round_number: 2 });
        timers.schedule(500, TimerTask::RestartRound { after_round: 1 });

        let due = timers.drain_due(300);
        assert_eq!(
            due,
            vec![
                TimerTask::EndRound { round_number: 1 },
                TimerTask::EndRound { round_number: 2 },
                TimerTask::EndRound { round_number: 3 },
            ]
        );
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_due(), Some(500));
        assert!(timers.drain_due(499).is_empty());
    }

    #[test]
    fn test_cancel_where() {
        let mut timers = Scheduler::default();
        let id = PlayerId::new([1; 16]);
        timers.schedule(10, TimerTask::ExpirePowerUp { player_id: id, effect_generation: 0 });
        timers.schedule(20, TimerTask::EndRound { round_number: 1 });

        timers.cancel_where(|task| matches!(task, TimerTask::EndRound { .. }));
        assert_eq!(timers.len(), 1);

        timers.cancel_where(|_| true);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_drain_at_max_time() {
        let mut timers = Scheduler::default();
        timers.schedule(u64::MAX, TimerTask::EndRound { round_number: 1 });
        assert_eq!(timers.drain_due(u64::MAX).len(), 1);
    }
}
