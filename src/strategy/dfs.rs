//! Private module for selective re-export.

use crate::registry::Id;
use crate::strategy::{Strategy, StrategyError};

/// One alternative at a decision point, with a flag marking whether the
/// subtree below it has been fully explored.
#[derive(Clone, Debug)]
struct Choice<T> {
    value: T,
    done: bool,
}

impl<T: Copy> Choice<T> {
    fn new(value: T) -> Self {
        Choice { value, done: false }
    }
}

fn all_done<T>(level: &[Choice<T>]) -> bool {
    level.iter().all(|c| c.done)
}

/// Exhaustive depth-first search with backtracking.
///
/// Each decision point records the full set of alternatives (the enabled
/// operations, or the possible choice values) together with the index taken.
/// While executing, the pick at depth `d` un-marks the pick at depth `d - 1`,
/// which lets the next iteration deterministically replay the common prefix
/// by always taking the first unexplored alternative. Between iterations,
/// [`DfsStrategy::prepare_for_next_iteration`] pops fully-explored suffixes
/// and advances the deepest unexplored branch; once every alternative at
/// every depth is done, it returns `false` and exploration is complete. For
/// a program with a finite state space this visits each distinct
/// interleaving (up to the step bound) exactly once.
#[derive(Default)]
pub struct DfsStrategy {
    sched_stack: Vec<Vec<Choice<Id>>>,
    bool_stack: Vec<Vec<Choice<bool>>>,
    int_stack: Vec<Vec<Choice<u64>>>,
    sched_index: usize,
    bool_index: usize,
    int_index: usize,
}

impl DfsStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the first unexplored alternative at the current depth of
    /// `stack`, maintaining the prefix-replay bookkeeping described on the
    /// type. Returns `None` when every alternative at this depth is done.
    fn advance<T: Copy>(
        stack: &mut Vec<Vec<Choice<T>>>,
        index: &mut usize,
        fresh: impl FnOnce() -> Vec<Choice<T>>,
    ) -> Option<T> {
        if *index == stack.len() {
            stack.push(fresh());
        }
        let pos = stack[*index].iter().position(|c| !c.done)?;
        if *index > 0 {
            if let Some(prev) = stack[*index - 1].iter_mut().rev().find(|c| c.done) {
                prev.done = false;
            }
        }
        let level = &mut stack[*index];
        level[pos].done = true;
        let value = level[pos].value;
        *index += 1;
        Some(value)
    }

    /// Pops fully-explored suffix levels of `stack`, marking the first
    /// unexplored alternative of each new deepest level as taken.
    fn backtrack<T>(stack: &mut Vec<Vec<Choice<T>>>) {
        for idx in (1..stack.len()).rev() {
            if !all_done(&stack[idx]) {
                break;
            }
            if let Some(prev) = stack[idx - 1].iter_mut().find(|c| !c.done) {
                prev.done = true;
            }
            stack.remove(idx);
        }
    }
}

impl Strategy for DfsStrategy {
    fn next_operation(&mut self, enabled: &[Id], _current: Id) -> Result<Id, StrategyError> {
        let fresh = || enabled.iter().copied().map(Choice::new).collect();
        Self::advance(&mut self.sched_stack, &mut self.sched_index, fresh)
            .ok_or(StrategyError::Exhausted)
    }

    fn next_bool(&mut self) -> Result<bool, StrategyError> {
        let fresh = || vec![Choice::new(false), Choice::new(true)];
        Self::advance(&mut self.bool_stack, &mut self.bool_index, fresh)
            .ok_or(StrategyError::Exhausted)
    }

    fn next_int(&mut self, max: u64) -> Result<u64, StrategyError> {
        let fresh = || (0..max.max(1)).map(Choice::new).collect();
        Self::advance(&mut self.int_stack, &mut self.int_index, fresh)
            .ok_or(StrategyError::Exhausted)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        if self.sched_stack.iter().all(|level| all_done(level))
            && self.bool_stack.iter().all(|level| all_done(level))
            && self.int_stack.iter().all(|level| all_done(level))
        {
            return false;
        }

        self.sched_index = 0;
        self.bool_index = 0;
        self.int_index = 0;

        Self::backtrack(&mut self.bool_stack);
        Self::backtrack(&mut self.int_stack);
        if !self.bool_stack.is_empty() && self.bool_stack.iter().all(|level| all_done(level)) {
            self.bool_stack.clear();
        }
        if !self.int_stack.is_empty() && self.int_stack.iter().all(|level| all_done(level)) {
            self.int_stack.clear();
        }

        if self.bool_stack.is_empty() && self.int_stack.is_empty() {
            Self::backtrack(&mut self.sched_stack);
        } else if let Some(level) = self.sched_stack.last_mut() {
            // Unexplored nondet choices remain below the current schedule, so
            // replay the same schedule prefix instead of advancing it.
            if let Some(last_done) = level.iter_mut().rev().find(|c| c.done) {
                last_done.done = false;
            }
        }

        true
    }

    fn reset(&mut self) {
        self.sched_stack.clear();
        self.bool_stack.clear();
        self.int_stack.clear();
        self.sched_index = 0;
        self.bool_index = 0;
        self.int_index = 0;
    }

    fn description(&self) -> String {
        "dfs".to_string()
    }

    fn is_fair(&self) -> bool {
        false
    }
}
