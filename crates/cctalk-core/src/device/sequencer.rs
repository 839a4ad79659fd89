//! Step sequencer
//!
//! Runs an ordered list of steps against a mutable context. Each step is
//! entered exactly once and decides whether the sequence continues; a step
//! that returns [`Flow::Stop`] aborts the remainder. The step list is
//! consumed by [`Sequencer::run`], so captured resources are released when
//! the sequence finishes.

/// Outcome of one sequencer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next step.
    Continue,
    /// Abort the sequence.
    Stop,
}

type Step<'a, C> = Box<dyn FnOnce(&mut C) -> Flow + 'a>;

/// An ordered list of fallible steps over a context `C`.
pub struct Sequencer<'a, C> {
    steps: Vec<(&'static str, Step<'a, C>)>,
}

impl<'a, C> Sequencer<'a, C> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a named step.
    pub fn step<F>(&mut self, name: &'static str, step: F)
    where
        F: FnOnce(&mut C) -> Flow + 'a,
    {
        self.steps.push((name, Box::new(step)));
    }

    /// Run the steps in order. Returns `true` if every step ran and chose
    /// to continue.
    pub fn run(self, context: &mut C) -> bool {
        for (name, step) in self.steps {
            log::debug!("sequence step: {name}");
            if step(context) == Flow::Stop {
                log::debug!("sequence stopped at step: {name}");
                return false;
            }
        }
        true
    }

    /// Number of queued steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if no steps are queued.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<'a, C> Default for Sequencer<'a, C> {
    fn default() -> Self {
        Self::new()
    }
}
