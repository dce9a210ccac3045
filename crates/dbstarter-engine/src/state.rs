//! Engage/disengage state and its atomic container.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the clone.
///
/// `Disengaged → Engaging → Engaged → Disengaging → Disengaged`. The
/// ordinal is what the trigger protocol sends back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Disengaged = 0,
    Engaging = 1,
    Engaged = 2,
    Disengaging = 3,
}

impl State {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(State::Disengaged),
            1 => Some(State::Engaging),
            2 => Some(State::Engaged),
            3 => Some(State::Disengaging),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            State::Disengaged => "DISENGAGED",
            State::Engaging => "ENGAGING",
            State::Engaged => "ENGAGED",
            State::Disengaging => "DISENGAGING",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free holder of the current [`State`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: State) -> Self {
        Self(AtomicU8::new(state.ordinal()))
    }

    pub fn get(&self) -> State {
        // Only valid ordinals are ever stored.
        State::from_ordinal(self.0.load(Ordering::Acquire)).unwrap_or(State::Disengaged)
    }

    pub fn set(&self, state: State) {
        self.0.store(state.ordinal(), Ordering::Release);
    }

    /// Move `from → to` atomically. Returns `false` (and changes
    /// nothing) if the current state is not `from`.
    pub fn transition(&self, from: State, to: State) -> bool {
        self.0
            .compare_exchange(from.ordinal(), to.ordinal(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(State::Disengaged)
    }
}
