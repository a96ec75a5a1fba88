//! Lobby phase state machine
//!
//! The lobby cycles `Waiting -> Fill -> Ready -> Playing -> Waiting`. It is a
//! pure value: callers report membership changes and one-second ticks, and
//! act on what the machine reports back. Owning the countdown timer itself is
//! left to the network loop.

use log::info;
use shared::{LobbyPhase, LobbyState, FILL_SECONDS, MAX_PLAYERS, MIN_PLAYERS, READY_SECONDS};

/// Result of advancing a countdown by one second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No countdown is running in the current phase
    Idle,
    /// The countdown moved but the phase did not change
    Counted,
    /// The phase changed to something other than `Playing`
    PhaseChanged,
    /// The ready countdown elapsed; a match must be started
    MatchStarted,
}

/// Process-wide lobby phase and its two countdowns
///
/// Countdown fields only carry meaning in their own phase and are both zero
/// whenever the lobby is `Waiting`.
#[derive(Debug, Clone)]
pub struct Lobby {
    phase: LobbyPhase,
    fill_remaining: u32,
    ready_remaining: u32,
}

impl Lobby {
    /// Creates a lobby in `Waiting` with both countdowns at zero
    pub fn new() -> Self {
        Self {
            phase: LobbyPhase::Waiting,
            fill_remaining: 0,
            ready_remaining: 0,
        }
    }

    /// Returns the current phase
    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    /// Returns the `lobbyState` payload for the current phase and countdowns
    pub fn snapshot(&self) -> LobbyState {
        LobbyState {
            phase: self.phase,
            fill_remaining: self.fill_remaining,
            ready_remaining: self.ready_remaining,
        }
    }

    fn enter_waiting(&mut self) {
        info!("Lobby phase -> waiting");
        self.phase = LobbyPhase::Waiting;
        self.fill_remaining = 0;
        self.ready_remaining = 0;
    }

    fn enter_fill(&mut self) {
        info!("Lobby phase -> fill ({}s)", FILL_SECONDS);
        self.phase = LobbyPhase::Fill;
        self.fill_remaining = FILL_SECONDS;
    }

    fn enter_ready(&mut self) {
        info!("Lobby phase -> ready ({}s)", READY_SECONDS);
        self.phase = LobbyPhase::Ready;
        self.fill_remaining = 0;
        self.ready_remaining = READY_SECONDS;
    }

    fn enter_playing(&mut self) {
        info!("Lobby phase -> playing");
        self.phase = LobbyPhase::Playing;
        self.ready_remaining = 0;
    }

    /// Reacts to a processed `join`; returns true if the phase changed
    pub fn on_join(&mut self, members: usize) -> bool {
        if self.phase == LobbyPhase::Waiting && members >= MIN_PLAYERS {
            self.enter_fill();
            return true;
        }
        false
    }

    /// Reacts to a connection leaving; returns true if the phase changed
    ///
    /// A countdown with fewer than two members left is abandoned at once
    /// rather than waiting for its next tick.
    pub fn on_leave(&mut self, members: usize) -> bool {
        if self.phase.is_counting_down() && members < MIN_PLAYERS {
            self.enter_waiting();
            return true;
        }
        false
    }

    /// Advances the running countdown by one second
    pub fn tick(&mut self, members: usize) -> Tick {
        match self.phase {
            LobbyPhase::Fill => {
                self.fill_remaining = self.fill_remaining.saturating_sub(1);
                if self.fill_remaining == 0 || members >= MAX_PLAYERS {
                    self.enter_ready();
                    Tick::PhaseChanged
                } else {
                    Tick::Counted
                }
            }
            LobbyPhase::Ready => {
                self.ready_remaining = self.ready_remaining.saturating_sub(1);
                if members < MIN_PLAYERS {
                    self.enter_waiting();
                    Tick::PhaseChanged
                } else if self.ready_remaining == 0 {
                    self.enter_playing();
                    Tick::MatchStarted
                } else {
                    Tick::Counted
                }
            }
            LobbyPhase::Waiting | LobbyPhase::Playing => Tick::Idle,
        }
    }

    /// Returns to `Waiting` once a match is over; returns true if it was running
    pub fn end_match(&mut self) -> bool {
        if self.phase != LobbyPhase::Playing {
            return false;
        }
        self.enter_waiting();
        true
    }
}

impl Default for Lobby {
    fn default() -> Self {
        Self::new()
    }
}
