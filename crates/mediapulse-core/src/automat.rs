//! Playback state machine
//!
//! Converts raw player callbacks into a legal event sequence. Buffering and
//! Seeking are interrupt states: entering pushes the interrupted state onto
//! a stack, leaving pops it back. Illegal transitions report `false` and the
//! corresponding event is suppressed by the tracker, which is how duplicate
//! and out-of-order player callbacks are filtered.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Playback states for one tracked entity (content or ad)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Initial and terminal state
    Stopped,
    /// Requested, first frame not yet shown
    Starting,
    /// Content is playing
    Playing,
    /// Playback paused
    Paused,
    /// Rebuffering (interrupt state)
    Buffering,
    /// Scrubbing (interrupt state)
    Seeking,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Starting => write!(f, "starting"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Seeking => write!(f, "seeking"),
        }
    }
}

/// Requested transitions, named for the player gesture that causes them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Autoplay,
    ClickPlay,
    ClickPause,
    FrameShown,
    InitBuffering,
    EndBuffering,
    InitDraggingSlider,
    EndDraggingSlider,
}

/// State machine with a transient-state stack
pub struct PlaybackAutomat {
    state: PlaybackState,
    stack: Vec<PlaybackState>,
}

impl PlaybackAutomat {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            stack: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Attempt a transition. Returns whether it was legal; on `false` the
    /// state is unchanged and the caller must suppress the send.
    pub fn transition(&mut self, t: Transition) -> bool {
        let allowed = match self.state {
            PlaybackState::Stopped => self.in_stopped(t),
            PlaybackState::Starting => self.in_starting(t),
            PlaybackState::Playing => self.in_playing(t),
            PlaybackState::Paused => self.in_paused(t),
            PlaybackState::Seeking => self.in_seeking(t),
            PlaybackState::Buffering => self.in_buffering(t),
        };
        if !allowed {
            debug!(state = %self.state, transition = ?t, "Transition suppressed");
        }
        allowed
    }

    fn in_stopped(&mut self, t: Transition) -> bool {
        if matches!(t, Transition::Autoplay | Transition::ClickPlay) {
            self.move_state(PlaybackState::Starting);
            return true;
        }
        false
    }

    fn in_starting(&mut self, t: Transition) -> bool {
        if t == Transition::FrameShown {
            self.move_state(PlaybackState::Playing);
            return true;
        }
        false
    }

    fn in_playing(&mut self, t: Transition) -> bool {
        if t == Transition::ClickPause {
            self.move_state(PlaybackState::Paused);
            return true;
        }
        false
    }

    fn in_paused(&mut self, t: Transition) -> bool {
        if t == Transition::ClickPlay {
            self.move_state(PlaybackState::Playing);
            return true;
        }
        false
    }

    fn in_seeking(&mut self, t: Transition) -> bool {
        match t {
            Transition::EndDraggingSlider => {
                self.back_to_state();
                true
            }
            // Seek-end can get lost on large streaming seeks; recover on the
            // next play/pause gesture instead of wedging in Seeking.
            Transition::ClickPlay => {
                self.back_to_state();
                self.move_state(PlaybackState::Playing);
                true
            }
            Transition::ClickPause => {
                self.back_to_state();
                self.move_state(PlaybackState::Paused);
                true
            }
            _ => false,
        }
    }

    fn in_buffering(&mut self, t: Transition) -> bool {
        if t == Transition::EndBuffering {
            self.back_to_state();
            return true;
        }
        false
    }

    /// Enter an interrupt state, remembering the interrupted one
    pub fn interrupt(&mut self, state: PlaybackState) {
        if state != self.state {
            self.stack.push(self.state);
            self.state = state;
        }
    }

    /// Unconditional end: clears the stack and returns to Stopped
    pub fn end(&mut self) {
        self.stack.clear();
        self.move_state(PlaybackState::Stopped);
    }

    fn move_state(&mut self, new_state: PlaybackState) {
        self.state = new_state;
    }

    fn back_to_state(&mut self) {
        match self.stack.pop() {
            Some(prev) => self.state = prev,
            // Pop on an empty stack is a no-op, not an error
            None => debug!("State stack underrun ignored"),
        }
    }
}

impl Default for PlaybackAutomat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut a = PlaybackAutomat::new();
        assert!(a.transition(Transition::ClickPlay));
        assert_eq!(a.state(), PlaybackState::Starting);
        assert!(a.transition(Transition::FrameShown));
        assert_eq!(a.state(), PlaybackState::Playing);
        assert!(a.transition(Transition::ClickPause));
        assert_eq!(a.state(), PlaybackState::Paused);
        assert!(a.transition(Transition::ClickPlay));
        assert_eq!(a.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_autoplay_also_starts() {
        let mut a = PlaybackAutomat::new();
        assert!(a.transition(Transition::Autoplay));
        assert_eq!(a.state(), PlaybackState::Starting);
    }

    #[test]
    fn test_duplicate_callbacks_suppressed() {
        let mut a = PlaybackAutomat::new();
        assert!(a.transition(Transition::ClickPlay));
        // Player delivers the request twice
        assert!(!a.transition(Transition::ClickPlay));
        assert!(a.transition(Transition::FrameShown));
        assert!(!a.transition(Transition::FrameShown));
    }

    #[test]
    fn test_buffering_pops_interrupted_state() {
        let mut a = PlaybackAutomat::new();
        a.transition(Transition::ClickPlay);
        a.transition(Transition::FrameShown);
        a.transition(Transition::ClickPause);

        a.interrupt(PlaybackState::Buffering);
        assert_eq!(a.state(), PlaybackState::Buffering);
        assert!(a.transition(Transition::EndBuffering));
        // Returns to Paused, not Playing
        assert_eq!(a.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_seek_end_lost_recovers_on_play() {
        let mut a = PlaybackAutomat::new();
        a.transition(Transition::ClickPlay);
        a.transition(Transition::FrameShown);
        a.interrupt(PlaybackState::Seeking);

        // SEEK_END never arrives; user hits play
        assert!(a.transition(Transition::ClickPlay));
        assert_eq!(a.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_end_clears_stack() {
        let mut a = PlaybackAutomat::new();
        a.transition(Transition::ClickPlay);
        a.transition(Transition::FrameShown);
        a.interrupt(PlaybackState::Buffering);
        a.interrupt(PlaybackState::Seeking);

        a.end();
        assert_eq!(a.state(), PlaybackState::Stopped);

        // A fresh session starts clean: EndBuffering is illegal in Stopped
        assert!(!a.transition(Transition::EndBuffering));
        assert_eq!(a.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_pop_on_empty_stack_is_noop() {
        let mut a = PlaybackAutomat::new();
        a.transition(Transition::ClickPlay);
        a.transition(Transition::FrameShown);
        a.interrupt(PlaybackState::Buffering);
        assert!(a.transition(Transition::EndBuffering));
        // Stack is now empty; a stray end-buffering must not pop or panic
        assert!(!a.transition(Transition::EndBuffering));
        assert_eq!(a.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_interrupt_same_state_not_pushed() {
        let mut a = PlaybackAutomat::new();
        a.interrupt(PlaybackState::Buffering);
        a.interrupt(PlaybackState::Buffering);
        assert!(a.transition(Transition::EndBuffering));
        // Only one frame was pushed
        assert_eq!(a.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_double_end_is_stable() {
        let mut a = PlaybackAutomat::new();
        a.transition(Transition::ClickPlay);
        a.end();
        a.end();
        assert_eq!(a.state(), PlaybackState::Stopped);
    }
}
