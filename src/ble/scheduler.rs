//! Connection scheduler state.
//!
//! Round-robin selection of the next Idle peer, the single negotiation
//! slot, operator pause, and the global failure counter that drives the
//! connection backoff. All mutation goes through the transition methods
//! below; the central engine calls them from one task.

use crate::ble::peer::{PeerId, PeerRegistry, PeerState};
use crate::config::{
    BACKOFF_LONG_FROM, BACKOFF_LONG_MS, BACKOFF_MEDIUM_AFTER, BACKOFF_MEDIUM_MS,
    BACKOFF_SHORT_AFTER, BACKOFF_SHORT_MS, CONNECTION_FAILURE_MAX,
};
use crate::error::CommandError;

/// Delay before the next connection attempt after `failures` consecutive
/// failed attempts.
pub const fn backoff_delay_ms(failures: u8) -> u64 {
    if failures >= BACKOFF_LONG_FROM {
        BACKOFF_LONG_MS
    } else if failures > BACKOFF_MEDIUM_AFTER {
        BACKOFF_MEDIUM_MS
    } else if failures > BACKOFF_SHORT_AFTER {
        BACKOFF_SHORT_MS
    } else {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduler {
    cursor: usize,
    slot: Option<PeerId>,
    disabled: bool,
    failures: u8,
    peer_count: usize,
}

impl Scheduler {
    pub fn new(peer_count: usize, enabled: bool) -> Self {
        Self {
            cursor: 0,
            slot: None,
            disabled: !enabled,
            failures: 0,
            peer_count,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_some()
    }

    /// Peer holding the negotiation slot.
    pub fn slot(&self) -> Option<PeerId> {
        self.slot
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn failures(&self) -> u8 {
        self.failures
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn backoff_ms(&self) -> u64 {
        backoff_delay_ms(self.failures)
    }

    fn advance_cursor(&mut self) {
        if self.peer_count > 0 {
            self.cursor = (self.cursor + 1) % self.peer_count;
        }
    }

    /// Pick the next Idle peer at or after the cursor and reserve the
    /// negotiation slot for it. `None` when paused, busy or nothing is
    /// Idle.
    pub fn select(&mut self, peers: &PeerRegistry) -> Option<PeerId> {
        if self.disabled || self.is_busy() || !peers.any_idle() {
            return None;
        }

        for _ in 0..self.peer_count {
            let id = PeerId(self.cursor as u8);
            if peers.get(id).map(|p| p.state()) == Some(PeerState::Idle) {
                self.slot = Some(id);
                return Some(id);
            }
            self.advance_cursor();
        }
        None
    }

    /// Free the slot without touching the counter or cursor.
    pub fn release(&mut self) {
        self.slot = None;
    }

    pub fn on_connect_succeeded(&mut self) {
        self.failures = 0;
    }

    /// Count the failure, free the slot and move on to the next peer.
    pub fn on_connect_failed(&mut self) {
        self.failures = self.failures.saturating_add(1).min(CONNECTION_FAILURE_MAX);
        self.slot = None;
        self.advance_cursor();
    }

    /// Negotiation finished; the slot is free for the next peer.
    pub fn on_active(&mut self, peer: PeerId) {
        if self.slot == Some(peer) {
            self.slot = None;
        }
    }

    /// A link went down. `was_active` is the peer's state before the drop.
    pub fn on_disconnected(&mut self, peer: PeerId, was_active: bool) {
        if self.slot == Some(peer) {
            self.slot = None;
        }
        if was_active {
            self.failures = 0;
        }
        if self.cursor == peer.index() {
            self.advance_cursor();
        }
    }

    pub fn enable(&mut self) -> Result<(), CommandError> {
        if !self.disabled {
            return Err(CommandError::AlreadyEnabled);
        }
        self.disabled = false;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), CommandError> {
        if self.disabled {
            return Err(CommandError::AlreadyDisabled);
        }
        self.disabled = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PEER_COUNT;

    #[test]
    fn backoff_breakpoints() {
        assert_eq!(backoff_delay_ms(0), 0);
        assert_eq!(backoff_delay_ms(8), 0);
        assert_eq!(backoff_delay_ms(9), 800);
        assert_eq!(backoff_delay_ms(16), 800);
        assert_eq!(backoff_delay_ms(17), 4_000);
        assert_eq!(backoff_delay_ms(27), 4_000);
        assert_eq!(backoff_delay_ms(28), 10_000);
        assert_eq!(backoff_delay_ms(30), 10_000);
    }

    #[test]
    fn backoff_is_monotonic() {
        let mut last = 0;
        for failures in 0..=u8::MAX {
            let delay = backoff_delay_ms(failures);
            assert!(delay >= last);
            last = delay;
        }
    }

    #[test]
    fn failure_count_saturates() {
        let mut s = Scheduler::new(PEER_COUNT, true);
        for _ in 0..100 {
            s.on_connect_failed();
        }
        assert_eq!(s.failures(), CONNECTION_FAILURE_MAX);
        s.on_connect_succeeded();
        assert_eq!(s.failures(), 0);
    }

    #[test]
    fn select_skips_busy_and_disabled() {
        let peers = PeerRegistry::from_config();
        let mut s = Scheduler::new(PEER_COUNT, false);
        assert_eq!(s.select(&peers), None);

        s.enable().unwrap();
        assert_eq!(s.select(&peers), Some(PeerId(0)));
        assert!(s.is_busy());
        assert_eq!(s.select(&peers), None);
    }

    #[test]
    fn select_skips_non_idle_peers() {
        let mut peers = PeerRegistry::from_config();
        peers.get_mut(PeerId(0)).unwrap().begin_connecting();
        peers.get_mut(PeerId(0)).unwrap().mark_active();

        let mut s = Scheduler::new(PEER_COUNT, true);
        assert_eq!(s.select(&peers), Some(PeerId(1)));
        assert_eq!(s.cursor(), 1);
    }

    #[test]
    fn nothing_idle_leaves_cursor() {
        let mut peers = PeerRegistry::from_config();
        for peer in peers.iter_mut() {
            peer.begin_connecting();
        }
        let mut s = Scheduler::new(PEER_COUNT, true);
        assert_eq!(s.select(&peers), None);
        assert_eq!(s.cursor(), 0);
        assert!(!s.is_busy());
    }

    #[test]
    fn disconnect_of_cursor_peer_advances() {
        let peers = PeerRegistry::from_config();
        let mut s = Scheduler::new(PEER_COUNT, true);
        let id = s.select(&peers).unwrap();

        s.on_disconnected(id, false);
        assert!(!s.is_busy());
        assert_eq!(s.cursor(), 1);

        // Another peer dropping does not move the cursor.
        s.on_disconnected(PeerId(2), true);
        assert_eq!(s.cursor(), 1);
    }

    #[test]
    fn active_disconnect_resets_failures() {
        let mut s = Scheduler::new(PEER_COUNT, true);
        for _ in 0..12 {
            s.on_connect_failed();
        }
        assert_eq!(s.backoff_ms(), 800);
        s.on_disconnected(PeerId(1), true);
        assert_eq!(s.failures(), 0);
        assert_eq!(s.backoff_ms(), 0);
    }

    #[test]
    fn redundant_enable_disable_rejected() {
        let mut s = Scheduler::new(PEER_COUNT, true);
        assert_eq!(s.enable(), Err(CommandError::AlreadyEnabled));
        assert_eq!(s.disable(), Ok(()));
        assert_eq!(s.disable(), Err(CommandError::AlreadyDisabled));
        assert!(s.is_disabled());
    }
}
