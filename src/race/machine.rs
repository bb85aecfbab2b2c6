//! Per-client race state machine
//!
//! Each client runs its own instance; the two stay synchronized purely by
//! exchanging relay events. Every transition is a local decision driven by a
//! local action or a received remote event; nothing blocks on a round-trip.

use crate::error::{DuelError, Result};
use crate::relay::messages::RaceEvent;
use crate::race::session::RaceSession;
use crate::types::{Completion, Participant, ParticipantId};
use crate::utils::speed_wpm;
use std::time::Instant;
use tracing::{debug, warn};

/// Phases of the race handshake cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    Idle,
    Joined,
    ReadyPending,
    Countdown,
    Racing,
    Finished,
    RematchPending,
    RestartPending,
}

/// UI-facing notifications produced by transitions
#[derive(Debug, Clone, PartialEq)]
pub enum RaceNotice {
    PeerJoined(Participant),
    PeerLeft(ParticipantId),
    CountdownStarted { seconds: u32 },
    RaceStarted,
    /// Provisional outcome from locally-observed events
    ProvisionalWinner(ParticipantId),
    /// Authoritative outcome broadcast by the arbiter
    FinalResult {
        winner_id: ParticipantId,
        speed_wpm: u32,
        elapsed_seconds: f64,
    },
    PeerProgress { input: String },
}

/// The per-client race state machine.
///
/// Methods that represent local actions or remote events return the events
/// to publish; the caller fires them at the relay without waiting.
pub struct RaceStateMachine {
    local: Participant,
    peer: Option<Participant>,
    /// Whether the peer's presence was ever observed; guards the spurious
    /// leave notification when no peer ever joined
    peer_seen: bool,
    phase: RacePhase,
    session: RaceSession,
    countdown_seconds: u32,
    /// First completion observed locally; provisional until the arbiter's
    /// result arrives
    provisional_winner: Option<ParticipantId>,
    /// Authoritative result, at most one per round
    final_winner: Option<ParticipantId>,
    notices: Vec<RaceNotice>,
}

impl RaceStateMachine {
    pub fn new(local: Participant, passage: String, countdown_seconds: u32) -> Self {
        Self {
            local,
            peer: None,
            peer_seen: false,
            phase: RacePhase::Idle,
            session: RaceSession::new(passage),
            countdown_seconds,
            provisional_winner: None,
            final_winner: None,
            notices: Vec::new(),
        }
    }

    /// Construct with the opponent already known (matchmade rooms).
    pub fn with_peer(
        local: Participant,
        peer: Participant,
        passage: String,
        countdown_seconds: u32,
    ) -> Self {
        let mut machine = Self::new(local, passage, countdown_seconds);
        machine.peer = Some(peer);
        machine.peer_seen = true;
        machine
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn session(&self) -> &RaceSession {
        &self.session
    }

    pub fn local_id(&self) -> &str {
        &self.local.id
    }

    pub fn peer(&self) -> Option<&Participant> {
        self.peer.as_ref()
    }

    pub fn countdown_seconds(&self) -> u32 {
        self.countdown_seconds
    }

    /// Winner as this client currently believes it: authoritative if the
    /// arbiter has spoken, provisional otherwise.
    pub fn winner(&self) -> Option<&ParticipantId> {
        self.final_winner.as_ref().or(self.provisional_winner.as_ref())
    }

    /// Drain pending UI notices.
    pub fn drain_notices(&mut self) -> Vec<RaceNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Enter the room: announce presence to whoever is listening.
    pub fn join(&mut self) -> Result<Vec<RaceEvent>> {
        if self.phase != RacePhase::Idle {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot join from phase {:?}", self.phase),
            }
            .into());
        }
        self.phase = RacePhase::Joined;
        Ok(vec![RaceEvent::Join {
            participant: self.local.clone(),
        }])
    }

    /// Local ready action.
    pub fn mark_ready(&mut self) -> Result<Vec<RaceEvent>> {
        if self.phase != RacePhase::Joined {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot ready up from phase {:?}", self.phase),
            }
            .into());
        }

        self.session.ready.insert(self.local.id.clone());
        self.phase = RacePhase::ReadyPending;
        let events = vec![RaceEvent::Ready {
            participant_id: self.local.id.clone(),
        }];
        // No further event on reaching Countdown: each client gets there on
        // its own once it has observed both readiness signals
        self.check_both_ready();
        debug!("'{}' ready, phase now {:?}", self.local.id, self.phase);
        Ok(events)
    }

    /// Countdown elapsed; the race is on. Driven by the local timer.
    pub fn begin_racing(&mut self) -> Result<()> {
        if self.phase != RacePhase::Countdown {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot start racing from phase {:?}", self.phase),
            }
            .into());
        }
        self.phase = RacePhase::Racing;
        self.session.started_at = Some(Instant::now());
        self.notices.push(RaceNotice::RaceStarted);
        Ok(())
    }

    /// Local keystroke progress: publish a full snapshot of current input,
    /// and complete the race if it matches the passage.
    pub fn type_progress(&mut self, input: &str) -> Result<Vec<RaceEvent>> {
        if self.phase != RacePhase::Racing {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot type from phase {:?}", self.phase),
            }
            .into());
        }

        if input == self.session.passage {
            let elapsed = self
                .session
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            return self.complete_with_elapsed(input, elapsed);
        }

        Ok(vec![RaceEvent::TextUpdate {
            participant_id: self.local.id.clone(),
            input: input.to_string(),
        }])
    }

    /// Record local completion with an explicit elapsed time.
    ///
    /// Elapsed time comes from the local wall clock; the relay offers no
    /// timing the peers could share.
    pub fn complete_with_elapsed(&mut self, input: &str, elapsed_seconds: f64) -> Result<Vec<RaceEvent>> {
        if self.phase != RacePhase::Racing {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot complete from phase {:?}", self.phase),
            }
            .into());
        }

        let speed = speed_wpm(input, elapsed_seconds);
        self.session.completions.insert(
            self.local.id.clone(),
            Completion {
                speed_wpm: speed,
                elapsed_seconds,
            },
        );

        if self.provisional_winner.is_none() {
            self.provisional_winner = Some(self.local.id.clone());
            self.notices
                .push(RaceNotice::ProvisionalWinner(self.local.id.clone()));
        }
        self.phase = RacePhase::Finished;

        Ok(vec![RaceEvent::Win {
            participant_id: self.local.id.clone(),
            speed_wpm: speed,
            elapsed_seconds,
        }])
    }

    /// Local "play again" vote from the results screen.
    pub fn vote_play_again(&mut self) -> Result<Vec<RaceEvent>> {
        if self.phase != RacePhase::Finished && self.phase != RacePhase::RematchPending {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot vote rematch from phase {:?}", self.phase),
            }
            .into());
        }

        let both = self.session.rematch_votes.record_local();
        self.phase = RacePhase::RematchPending;
        let mut events = vec![RaceEvent::PlayAgain {
            participant_id: self.local.id.clone(),
        }];

        if both {
            events.extend(self.begin_next_round(false)?);
        }
        Ok(events)
    }

    /// Local "restart" vote: like play-again but zeroes the scoreboard.
    pub fn vote_restart(&mut self) -> Result<Vec<RaceEvent>> {
        if !matches!(
            self.phase,
            RacePhase::Racing | RacePhase::Finished | RacePhase::RestartPending
        ) {
            return Err(DuelError::InvalidRequest {
                reason: format!("cannot vote restart from phase {:?}", self.phase),
            }
            .into());
        }

        let both = self.session.restart_votes.record_local();
        self.phase = RacePhase::RestartPending;
        let mut events = vec![RaceEvent::Restart {
            participant_id: self.local.id.clone(),
        }];

        if both {
            events.extend(self.begin_next_round(true)?);
        }
        Ok(events)
    }

    /// Local leave (unmount, navigation away).
    ///
    /// The leave event is only emitted if the peer's presence was observed;
    /// otherwise nobody is listening and a spurious notification could
    /// confuse a later joiner.
    pub fn leave(&mut self) -> Result<Vec<RaceEvent>> {
        let events = if self.peer_seen {
            vec![RaceEvent::Leave {
                participant_id: self.local.id.clone(),
            }]
        } else {
            Vec::new()
        };
        self.phase = RacePhase::Idle;
        Ok(events)
    }

    /// Dispatch a remote event received from the relay.
    ///
    /// Own events echoed back by the relay are ignored; the state they
    /// describe was already applied locally.
    pub fn handle_remote(&mut self, event: RaceEvent) -> Result<Vec<RaceEvent>> {
        if event.sender_id() == Some(self.local.id.as_str()) {
            return Ok(Vec::new());
        }

        match event {
            RaceEvent::Join { participant } => {
                // A later joiner never usurps the known opponent slot
                if self.peer.is_none() {
                    self.peer = Some(participant.clone());
                }
                self.peer_seen = true;
                self.notices.push(RaceNotice::PeerJoined(participant));
                Ok(Vec::new())
            }
            RaceEvent::Ready { participant_id } => {
                self.session.ready.insert(participant_id);
                self.check_both_ready();
                Ok(Vec::new())
            }
            RaceEvent::TextUpdate { input, .. } => {
                // Full snapshot: an out-of-order update only means a briefly
                // stale display
                self.notices.push(RaceNotice::PeerProgress { input });
                Ok(Vec::new())
            }
            RaceEvent::Win {
                participant_id,
                speed_wpm,
                elapsed_seconds,
            } => {
                self.session.completions.insert(
                    participant_id.clone(),
                    Completion {
                        speed_wpm,
                        elapsed_seconds,
                    },
                );

                if self.phase == RacePhase::Racing {
                    // Peer finished first as observed here: stop racing
                    self.phase = RacePhase::Finished;
                    if self.provisional_winner.is_none() {
                        self.provisional_winner = Some(participant_id.clone());
                        self.notices
                            .push(RaceNotice::ProvisionalWinner(participant_id));
                    }
                }
                Ok(Vec::new())
            }
            RaceEvent::PlayAgain { .. } => {
                let both = self.session.rematch_votes.record_remote();
                if both && matches!(self.phase, RacePhase::Finished | RacePhase::RematchPending) {
                    return self.begin_next_round(false);
                }
                Ok(Vec::new())
            }
            RaceEvent::Restart { .. } => {
                let both = self.session.restart_votes.record_remote();
                if both
                    && matches!(
                        self.phase,
                        RacePhase::Racing | RacePhase::Finished | RacePhase::RestartPending
                    )
                {
                    return self.begin_next_round(true);
                }
                Ok(Vec::new())
            }
            RaceEvent::Leave { participant_id } => {
                if self.phase != RacePhase::Idle {
                    self.notices.push(RaceNotice::PeerLeft(participant_id));
                    self.phase = RacePhase::Idle;
                }
                Ok(Vec::new())
            }
            RaceEvent::Result {
                winner_id,
                speed_wpm,
                elapsed_seconds,
            } => {
                self.apply_result(winner_id, speed_wpm, elapsed_seconds);
                Ok(Vec::new())
            }
        }
    }

    /// Authoritative result from the arbiter; overrides any provisional
    /// outcome and stops a still-running race.
    fn apply_result(&mut self, winner_id: ParticipantId, speed: u32, elapsed_seconds: f64) {
        if self.final_winner.is_some() {
            // Duplicate broadcast; at-least-once delivery makes these normal
            return;
        }
        if matches!(self.phase, RacePhase::Racing | RacePhase::Countdown) {
            self.phase = RacePhase::Finished;
        }
        if self.provisional_winner.as_deref() != Some(winner_id.as_str()) {
            if let Some(provisional) = &self.provisional_winner {
                warn!(
                    "Arbiter result '{}' overrides provisional winner '{}'",
                    winner_id, provisional
                );
            }
        }

        self.final_winner = Some(winner_id.clone());
        self.session.credit_win(&winner_id);
        self.notices.push(RaceNotice::FinalResult {
            winner_id,
            speed_wpm: speed,
            elapsed_seconds,
        });
    }

    /// Both readiness signals observed: enter countdown.
    ///
    /// Order-independent on purpose: whether the remote ready arrived before
    /// or after the local action, the same condition fires here.
    fn check_both_ready(&mut self) {
        if self.phase != RacePhase::ReadyPending && self.phase != RacePhase::Joined {
            return;
        }
        let peer_ready = self
            .peer
            .as_ref()
            .map(|p| self.session.ready.contains(&p.id))
            .unwrap_or(false);
        let local_ready = self.session.ready.contains(&self.local.id);

        if local_ready && peer_ready {
            self.phase = RacePhase::Countdown;
            self.notices.push(RaceNotice::CountdownStarted {
                seconds: self.countdown_seconds,
            });
        }
    }

    /// Both votes in: reset for the next round and auto-ready.
    ///
    /// The automatic re-ready is the "self-directed restart signal": both
    /// sides re-enter the ready handshake without further user action.
    fn begin_next_round(&mut self, reset_scores: bool) -> Result<Vec<RaceEvent>> {
        if reset_scores {
            self.session.reset_scores();
        } else {
            self.session.reset_round();
        }
        self.provisional_winner = None;
        self.final_winner = None;
        self.phase = RacePhase::Joined;

        self.mark_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> RaceStateMachine {
        RaceStateMachine::with_peer(
            Participant::new("local", "Local"),
            Participant::new("peer", "Peer"),
            "the quick brown fox".to_string(),
            3,
        )
    }

    fn ready_event(id: &str) -> RaceEvent {
        RaceEvent::Ready {
            participant_id: id.to_string(),
        }
    }

    fn win_event(id: &str, wpm: u32, elapsed: f64) -> RaceEvent {
        RaceEvent::Win {
            participant_id: id.to_string(),
            speed_wpm: wpm,
            elapsed_seconds: elapsed,
        }
    }

    /// Drive a machine to the Racing phase.
    fn race_machine() -> RaceStateMachine {
        let mut m = machine();
        m.join().unwrap();
        m.mark_ready().unwrap();
        m.handle_remote(ready_event("peer")).unwrap();
        m.begin_racing().unwrap();
        m
    }

    #[test]
    fn test_join_then_ready() {
        let mut m = machine();
        assert_eq!(m.phase(), RacePhase::Idle);

        let events = m.join().unwrap();
        assert!(matches!(events[0], RaceEvent::Join { .. }));
        assert_eq!(m.phase(), RacePhase::Joined);

        let events = m.mark_ready().unwrap();
        assert!(matches!(events[0], RaceEvent::Ready { .. }));
        assert_eq!(m.phase(), RacePhase::ReadyPending);
    }

    #[test]
    fn test_ready_handshake_local_first() {
        let mut m = machine();
        m.join().unwrap();
        m.mark_ready().unwrap();
        assert_eq!(m.phase(), RacePhase::ReadyPending);

        m.handle_remote(ready_event("peer")).unwrap();
        assert_eq!(m.phase(), RacePhase::Countdown);
    }

    #[test]
    fn test_ready_handshake_remote_first() {
        let mut m = machine();
        m.join().unwrap();
        // Remote readiness arrives before the local action
        m.handle_remote(ready_event("peer")).unwrap();
        assert_eq!(m.phase(), RacePhase::Joined);

        m.mark_ready().unwrap();
        // Order independence: same Countdown state either way
        assert_eq!(m.phase(), RacePhase::Countdown);
    }

    #[test]
    fn test_own_ready_echo_is_ignored() {
        let mut m = machine();
        m.join().unwrap();
        m.mark_ready().unwrap();

        // The relay echoes our own event back; it must not count as the peer
        m.handle_remote(ready_event("local")).unwrap();
        assert_eq!(m.phase(), RacePhase::ReadyPending);
    }

    #[test]
    fn test_countdown_to_racing() {
        let mut m = race_machine();
        assert_eq!(m.phase(), RacePhase::Racing);
        assert!(m.session().started_at.is_some());
    }

    #[test]
    fn test_text_progress_emits_snapshot() {
        let mut m = race_machine();
        let events = m.type_progress("the qui").unwrap();
        match &events[0] {
            RaceEvent::TextUpdate { input, .. } => assert_eq!(input, "the qui"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(m.phase(), RacePhase::Racing);
    }

    #[test]
    fn test_local_completion_wins_provisionally() {
        let mut m = race_machine();
        let events = m
            .complete_with_elapsed("the quick brown fox", 20.0)
            .unwrap();

        match &events[0] {
            RaceEvent::Win {
                participant_id,
                speed_wpm,
                elapsed_seconds,
            } => {
                assert_eq!(participant_id, "local");
                // 4 words in 20 seconds is 12 WPM
                assert_eq!(*speed_wpm, 12);
                assert_eq!(*elapsed_seconds, 20.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(m.phase(), RacePhase::Finished);
        assert_eq!(m.winner().map(String::as_str), Some("local"));
    }

    #[test]
    fn test_typing_full_passage_completes() {
        let mut m = race_machine();
        let events = m.type_progress("the quick brown fox").unwrap();
        assert!(matches!(events[0], RaceEvent::Win { .. }));
        assert_eq!(m.phase(), RacePhase::Finished);
    }

    #[test]
    fn test_remote_win_finishes_local_race() {
        let mut m = race_machine();
        m.handle_remote(win_event("peer", 60, 20.0)).unwrap();

        assert_eq!(m.phase(), RacePhase::Finished);
        assert_eq!(m.winner().map(String::as_str), Some("peer"));
        assert_eq!(
            m.session().completions.get("peer").unwrap().speed_wpm,
            60
        );
    }

    #[test]
    fn test_late_remote_win_does_not_steal_victory() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();
        m.handle_remote(win_event("peer", 80, 18.0)).unwrap();

        // First observed completion stands as the provisional winner
        assert_eq!(m.winner().map(String::as_str), Some("local"));
        // The peer's stats are still recorded for display
        assert!(m.session().completions.contains_key("peer"));
    }

    #[test]
    fn test_arbiter_result_overrides_provisional() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();
        assert_eq!(m.winner().map(String::as_str), Some("local"));

        m.handle_remote(RaceEvent::Result {
            winner_id: "peer".to_string(),
            speed_wpm: 80,
            elapsed_seconds: 18.0,
        })
        .unwrap();

        assert_eq!(m.winner().map(String::as_str), Some("peer"));
        assert_eq!(m.session().score_of("peer"), 1);
        assert_eq!(m.session().score_of("local"), 0);
    }

    #[test]
    fn test_duplicate_result_credits_once() {
        let mut m = race_machine();
        let result = RaceEvent::Result {
            winner_id: "peer".to_string(),
            speed_wpm: 80,
            elapsed_seconds: 18.0,
        };
        m.handle_remote(result.clone()).unwrap();
        m.handle_remote(result).unwrap();

        assert_eq!(m.session().score_of("peer"), 1);
    }

    #[test]
    fn test_single_rematch_vote_does_not_reset() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();

        m.vote_play_again().unwrap();
        assert_eq!(m.phase(), RacePhase::RematchPending);
        // Completions survive until both votes are in
        assert!(!m.session().completions.is_empty());
    }

    #[test]
    fn test_rematch_requires_both_votes_local_first() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();

        m.vote_play_again().unwrap();
        let events = m
            .handle_remote(RaceEvent::PlayAgain {
                participant_id: "peer".to_string(),
            })
            .unwrap();

        // Both votes in: automatic re-ready emitted, round state cleared
        assert!(events
            .iter()
            .any(|e| matches!(e, RaceEvent::Ready { .. })));
        assert_eq!(m.phase(), RacePhase::ReadyPending);
        assert!(m.session().completions.is_empty());
    }

    #[test]
    fn test_rematch_requires_both_votes_remote_first() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();

        m.handle_remote(RaceEvent::PlayAgain {
            participant_id: "peer".to_string(),
        })
        .unwrap();
        assert_eq!(m.phase(), RacePhase::Finished);

        let events = m.vote_play_again().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, RaceEvent::Ready { .. })));
        assert_eq!(m.phase(), RacePhase::ReadyPending);
    }

    #[test]
    fn test_rematch_keeps_scoreboard() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();
        m.handle_remote(RaceEvent::Result {
            winner_id: "local".to_string(),
            speed_wpm: 12,
            elapsed_seconds: 20.0,
        })
        .unwrap();
        assert_eq!(m.session().score_of("local"), 1);

        m.vote_play_again().unwrap();
        m.handle_remote(RaceEvent::PlayAgain {
            participant_id: "peer".to_string(),
        })
        .unwrap();

        assert_eq!(m.session().score_of("local"), 1);
    }

    #[test]
    fn test_restart_zeroes_scoreboard() {
        let mut m = race_machine();
        m.complete_with_elapsed("the quick brown fox", 20.0).unwrap();
        m.handle_remote(RaceEvent::Result {
            winner_id: "local".to_string(),
            speed_wpm: 12,
            elapsed_seconds: 20.0,
        })
        .unwrap();

        m.vote_restart().unwrap();
        m.handle_remote(RaceEvent::Restart {
            participant_id: "peer".to_string(),
        })
        .unwrap();

        assert_eq!(m.session().score_of("local"), 0);
        assert_eq!(m.phase(), RacePhase::ReadyPending);
    }

    #[test]
    fn test_restart_allowed_mid_race() {
        let mut m = race_machine();
        assert_eq!(m.phase(), RacePhase::Racing);

        m.vote_restart().unwrap();
        assert_eq!(m.phase(), RacePhase::RestartPending);
    }

    #[test]
    fn test_peer_leave_is_terminal() {
        let mut m = race_machine();
        m.handle_remote(RaceEvent::Leave {
            participant_id: "peer".to_string(),
        })
        .unwrap();

        assert_eq!(m.phase(), RacePhase::Idle);
        let notices = m.drain_notices();
        assert!(notices
            .iter()
            .any(|n| matches!(n, RaceNotice::PeerLeft(id) if id == "peer")));
    }

    #[test]
    fn test_leave_emits_only_after_peer_seen() {
        // Peer never observed: no leave event
        let mut alone = RaceStateMachine::new(
            Participant::new("local", "Local"),
            "passage text".to_string(),
            3,
        );
        alone.join().unwrap();
        assert!(alone.leave().unwrap().is_empty());

        // Peer known from the match: leave announced
        let mut paired = machine();
        paired.join().unwrap();
        let events = paired.leave().unwrap();
        assert!(matches!(events[0], RaceEvent::Leave { .. }));
    }

    #[test]
    fn test_join_notice_does_not_change_race_state() {
        let mut m = race_machine();
        m.handle_remote(RaceEvent::Join {
            participant: Participant::new("spectator", "Watcher"),
        })
        .unwrap();

        assert_eq!(m.phase(), RacePhase::Racing);
        let notices = m.drain_notices();
        assert!(notices
            .iter()
            .any(|n| matches!(n, RaceNotice::PeerJoined(p) if p.id == "spectator")));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut m = machine();
        assert!(m.mark_ready().is_err());
        assert!(m.begin_racing().is_err());
        assert!(m.type_progress("x").is_err());
        assert!(m.vote_play_again().is_err());
    }
}
