//! Race coordinator: wires a state machine to the relay
//!
//! Owns the subscription loop, dispatches remote events into the machine,
//! publishes the machine's outgoing events fire-and-forget, and drives the
//! countdown timer.

use crate::error::Result;
use crate::race::machine::{RacePhase, RaceNotice, RaceStateMachine};
use crate::relay::messages::{race_channel, RaceEvent};
use crate::relay::RelayClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Drives one client's side of a race over the relay.
pub struct RaceCoordinator {
    machine: Arc<Mutex<RaceStateMachine>>,
    relay: Arc<dyn RelayClient>,
    channel: String,
    countdown_armed: Arc<AtomicBool>,
}

impl RaceCoordinator {
    pub fn new(machine: RaceStateMachine, relay: Arc<dyn RelayClient>, room_id: &str) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            relay,
            channel: race_channel(room_id),
            countdown_armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn machine(&self) -> Arc<Mutex<RaceStateMachine>> {
        self.machine.clone()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe and start dispatching remote events.
    ///
    /// Returns the handle of the dispatch task; it ends when the relay
    /// stream closes or the machine returns to `Idle` after a peer leave.
    pub async fn spawn(&self) -> Result<JoinHandle<()>> {
        let mut stream = self.relay.subscribe(&self.channel).await?;

        let machine = self.machine.clone();
        let relay = self.relay.clone();
        let channel = self.channel.clone();
        let countdown_armed = self.countdown_armed.clone();

        let handle = tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                let event = match RaceEvent::from_wire(&envelope.event, &envelope.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Ignoring malformed event on '{}': {}", channel, e);
                        continue;
                    }
                };

                let (outgoing, terminal) = {
                    let mut machine = machine.lock().await;
                    let was_peer_leave = matches!(event, RaceEvent::Leave { .. });
                    let outgoing = match machine.handle_remote(event) {
                        Ok(outgoing) => outgoing,
                        Err(e) => {
                            warn!("Event rejected by race machine: {}", e);
                            continue;
                        }
                    };
                    let terminal = was_peer_leave && machine.phase() == RacePhase::Idle;
                    (outgoing, terminal)
                };

                publish_all(&relay, &channel, outgoing).await;
                arm_countdown_if_needed(&machine, &channel, &countdown_armed).await;

                if terminal {
                    debug!("Peer left; stopping dispatch on '{}'", channel);
                    break;
                }
            }
        });

        Ok(handle)
    }

    /// Announce presence in the room.
    pub async fn join(&self) -> Result<()> {
        let events = {
            let mut machine = self.machine.lock().await;
            machine.join()?
        };
        publish_all(&self.relay, &self.channel, events).await;
        Ok(())
    }

    /// Local ready action.
    pub async fn ready(&self) -> Result<()> {
        let events = {
            let mut machine = self.machine.lock().await;
            machine.mark_ready()?
        };
        publish_all(&self.relay, &self.channel, events).await;
        arm_countdown_if_needed(&self.machine, &self.channel, &self.countdown_armed).await;
        Ok(())
    }

    /// Local typing progress (full input snapshot).
    pub async fn type_progress(&self, input: &str) -> Result<()> {
        let events = {
            let mut machine = self.machine.lock().await;
            machine.type_progress(input)?
        };
        publish_all(&self.relay, &self.channel, events).await;
        Ok(())
    }

    /// Local play-again vote.
    pub async fn play_again(&self) -> Result<()> {
        let events = {
            let mut machine = self.machine.lock().await;
            machine.vote_play_again()?
        };
        publish_all(&self.relay, &self.channel, events).await;
        arm_countdown_if_needed(&self.machine, &self.channel, &self.countdown_armed).await;
        Ok(())
    }

    /// Local restart vote.
    pub async fn restart(&self) -> Result<()> {
        let events = {
            let mut machine = self.machine.lock().await;
            machine.vote_restart()?
        };
        publish_all(&self.relay, &self.channel, events).await;
        arm_countdown_if_needed(&self.machine, &self.channel, &self.countdown_armed).await;
        Ok(())
    }

    /// Leave the room.
    pub async fn leave(&self) -> Result<()> {
        let events = {
            let mut machine = self.machine.lock().await;
            machine.leave()?
        };
        publish_all(&self.relay, &self.channel, events).await;
        Ok(())
    }

    /// Drain pending UI notices.
    pub async fn drain_notices(&self) -> Vec<RaceNotice> {
        self.machine.lock().await.drain_notices()
    }
}

/// Publish each event, logging failures without blocking progression.
///
/// The relay offers no acknowledgment worth waiting for; the local state has
/// already advanced optimistically.
async fn publish_all(relay: &Arc<dyn RelayClient>, channel: &str, events: Vec<RaceEvent>) {
    for event in events {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode race event: {}", e);
                continue;
            }
        };
        if let Err(e) = relay.publish(channel, event.event_name(), payload).await {
            warn!(
                "Relay publish of '{}' on '{}' failed (continuing): {}",
                event.event_name(),
                channel,
                e
            );
        }
    }
}

/// Start the local countdown timer exactly once per round.
///
/// Once both readiness signals are known, each client counts down on its own
/// wall clock; no network round-trip is involved.
async fn arm_countdown_if_needed(
    machine: &Arc<Mutex<RaceStateMachine>>,
    channel: &str,
    armed: &Arc<AtomicBool>,
) {
    let countdown_seconds = {
        let machine = machine.lock().await;
        if machine.phase() != RacePhase::Countdown {
            return;
        }
        machine.countdown_seconds()
    };

    if armed.swap(true, Ordering::SeqCst) {
        return;
    }

    let machine = machine.clone();
    let armed = armed.clone();
    let channel = channel.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(countdown_seconds as u64)).await;

        let mut machine = machine.lock().await;
        if machine.phase() == RacePhase::Countdown {
            if let Err(e) = machine.begin_racing() {
                warn!("Failed to start racing on '{}': {}", channel, e);
            }
        }
        // Re-arm for the next round's countdown
        armed.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InMemoryRelay;
    use crate::types::Participant;
    use tokio::time::{sleep, Duration};

    fn coordinator_pair(relay: Arc<InMemoryRelay>) -> (RaceCoordinator, RaceCoordinator) {
        let passage = "tiny passage".to_string();
        let a = RaceStateMachine::with_peer(
            Participant::new("a", "Alice"),
            Participant::new("b", "Bob"),
            passage.clone(),
            // Zero-length countdown keeps the test fast
            0,
        );
        let b = RaceStateMachine::with_peer(
            Participant::new("b", "Bob"),
            Participant::new("a", "Alice"),
            passage,
            0,
        );
        (
            RaceCoordinator::new(a, relay.clone(), "duel-a-b"),
            RaceCoordinator::new(b, relay, "duel-a-b"),
        )
    }

    #[tokio::test]
    async fn test_ready_handshake_over_relay() {
        let relay = Arc::new(InMemoryRelay::new());
        let (a, b) = coordinator_pair(relay);

        let _a_task = a.spawn().await.unwrap();
        let _b_task = b.spawn().await.unwrap();

        a.join().await.unwrap();
        b.join().await.unwrap();
        a.ready().await.unwrap();
        b.ready().await.unwrap();

        // Both clients independently reach Racing via their local countdown
        sleep(Duration::from_millis(200)).await;
        assert_eq!(a.machine().lock().await.phase(), RacePhase::Racing);
        assert_eq!(b.machine().lock().await.phase(), RacePhase::Racing);
    }

    #[tokio::test]
    async fn test_win_propagates_to_peer() {
        let relay = Arc::new(InMemoryRelay::new());
        let (a, b) = coordinator_pair(relay);

        let _a_task = a.spawn().await.unwrap();
        let _b_task = b.spawn().await.unwrap();

        a.join().await.unwrap();
        b.join().await.unwrap();
        a.ready().await.unwrap();
        b.ready().await.unwrap();
        sleep(Duration::from_millis(200)).await;

        // a completes the passage; b should observe the win and finish
        a.type_progress("tiny passage").await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let b_machine = b.machine();
        let b_machine = b_machine.lock().await;
        assert_eq!(b_machine.phase(), RacePhase::Finished);
        assert_eq!(b_machine.winner().map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_leave_terminates_peer() {
        let relay = Arc::new(InMemoryRelay::new());
        let (a, b) = coordinator_pair(relay);

        let _a_task = a.spawn().await.unwrap();
        let b_task = b.spawn().await.unwrap();

        a.join().await.unwrap();
        b.join().await.unwrap();
        a.leave().await.unwrap();

        sleep(Duration::from_millis(200)).await;
        assert_eq!(b.machine().lock().await.phase(), RacePhase::Idle);
        // b's dispatch loop ends once the peer is gone
        assert!(b_task.is_finished());
    }
}
