//! Forwarding engine implementation
//!
//! Holds a room's track registry and connection set, and converges every
//! session toward "send everything in the registry except what it
//! publishes itself".

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::config::EngineConfig;
use super::media::{MediaSession, MediaTransport, SessionEvents};
use crate::error::{Error, MediaError};
use crate::protocol::{Event, EventWriter};

/// Result of a convergence request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// Every session was synchronized and sent an offer
    Converged { attempts: usize },
    /// The attempt cap was hit; a pass is scheduled after the cooldown
    Deferred,
}

/// A peer session and the signaling writer its offers go to
struct PeerEntry<S> {
    session: Arc<S>,
    writer: Arc<EventWriter>,
}

struct EngineState<T: MediaTransport> {
    tracks: HashMap<String, Arc<T::Track>>,
    peers: Vec<PeerEntry<T::Session>>,
}

/// Per-room forwarding engine
///
/// A single mutex guards both the registry and the connection set. Every
/// mutation and every convergence pass runs under it, so no two passes
/// over the same room ever interleave.
pub struct ForwardingEngine<T: MediaTransport> {
    room_id: u32,
    transport: Arc<T>,
    state: Mutex<EngineState<T>>,
    config: EngineConfig,
}

impl<T: MediaTransport> ForwardingEngine<T> {
    pub fn new(room_id: u32, transport: Arc<T>, config: EngineConfig) -> Self {
        Self {
            room_id,
            transport,
            state: Mutex::new(EngineState {
                tracks: HashMap::new(),
                peers: Vec::new(),
            }),
            config,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a media session ready to receive one audio and one video stream
    pub async fn create_session(
        &self,
    ) -> Result<(Arc<T::Session>, SessionEvents<T::Remote>), MediaError> {
        self.transport.create_session().await
    }

    /// Add a session to the connection set
    ///
    /// Does not converge; the caller triggers that once the session is wired.
    pub async fn add_session(&self, session: Arc<T::Session>, writer: Arc<EventWriter>) {
        let mut state = self.state.lock().await;
        state.peers.push(PeerEntry { session, writer });

        tracing::debug!(
            room = self.room_id,
            peers = state.peers.len(),
            "Peer session added"
        );
    }

    /// Mirror an inbound track, register it and converge
    pub async fn add_track(self: &Arc<Self>, remote: &T::Remote) -> Result<Arc<T::Track>, MediaError> {
        let track = {
            let mut state = self.state.lock().await;

            let id = self.transport.remote_track_id(remote);
            let track = Arc::new(self.transport.mirror(remote)?);
            state.tracks.insert(id.clone(), Arc::clone(&track));

            tracing::info!(
                room = self.room_id,
                track = %id,
                tracks = state.tracks.len(),
                "Track registered"
            );
            track
        };

        self.converge().await;
        Ok(track)
    }

    /// Drop a track from the registry and converge
    pub async fn remove_track(self: &Arc<Self>, track_id: &str) {
        {
            let mut state = self.state.lock().await;
            if state.tracks.remove(track_id).is_some() {
                tracing::info!(
                    room = self.room_id,
                    track = %track_id,
                    tracks = state.tracks.len(),
                    "Track unregistered"
                );
            }
        }

        self.converge().await;
    }

    /// Ask every publisher for a keyframe on each of its inbound streams
    ///
    /// Returns the number of feedback requests written.
    pub async fn dispatch_keyframe_refresh(&self) -> usize {
        let state = self.state.lock().await;
        let mut sent = 0;

        for peer in &state.peers {
            for ssrc in peer.session.receiving_ssrcs().await {
                match peer.session.request_keyframe(ssrc).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        tracing::debug!(room = self.room_id, ssrc = ssrc, error = %e, "Keyframe request failed");
                    }
                }
            }
        }

        sent
    }

    /// Bring every session's outbound streams in line with the registry
    ///
    /// On success a keyframe refresh follows. After `max_sync_attempts`
    /// failed passes the lock is released and the pass is retried after
    /// `retry_cooldown`.
    pub async fn converge(self: &Arc<Self>) -> ConvergeOutcome {
        match self.sync_pass().await {
            Some(attempts) => {
                self.dispatch_keyframe_refresh().await;
                ConvergeOutcome::Converged { attempts }
            }
            None => {
                self.schedule_retry();
                ConvergeOutcome::Deferred
            }
        }
    }

    /// Spawn the periodic keyframe refresh task
    ///
    /// The task holds a weak reference and ends once the engine is dropped.
    pub fn spawn_keyframe_task(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let interval = self.config.keyframe_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.dispatch_keyframe_refresh().await;
            }
        })
    }

    /// Identifiers of the registered tracks
    pub async fn track_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.tracks.keys().cloned().collect()
    }

    /// Number of sessions in the connection set
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }

    /// Full passes under the lock; the attempt count on success
    async fn sync_pass(&self) -> Option<usize> {
        let mut state = self.state.lock().await;

        for attempt in 1..=self.config.max_sync_attempts {
            match self.sync_attempt(&mut state).await {
                Ok(()) => {
                    tracing::debug!(
                        room = self.room_id,
                        attempts = attempt,
                        peers = state.peers.len(),
                        tracks = state.tracks.len(),
                        "Sessions converged"
                    );
                    return Some(attempt);
                }
                Err(e) => {
                    tracing::debug!(room = self.room_id, attempt = attempt, error = %e, "Convergence pass restarted");
                }
            }
        }

        tracing::warn!(
            room = self.room_id,
            attempts = self.config.max_sync_attempts,
            retry_in_ms = self.config.retry_cooldown.as_millis() as u64,
            "Convergence exhausted, deferring"
        );
        None
    }

    async fn sync_attempt(&self, state: &mut EngineState<T>) -> Result<(), Error> {
        let before = state.peers.len();
        state.peers.retain(|peer| !peer.session.state().is_terminal());
        if state.peers.len() != before {
            tracing::debug!(
                room = self.room_id,
                pruned = before - state.peers.len(),
                "Closed sessions pruned"
            );
            return Err(MediaError::Closed.into());
        }

        for peer in &state.peers {
            let mut existing = HashSet::new();

            for id in peer.session.sending_track_ids().await {
                if state.tracks.contains_key(&id) {
                    existing.insert(id);
                } else {
                    peer.session.stop_sending(&id).await?;
                }
            }

            // A session never receives its own media back
            existing.extend(peer.session.receiving_track_ids().await);

            for (id, track) in &state.tracks {
                if !existing.contains(id) {
                    peer.session.start_sending(Arc::clone(track)).await?;
                }
            }

            let offer = peer.session.create_offer().await?;
            peer.writer.write_event(&Event::Offer(offer)).await?;
        }

        Ok(())
    }

    fn schedule_retry(self: &Arc<Self>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let cooldown = self.config.retry_cooldown;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(cooldown).await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.sync_pass().await.is_some() {
                    engine.dispatch_keyframe_refresh().await;
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SessionState;
    use crate::testing::{broken_sink, memory_sink, FakeRemote, FakeTransport, Inbox};
    use std::time::Duration;

    fn engine() -> Arc<ForwardingEngine<FakeTransport>> {
        Arc::new(ForwardingEngine::new(
            1,
            Arc::new(FakeTransport::new()),
            EngineConfig::default(),
        ))
    }

    async fn join(
        engine: &Arc<ForwardingEngine<FakeTransport>>,
    ) -> (Arc<crate::testing::FakeSession>, Inbox) {
        let (session, _events) = engine.create_session().await.unwrap();
        let (sink, inbox) = memory_sink();
        engine
            .add_session(Arc::clone(&session), Arc::new(EventWriter::new(sink)))
            .await;
        (session, inbox)
    }

    #[tokio::test]
    async fn test_publisher_never_receives_own_track() {
        let engine = engine();
        let (alice, _alice_inbox) = join(&engine).await;
        let (bob, _bob_inbox) = join(&engine).await;

        let remote = FakeRemote::new("a-video", "alice-stream", 1111);
        alice.publish(remote.clone());
        engine.add_track(&remote).await.unwrap();

        assert!(alice.sending().is_empty());
        assert_eq!(bob.sending().into_iter().collect::<Vec<_>>(), vec!["a-video"]);
    }

    #[tokio::test]
    async fn test_every_session_gets_an_offer() {
        let engine = engine();
        let (alice, mut alice_inbox) = join(&engine).await;
        let (bob, mut bob_inbox) = join(&engine).await;

        let outcome = engine.converge().await;

        assert_eq!(outcome, ConvergeOutcome::Converged { attempts: 1 });
        assert_eq!(alice.offers(), 1);
        assert_eq!(bob.offers(), 1);
        assert_eq!(alice_inbox.next_event().await.unwrap().name(), "offer");
        assert_eq!(bob_inbox.next_event().await.unwrap().name(), "offer");
    }

    #[tokio::test]
    async fn test_removed_track_stops_being_sent() {
        let engine = engine();
        let (alice, _a) = join(&engine).await;
        let (bob, _b) = join(&engine).await;

        let remote = FakeRemote::new("a-audio", "alice-stream", 2222);
        alice.publish(remote.clone());
        engine.add_track(&remote).await.unwrap();
        assert!(bob.sending().contains("a-audio"));

        engine.remove_track("a-audio").await;

        assert!(bob.sending().is_empty());
        assert!(engine.track_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_is_pruned() {
        let engine = engine();
        let (alice, _a) = join(&engine).await;
        let (_bob, _b) = join(&engine).await;
        assert_eq!(engine.session_count().await, 2);

        alice.set_state(SessionState::Closed);
        let outcome = engine.converge().await;

        assert_eq!(outcome, ConvergeOutcome::Converged { attempts: 2 });
        assert_eq!(engine.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_keyframe_refresh_without_sessions_is_noop() {
        let engine = engine();

        assert_eq!(engine.dispatch_keyframe_refresh().await, 0);
    }

    #[tokio::test]
    async fn test_keyframe_refresh_targets_inbound_streams() {
        let engine = engine();
        let (alice, _a) = join(&engine).await;
        let (bob, _b) = join(&engine).await;

        alice.publish(FakeRemote::new("a-video", "s", 10));
        alice.publish(FakeRemote::new("a-audio", "s", 11));

        assert_eq!(engine.dispatch_keyframe_refresh().await, 2);
        assert_eq!(alice.keyframe_requests(), vec![10, 11]);
        assert!(bob.keyframe_requests().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_in_pass() {
        let engine = engine();
        let (alice, _a) = join(&engine).await;

        alice.fail_next_offers(3);
        let outcome = engine.converge().await;

        assert_eq!(outcome, ConvergeOutcome::Converged { attempts: 4 });
        assert_eq!(alice.offers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_defers_then_converges() {
        let engine = engine();
        let (alice, _a) = join(&engine).await;

        alice.fail_next_offers(25);
        let outcome = engine.converge().await;

        assert_eq!(outcome, ConvergeOutcome::Deferred);
        assert_eq!(alice.offers(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(alice.offers(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(alice.offers(), 1);
    }

    #[tokio::test]
    async fn test_broken_writer_exhausts_attempts() {
        let engine = Arc::new(ForwardingEngine::new(
            1,
            Arc::new(FakeTransport::new()),
            EngineConfig::default()
                .max_sync_attempts(3)
                .retry_cooldown(Duration::from_secs(3600)),
        ));
        let (session, _events) = engine.create_session().await.unwrap();
        engine
            .add_session(Arc::clone(&session), Arc::new(EventWriter::new(broken_sink())))
            .await;

        assert_eq!(engine.converge().await, ConvergeOutcome::Deferred);
        assert_eq!(session.offers(), 3);
    }
}
