//! Testing utilities
//!
//! In-memory stand-ins for the media transport and the signaling sink, so
//! rooms, the forwarding engine and the dispatcher can be driven without
//! sockets or a real peer connection stack.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use crate::engine::{ForwardTrack, MediaSession, MediaTransport, SessionEvent, SessionEvents, SessionState};
use crate::error::{Error, MediaError, Result};
use crate::protocol::{Event, FrameSink};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport that records every session it creates
#[derive(Default)]
pub struct FakeTransport {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    refuse_sessions: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions created so far, oldest first
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        guard(&self.sessions).clone()
    }

    /// Make subsequent `create_session` calls fail
    pub fn refuse_sessions(&self, refuse: bool) {
        self.refuse_sessions.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    type Session = FakeSession;
    type Track = FakeTrack;
    type Remote = FakeRemote;

    async fn create_session(
        &self,
    ) -> std::result::Result<(Arc<FakeSession>, SessionEvents<FakeRemote>), MediaError> {
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return Err(MediaError::SessionCreate("refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(FakeSession::new(tx));
        guard(&self.sessions).push(Arc::clone(&session));
        Ok((session, rx))
    }

    fn remote_track_id(&self, remote: &FakeRemote) -> String {
        remote.id.clone()
    }

    fn remote_stream_id(&self, remote: &FakeRemote) -> String {
        remote.stream_id.clone()
    }

    fn mirror(&self, remote: &FakeRemote) -> std::result::Result<FakeTrack, MediaError> {
        Ok(FakeTrack {
            id: remote.id.clone(),
        })
    }

    async fn forward(&self, remote: &FakeRemote, _track: &FakeTrack) {
        remote.ended.notified().await;
    }
}

/// Inbound track handle; forwarding runs until [`FakeRemote::end`]
#[derive(Debug, Clone)]
pub struct FakeRemote {
    pub id: String,
    pub stream_id: String,
    pub ssrc: u32,
    ended: Arc<Notify>,
}

impl FakeRemote {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, ssrc: u32) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            ssrc,
            ended: Arc::new(Notify::new()),
        }
    }

    /// Simulate a read failure on the inbound track
    pub fn end(&self) {
        self.ended.notify_one();
    }
}

/// Forwardable mirror
#[derive(Debug)]
pub struct FakeTrack {
    id: String,
}

impl ForwardTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Session that records what the engine asked of it
pub struct FakeSession {
    state: Mutex<SessionState>,
    sending: Mutex<BTreeSet<String>>,
    receiving: Mutex<Vec<(String, u32)>>,
    offers: AtomicUsize,
    failing_offers: AtomicUsize,
    stop_requests: AtomicUsize,
    keyframe_requests: Mutex<Vec<u32>>,
    remote_candidates: Mutex<Vec<String>>,
    remote_answers: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<SessionEvent<FakeRemote>>,
}

impl FakeSession {
    fn new(events: mpsc::UnboundedSender<SessionEvent<FakeRemote>>) -> Self {
        Self {
            state: Mutex::new(SessionState::New),
            sending: Mutex::new(BTreeSet::new()),
            receiving: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            failing_offers: AtomicUsize::new(0),
            stop_requests: AtomicUsize::new(0),
            keyframe_requests: Mutex::new(Vec::new()),
            remote_candidates: Mutex::new(Vec::new()),
            remote_answers: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Start receiving an inbound track and announce it
    pub fn publish(&self, remote: FakeRemote) {
        guard(&self.receiving).push((remote.id.clone(), remote.ssrc));
        let _ = self.events.send(SessionEvent::Track(remote));
    }

    /// Change connection state and announce it
    pub fn set_state(&self, state: SessionState) {
        *guard(&self.state) = state;
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }

    /// Announce a locally discovered candidate
    pub fn emit_candidate(&self, candidate: impl Into<String>) {
        let _ = self.events.send(SessionEvent::Candidate(candidate.into()));
    }

    /// Identifiers of the tracks currently sent
    pub fn sending(&self) -> BTreeSet<String> {
        guard(&self.sending).clone()
    }

    /// Offers successfully created
    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    /// Fail the next `count` offer creations
    pub fn fail_next_offers(&self, count: usize) {
        self.failing_offers.store(count, Ordering::SeqCst);
    }

    /// Outbound streams removed so far
    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    /// SSRCs a keyframe was requested for, in order
    pub fn keyframe_requests(&self) -> Vec<u32> {
        guard(&self.keyframe_requests).clone()
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        guard(&self.remote_candidates).clone()
    }

    pub fn remote_answers(&self) -> Vec<String> {
        guard(&self.remote_answers).clone()
    }

    fn ensure_open(&self) -> std::result::Result<(), MediaError> {
        if guard(&self.state).is_terminal() {
            return Err(MediaError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    type Track = FakeTrack;

    fn state(&self) -> SessionState {
        *guard(&self.state)
    }

    async fn sending_track_ids(&self) -> Vec<String> {
        guard(&self.sending).iter().cloned().collect()
    }

    async fn receiving_track_ids(&self) -> Vec<String> {
        guard(&self.receiving).iter().map(|(id, _)| id.clone()).collect()
    }

    async fn stop_sending(&self, track_id: &str) -> std::result::Result<(), MediaError> {
        self.ensure_open()?;
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        guard(&self.sending).remove(track_id);
        Ok(())
    }

    async fn start_sending(&self, track: Arc<FakeTrack>) -> std::result::Result<(), MediaError> {
        self.ensure_open()?;
        guard(&self.sending).insert(track.id().to_owned());
        Ok(())
    }

    async fn create_offer(&self) -> std::result::Result<String, MediaError> {
        self.ensure_open()?;

        let refused = self
            .failing_offers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MediaError::Negotiation("offer refused".into()));
        }

        self.offers.fetch_add(1, Ordering::SeqCst);
        let sending: Vec<String> = self.sending().into_iter().collect();
        Ok(json!({"type": "offer", "sdp": sending.join(",")}).to_string())
    }

    async fn receiving_ssrcs(&self) -> Vec<u32> {
        guard(&self.receiving).iter().map(|(_, ssrc)| *ssrc).collect()
    }

    async fn request_keyframe(&self, ssrc: u32) -> std::result::Result<(), MediaError> {
        self.ensure_open()?;
        guard(&self.keyframe_requests).push(ssrc);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &str) -> std::result::Result<(), MediaError> {
        guard(&self.remote_candidates).push(candidate.to_owned());
        Ok(())
    }

    async fn set_remote_answer(&self, answer: &str) -> std::result::Result<(), MediaError> {
        guard(&self.remote_answers).push(answer.to_owned());
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), MediaError> {
        if !self.state().is_terminal() {
            self.set_state(SessionState::Closed);
        }
        Ok(())
    }
}

/// Frame sink backed by a channel
pub struct MemorySink {
    frames: mpsc::UnboundedSender<String>,
    broken: bool,
}

/// Receiving end of a [`MemorySink`]
pub struct Inbox {
    frames: mpsc::UnboundedReceiver<String>,
}

/// Create a connected sink/inbox pair
pub fn memory_sink() -> (MemorySink, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemorySink {
            frames: tx,
            broken: false,
        },
        Inbox { frames: rx },
    )
}

/// Sink whose every write fails
pub fn broken_sink() -> MemorySink {
    let (tx, _rx) = mpsc::unbounded_channel();
    MemorySink {
        frames: tx,
        broken: true,
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.broken {
            return Err(Error::Transport("sink is broken".into()));
        }
        self.frames
            .send(text)
            .map_err(|_| Error::Transport("inbox dropped".into()))
    }
}

impl Inbox {
    /// Next decoded event, or `None` once every writer is gone
    pub async fn next_event(&mut self) -> Option<Event> {
        let frame = self.frames.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Skip events until one with this wire name arrives
    pub async fn next_named(&mut self, name: &str) -> Option<Event> {
        while let Some(event) = self.next_event().await {
            if event.name() == name {
                return Some(event);
            }
        }
        None
    }

    /// Every event already delivered
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let Ok(event) = serde_json::from_str(&frame) {
                events.push(event);
            }
        }
        events
    }
}
