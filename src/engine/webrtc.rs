//! WebRTC media transport
//!
//! Backs [`MediaTransport`] with the `webrtc` crate. Each session is a peer
//! connection with one receive-only audio and one receive-only video
//! transceiver; forwarded tracks are `TrackLocalStaticRTP` mirrors.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::config::EngineConfig;
use super::media::{ForwardTrack, MediaSession, MediaTransport, SessionEvent, SessionEvents, SessionState};
use crate::error::MediaError;

impl ForwardTrack for TrackLocalStaticRTP {
    fn id(&self) -> &str {
        TrackLocal::id(self)
    }
}

impl From<RTCPeerConnectionState> for SessionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => SessionState::Connecting,
            RTCPeerConnectionState::Connected => SessionState::Connected,
            RTCPeerConnectionState::Disconnected => SessionState::Disconnected,
            RTCPeerConnectionState::Failed => SessionState::Failed,
            RTCPeerConnectionState::Closed => SessionState::Closed,
            _ => SessionState::New,
        }
    }
}

/// Peer-connection factory
pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcTransport {
    /// Build the API with the default codecs and interceptors
    pub fn new(config: &EngineConfig) -> Result<Self, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| MediaError::SessionCreate(e.to_string()))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| MediaError::SessionCreate(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    type Session = WebRtcSession;
    type Track = TrackLocalStaticRTP;
    type Remote = Arc<TrackRemote>;

    async fn create_session(
        &self,
    ) -> Result<(Arc<WebRtcSession>, SessionEvents<Arc<TrackRemote>>), MediaError> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| MediaError::SessionCreate(e.to_string()))?;
        let pc = Arc::new(pc);

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| MediaError::SessionCreate(e.to_string()))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let candidates = tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates = candidates.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json().map(|init| serde_json::to_string(&init)) {
                    Ok(Ok(json)) => {
                        let _ = candidates.send(SessionEvent::Candidate(json));
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "Candidate encoding failed"),
                    Err(e) => tracing::warn!(error = %e, "Candidate conversion failed"),
                }
            })
        }));

        let states = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let _ = states.send(SessionEvent::StateChanged(state.into()));
            Box::pin(async {})
        }));

        let tracks = tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let _ = tracks.send(SessionEvent::Track(track));
            Box::pin(async {})
        }));

        Ok((Arc::new(WebRtcSession { pc }), rx))
    }

    fn remote_track_id(&self, remote: &Arc<TrackRemote>) -> String {
        remote.id()
    }

    fn remote_stream_id(&self, remote: &Arc<TrackRemote>) -> String {
        remote.stream_id()
    }

    fn mirror(&self, remote: &Arc<TrackRemote>) -> Result<TrackLocalStaticRTP, MediaError> {
        let id = remote.id();
        if id.is_empty() {
            return Err(MediaError::Mirror("inbound track has no identifier".into()));
        }

        Ok(TrackLocalStaticRTP::new(
            remote.codec().capability,
            id,
            remote.stream_id(),
        ))
    }

    async fn forward(&self, remote: &Arc<TrackRemote>, track: &TrackLocalStaticRTP) {
        loop {
            let packet = match remote.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!(track = %remote.id(), error = %e, "Inbound track ended");
                    return;
                }
            };

            // Fails only for receivers that went away; the next pass drops them
            if let Err(e) = track.write_rtp(&packet).await {
                tracing::trace!(track = %remote.id(), error = %e, "Forwarded packet dropped");
            }
        }
    }
}

/// One peer connection
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaSession for WebRtcSession {
    type Track = TrackLocalStaticRTP;

    fn state(&self) -> SessionState {
        self.pc.connection_state().into()
    }

    async fn sending_track_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                ids.push(track.id().to_owned());
            }
        }
        ids
    }

    async fn receiving_track_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                let id = track.id();
                if !id.is_empty() {
                    ids.push(id);
                }
            }
        }
        ids
    }

    async fn stop_sending(&self, track_id: &str) -> Result<(), MediaError> {
        for sender in self.pc.get_senders().await {
            let matches = match sender.track().await {
                Some(track) => track.id() == track_id,
                None => false,
            };
            if matches {
                self.pc
                    .remove_track(&sender)
                    .await
                    .map_err(|e| MediaError::Sender(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn start_sending(&self, track: Arc<TrackLocalStaticRTP>) -> Result<(), MediaError> {
        self.pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map(|_| ())
            .map_err(|e| MediaError::Sender(e.to_string()))
    }

    async fn create_offer(&self) -> Result<String, MediaError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))?;

        serde_json::to_string(&offer).map_err(|e| MediaError::Negotiation(e.to_string()))
    }

    async fn receiving_ssrcs(&self) -> Vec<u32> {
        let mut ssrcs = Vec::new();
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                let ssrc = track.ssrc();
                if ssrc != 0 {
                    ssrcs.push(ssrc);
                }
            }
        }
        ssrcs
    }

    async fn request_keyframe(&self, ssrc: u32) -> Result<(), MediaError> {
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: ssrc,
        };
        self.pc
            .write_rtcp(&[Box::new(pli)])
            .await
            .map(|_| ())
            .map_err(|e| MediaError::Feedback(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: &str) -> Result<(), MediaError> {
        let init: RTCIceCandidateInit =
            serde_json::from_str(candidate).map_err(|e| MediaError::Negotiation(e.to_string()))?;

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))
    }

    async fn set_remote_answer(&self, answer: &str) -> Result<(), MediaError> {
        let answer: RTCSessionDescription =
            serde_json::from_str(answer).map_err(|e| MediaError::Negotiation(e.to_string()))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc
            .close()
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            SessionState::from(RTCPeerConnectionState::Failed),
            SessionState::Failed
        );
        assert_eq!(
            SessionState::from(RTCPeerConnectionState::Closed),
            SessionState::Closed
        );
        assert_eq!(
            SessionState::from(RTCPeerConnectionState::New),
            SessionState::New
        );
    }

    #[tokio::test]
    async fn test_session_starts_with_nothing_to_forward() {
        let transport = WebRtcTransport::new(&EngineConfig::default()).unwrap();
        let (session, _events) = transport.create_session().await.unwrap();

        assert!(session.sending_track_ids().await.is_empty());
        assert!(session.receiving_track_ids().await.is_empty());
        assert!(session.receiving_ssrcs().await.is_empty());

        session.close().await.unwrap();
    }
}
