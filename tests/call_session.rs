//! Call session scenarios against scripted signaling and peers
//!
//! Time is paused: waiting on the session's queue auto-advances the clock to
//! the next reconnect timer, so backoff delays are measured exactly.
//!
//! Run with: cargo test --test call_session

use std::sync::Arc;
use std::time::Duration;

use crabavatar::call::{CallSession, CallState, IceConnectionState, PeerEvent};
use crabavatar::config::AvatarConfig;
use crabavatar::errors::AvatarError;
use crabavatar::invariant_ppt::{
    clear_invariant_log, contract_test, CALL_TRANSITION_ALLOWED, OFFER_FLUSHED_ONCE,
};
use crabavatar::signaling::{IceCandidate, LinkId, SignalingMessage};
use crabavatar::testing::{ScriptedPeerConnector, ScriptedSignaling};

fn session() -> (CallSession, ScriptedSignaling, ScriptedPeerConnector) {
    let signaling = ScriptedSignaling::new();
    let peers = ScriptedPeerConnector::new();
    let session = CallSession::new(
        &AvatarConfig::default().signaling,
        Arc::new(signaling.clone()),
        Arc::new(peers.clone()),
    )
    .expect("default config is valid");
    (session, signaling, peers)
}

/// Wait for the next queued event (a reconnect timer, here) and apply it;
/// returns how much virtual time passed.
async fn await_timer(session: &mut CallSession) -> Duration {
    let started = tokio::time::Instant::now();
    let event = session.next_event().await.expect("queue open");
    session.handle_event(event).await;
    started.elapsed()
}

fn offers(messages: &[SignalingMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            SignalingMessage::Offer { sdp } => Some(sdp.clone()),
            _ => None,
        })
        .collect()
}

fn candidate(n: u16) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000{} typ host", n, n, n),
        Some("0".to_string()),
        Some(0),
    )
}

/// Start and let link 1 open; leaves the session in `Negotiating`
async fn negotiating() -> (CallSession, ScriptedSignaling, ScriptedPeerConnector, LinkId) {
    let (mut session, signaling, peers) = session();
    session.start().await.unwrap();
    let link = signaling.last_link().unwrap();
    signaling.accept(link);
    session.pump().await;
    assert_eq!(session.state(), CallState::Negotiating);
    (session, signaling, peers, link)
}

#[tokio::test(start_paused = true)]
async fn buffered_offer_is_flushed_exactly_once() {
    clear_invariant_log();
    let (mut session, signaling, peers) = session();

    session.start().await.unwrap();
    assert_eq!(session.state(), CallState::AwaitingChannel);
    assert!(session.has_pending_offer());
    assert_eq!(peers.offers(), vec![(1, false)]);

    let link = signaling.last_link().unwrap();
    assert!(signaling.sent(link).is_empty());

    signaling.accept(link);
    session.pump().await;
    assert!(!session.has_pending_offer());
    assert_eq!(offers(&signaling.sent(link)), vec!["offer-1-1".to_string()]);

    // A duplicate open notification must not resend.
    signaling.accept(link);
    session.pump().await;
    assert_eq!(offers(&signaling.sent(link)).len(), 1);
    assert_eq!(peers.offers().len(), 1);

    contract_test(
        "buffered offer",
        &[OFFER_FLUSHED_ONCE, CALL_TRANSITION_ALLOWED],
    );
}

#[tokio::test(start_paused = true)]
async fn remote_answer_connects() {
    let (mut session, signaling, peers, link) = negotiating().await;

    signaling.deliver(link, &SignalingMessage::Answer { sdp: "remote-answer".into() });
    session.pump().await;

    assert_eq!(session.state(), CallState::Connected);
    assert_eq!(peers.answers_applied(), vec!["remote-answer".to_string()]);

    // A second answer in Connected is unexpected and dropped.
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "late".into() });
    session.pump().await;
    assert_eq!(peers.answers_applied().len(), 1);
    assert_eq!(session.state(), CallState::Connected);
}

#[tokio::test(start_paused = true)]
async fn callee_answers_remote_offer() {
    let (mut session, signaling, peers, link) = negotiating().await;

    signaling.deliver(link, &SignalingMessage::Offer { sdp: "remote-offer".into() });
    session.pump().await;

    assert_eq!(session.state(), CallState::Connected);
    // Our own offer was still unanswered, so it had to be rolled back first.
    assert_eq!(peers.rollbacks(), 1);
    assert_eq!(peers.offers_accepted(), vec!["remote-offer".to_string()]);
    assert!(signaling
        .sent(link)
        .contains(&SignalingMessage::Answer { sdp: "answer-1".into() }));
}

#[tokio::test(start_paused = true)]
async fn renegotiation_offer_when_connected_needs_no_rollback() {
    let (mut session, signaling, peers, link) = negotiating().await;
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "remote-answer".into() });
    session.pump().await;
    assert_eq!(session.state(), CallState::Connected);

    signaling.deliver(link, &SignalingMessage::Offer { sdp: "renegotiate".into() });
    session.pump().await;

    assert_eq!(peers.rollbacks(), 0);
    assert_eq!(peers.offers_accepted(), vec!["renegotiate".to_string()]);
    assert_eq!(session.state(), CallState::Connected);
}

#[tokio::test(start_paused = true)]
async fn local_candidates_follow_the_offer() {
    let (mut session, signaling, peers) = session();
    session.start().await.unwrap();
    let link = signaling.last_link().unwrap();

    peers.emit(PeerEvent::LocalCandidate(candidate(1)));
    peers.emit(PeerEvent::LocalCandidate(candidate(2)));
    session.pump().await;
    assert_eq!(session.pending_candidates(), 2);
    assert!(signaling.sent(link).is_empty());

    signaling.accept(link);
    session.pump().await;
    assert_eq!(session.pending_candidates(), 0);

    let sent = signaling.sent(link);
    assert_eq!(sent.len(), 3);
    assert!(matches!(sent[0], SignalingMessage::Offer { .. }));
    assert_eq!(sent[1], SignalingMessage::Candidate { candidate: candidate(1) });
    assert_eq!(sent[2], SignalingMessage::Candidate { candidate: candidate(2) });

    // Once the offer is out, candidates go straight to the wire.
    peers.emit(PeerEvent::LocalCandidate(candidate(3)));
    session.pump().await;
    assert_eq!(
        signaling.sent(link).last(),
        Some(&SignalingMessage::Candidate { candidate: candidate(3) })
    );
}

#[tokio::test(start_paused = true)]
async fn remote_candidates_reach_the_peer() {
    let (mut session, signaling, peers, link) = negotiating().await;

    signaling.deliver(link, &SignalingMessage::Candidate { candidate: candidate(7) });
    session.pump().await;
    assert_eq!(peers.remote_candidates(), vec![candidate(7)]);
}

#[tokio::test(start_paused = true)]
async fn housekeeping_and_malformed_frames_leave_state_alone() {
    let (mut session, signaling, _, link) = negotiating().await;
    let before = signaling.sent(link).len();

    signaling.deliver_raw(link, "{not json");
    signaling.deliver_raw(link, r#"{"type":"mystery"}"#);
    signaling.deliver(link, &SignalingMessage::UserDisconnected { user_id: "u-2".into() });
    session.pump().await;
    assert_eq!(session.state(), CallState::Negotiating);
    assert_eq!(signaling.sent(link).len(), before);

    signaling.deliver(link, &SignalingMessage::Ping);
    session.pump().await;
    assert_eq!(signaling.sent(link).last(), Some(&SignalingMessage::Pong));
    assert_eq!(session.state(), CallState::Negotiating);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_fails_and_restarts_fresh() {
    let (mut session, signaling, peers) = session();
    session.start().await.unwrap();

    let mut delays = Vec::new();
    for _ in 0..5 {
        let link = signaling.last_link().unwrap();
        signaling.drop_link(link);
        session.pump().await;
        assert_eq!(session.state(), CallState::AwaitingChannel);
        delays.push(await_timer(&mut session).await);
        assert_eq!(signaling.last_link(), Some(link + 1));
    }
    assert_eq!(
        delays,
        [1_000, 2_000, 4_000, 8_000, 16_000].map(Duration::from_millis)
    );

    // The sixth drop exhausts the policy.
    signaling.drop_link(signaling.last_link().unwrap());
    session.pump().await;
    assert_eq!(session.state(), CallState::Failed);
    assert!(matches!(
        session.last_error(),
        Some(AvatarError::SignalingTransport(_))
    ));
    assert!(!session.has_peer());
    assert!(!session.has_channel());
    assert_eq!(peers.live(), 0);
    assert_eq!(signaling.open_count(), 6);

    session.start().await.unwrap();
    assert_eq!(session.state(), CallState::AwaitingChannel);
    assert!(session.last_error().is_none());
    assert_eq!(session.reconnect_attempt(), Some(0));
    assert_eq!(signaling.last_link(), Some(7));
    assert_eq!(session.generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn connected_link_loss_renegotiates_and_resets_backoff() {
    let (mut session, signaling, _, link) = negotiating().await;
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "a1".into() });
    session.pump().await;
    assert_eq!(session.state(), CallState::Connected);

    signaling.drop_link(link);
    session.pump().await;
    assert_eq!(session.state(), CallState::Reconnecting);
    assert_eq!(await_timer(&mut session).await, Duration::from_millis(1_000));

    let relink = signaling.last_link().unwrap();
    signaling.accept(relink);
    session.pump().await;
    assert_eq!(offers(&signaling.sent(relink)).len(), 1);
    assert_eq!(session.state(), CallState::Reconnecting);

    signaling.deliver(relink, &SignalingMessage::Answer { sdp: "a2".into() });
    session.pump().await;
    assert_eq!(session.state(), CallState::Connected);
    assert_eq!(session.reconnect_attempt(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn ice_failure_restarts_ice_then_reconnects_fully() {
    let (mut session, signaling, peers, link) = negotiating().await;
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "a1".into() });
    session.pump().await;

    peers.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));
    session.pump().await;
    assert_eq!(session.state(), CallState::Reconnecting);
    assert_eq!(peers.offers(), vec![(1, false), (1, true)]);
    assert_eq!(offers(&signaling.sent(link)).len(), 2);
    assert_eq!(session.generation(), 1);

    // Still failing after the restart: replace the peer and the link.
    peers.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));
    session.pump().await;
    assert_eq!(session.state(), CallState::Reconnecting);
    assert_eq!(session.generation(), 2);
    assert_eq!(peers.closed(), 1);
    assert_eq!(peers.live(), 1);
    assert!(session.has_pending_offer());
    assert!(!session.is_channel_open());

    assert_eq!(await_timer(&mut session).await, Duration::from_millis(1_000));
    let relink = signaling.last_link().unwrap();
    assert_eq!(relink, link + 1);
    signaling.accept(relink);
    session.pump().await;
    assert_eq!(offers(&signaling.sent(relink)), vec!["offer-2-3".to_string()]);

    signaling.deliver(relink, &SignalingMessage::Answer { sdp: "a2".into() });
    session.pump().await;
    assert_eq!(session.state(), CallState::Connected);
}

#[tokio::test(start_paused = true)]
async fn ice_recovery_rearms_the_restart() {
    let (mut session, signaling, peers, link) = negotiating().await;
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "a1".into() });
    session.pump().await;

    peers.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));
    session.pump().await;
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "a2".into() });
    peers.emit(PeerEvent::IceConnectionState(IceConnectionState::Connected));
    session.pump().await;
    assert_eq!(session.state(), CallState::Connected);

    // A later failure gets a fresh ICE restart instead of a full reconnect.
    peers.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));
    session.pump().await;
    assert_eq!(session.generation(), 1);
    assert_eq!(peers.offers().last(), Some(&(1, true)));
}

#[tokio::test(start_paused = true)]
async fn rejected_answer_triggers_full_reconnect() {
    let (mut session, signaling, peers, link) = negotiating().await;
    peers.reject_answers(true);

    signaling.deliver(link, &SignalingMessage::Answer { sdp: "bad".into() });
    session.pump().await;
    assert_eq!(session.state(), CallState::Reconnecting);
    assert_eq!(session.generation(), 2);
    assert!(session.has_pending_offer());
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_peer_are_ignored() {
    let (mut session, signaling, peers, link) = negotiating().await;
    peers.reject_answers(true);
    signaling.deliver(link, &SignalingMessage::Answer { sdp: "bad".into() });
    session.pump().await;
    assert_eq!(session.generation(), 2);
    let offers_before = peers.offers().len();

    peers.emit_for(1, PeerEvent::IceConnectionState(IceConnectionState::Failed));
    peers.emit_for(1, PeerEvent::LocalCandidate(candidate(9)));
    session.pump().await;
    assert_eq!(session.generation(), 2);
    assert_eq!(session.pending_candidates(), 0);
    assert_eq!(peers.offers().len(), offers_before);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_reconnect() {
    let (mut session, signaling, peers) = session();
    session.start().await.unwrap();
    signaling.drop_link(signaling.last_link().unwrap());
    session.pump().await;

    session.stop().await;
    assert_eq!(session.state(), CallState::Closed);
    assert_eq!(peers.live(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(session.pump().await, 0);
    assert_eq!(signaling.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_returns_on_stop_and_on_failure() {
    let (mut session, _, _) = session();
    let handle = session.handle();
    handle.start();
    handle.stop();
    assert!(session.run().await.is_ok());
    assert_eq!(session.state(), CallState::Closed);

    let (mut session, signaling, _) = self::session();
    signaling.fail_next_open(AvatarError::SignalingTransport("refused".into()));
    session.handle().start();
    let result = session.run().await;
    assert!(matches!(result, Err(AvatarError::SignalingTransport(_))));
    assert_eq!(session.state(), CallState::Failed);
}
