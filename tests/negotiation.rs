mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::FakeConnection;
use peercall::peer::{
    CandidateDisposition, GlarePolicy, IceCandidate, NegotiationEngine, NegotiationState,
    OfferOutcome, SessionDescription,
};
use peercall::signaling::{Inbox, MemoryRelay, SignalingChannel, SignalingMessage};
use peercall::CallError;

struct Side {
    engine: NegotiationEngine,
    connection: Arc<FakeConnection>,
    inbox: Inbox,
}

async fn side(relay: &MemoryRelay, name: &str, glare: GlarePolicy) -> Side {
    let signaling = Arc::new(relay.channel());
    signaling.connect().await.unwrap();
    let inbox = signaling.subscribe().await.unwrap();
    let connection = Arc::new(FakeConnection::new(name, 0));
    let engine = NegotiationEngine::with_policy(connection.clone(), signaling, glare);
    Side {
        engine,
        connection,
        inbox,
    }
}

async fn pair() -> (Side, Side) {
    let relay = MemoryRelay::new();
    let a = side(&relay, "a", GlarePolicy::default()).await;
    let b = side(&relay, "b", GlarePolicy::default()).await;
    (a, b)
}

#[tokio::test]
async fn offer_answer_reaches_connected_on_both_sides() {
    let (mut a, mut b) = pair().await;

    let offer = a.engine.create_offer().await.unwrap();
    assert_eq!(a.engine.state(), NegotiationState::HaveLocalOffer);
    assert_eq!(b.inbox.try_recv().unwrap(), SignalingMessage::Offer(offer.clone()));

    let outcome = b.engine.receive_offer(offer).await.unwrap();
    let answer = match outcome {
        OfferOutcome::Answered {
            answer,
            abandoned_local_offer,
        } => {
            assert!(!abandoned_local_offer);
            answer
        }
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(b.engine.state(), NegotiationState::Connected);
    assert_eq!(a.inbox.try_recv().unwrap(), SignalingMessage::Answer(answer.clone()));

    a.engine.receive_answer(answer).await.unwrap();
    assert_eq!(a.engine.state(), NegotiationState::Connected);
    assert_eq!(a.engine.remote_description().unwrap().sdp, "answer-b-1");
    assert_eq!(b.engine.remote_description().unwrap().sdp, "offer-a-1");
}

#[tokio::test]
async fn second_offer_is_a_state_error() {
    let (mut a, _b) = pair().await;
    a.engine.create_offer().await.unwrap();

    let err = a.engine.create_offer().await.unwrap_err();
    assert!(matches!(
        err,
        CallError::ConnectionState {
            state: NegotiationState::HaveLocalOffer,
            ..
        }
    ));
    assert_eq!(a.engine.offers_sent(), 1);
    assert_eq!(a.connection.count("create_offer"), 1);
}

#[tokio::test]
async fn failed_offer_closes_the_engine() {
    let (mut a, mut b) = pair().await;
    a.connection.fail_offer.store(true, Ordering::SeqCst);

    let err = a.engine.create_offer().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(a.engine.state(), NegotiationState::Closed);
    assert!(a.connection.is_closed());
    assert!(b.inbox.try_recv().is_err());
}

#[tokio::test]
async fn answer_outside_local_offer_is_ignored() {
    let (mut a, _b) = pair().await;

    let err = a
        .engine
        .receive_answer(SessionDescription::answer("stray"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ProtocolViolation(_)));
    assert_eq!(a.engine.state(), NegotiationState::New);
    assert_eq!(a.connection.count("set_remote"), 0);
}

#[tokio::test]
async fn offer_after_connected_is_a_protocol_violation() {
    let (mut a, mut b) = pair().await;
    let offer = a.engine.create_offer().await.unwrap();
    b.engine.receive_offer(offer).await.unwrap();

    let err = b
        .engine
        .receive_offer(SessionDescription::offer("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ProtocolViolation(_)));
    assert_eq!(b.engine.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn glare_converges_with_one_abandoned_offer() {
    let (mut a, mut b) = pair().await;

    let offer_a = a.engine.create_offer().await.unwrap();
    let offer_b = b.engine.create_offer().await.unwrap();

    let outcome_a = a.engine.receive_offer(offer_b).await.unwrap();
    let outcome_b = b.engine.receive_offer(offer_a).await.unwrap();

    let answer = match (&outcome_a, &outcome_b) {
        (
            OfferOutcome::Answered {
                answer,
                abandoned_local_offer: true,
            },
            OfferOutcome::KeptLocalOffer,
        ) => answer.clone(),
        other => panic!("glare did not resolve to a single winner: {:?}", other),
    };
    assert_eq!(a.connection.count("rollback"), 1);
    assert_eq!(b.connection.count("rollback"), 0);

    b.engine.receive_answer(answer).await.unwrap();
    assert_eq!(a.engine.state(), NegotiationState::Connected);
    assert_eq!(b.engine.state(), NegotiationState::Connected);
    assert_eq!(a.engine.abandoned_offers() + b.engine.abandoned_offers(), 1);
}

#[tokio::test]
async fn always_yield_accepts_incoming_offer() {
    let relay = MemoryRelay::new();
    let mut b = side(&relay, "b", GlarePolicy::AlwaysYield).await;
    b.engine.create_offer().await.unwrap();

    let outcome = b
        .engine
        .receive_offer(SessionDescription::offer("offer-a-1"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        OfferOutcome::Answered {
            abandoned_local_offer: true,
            ..
        }
    ));
    assert_eq!(b.engine.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn early_candidates_are_applied_in_arrival_order() {
    let (mut a, mut b) = pair().await;
    let names = ["c3", "c1", "c2", "c1"];
    for name in names {
        let disposition = b.engine.receive_candidate(IceCandidate::new(name)).await;
        assert_eq!(disposition, CandidateDisposition::Buffered);
    }
    assert_eq!(b.engine.pending_candidates(), 4);
    assert!(b.connection.applied().is_empty());

    let offer = a.engine.create_offer().await.unwrap();
    b.engine.receive_offer(offer).await.unwrap();

    assert_eq!(b.connection.applied(), names);
    assert_eq!(b.engine.pending_candidates(), 0);

    // после установки remote description кандидаты применяются сразу
    let disposition = b.engine.receive_candidate(IceCandidate::new("c4")).await;
    assert_eq!(disposition, CandidateDisposition::Applied);
}

#[tokio::test]
async fn candidates_are_flushed_before_the_answer_is_created() {
    let (mut a, mut b) = pair().await;
    b.engine.receive_candidate(IceCandidate::new("early")).await;

    let offer = a.engine.create_offer().await.unwrap();
    b.engine.receive_offer(offer).await.unwrap();

    let ops = b.connection.ops();
    let flushed = ops.iter().position(|op| op == "add_candidate:early").unwrap();
    let answered = ops.iter().position(|op| op == "create_answer").unwrap();
    assert!(flushed < answered);
}

#[tokio::test]
async fn rejected_candidate_is_absorbed() {
    let (mut a, mut b) = pair().await;
    b.connection.reject_candidate("bad");
    for name in ["good-1", "bad", "good-2"] {
        a.engine.receive_candidate(IceCandidate::new(name)).await;
    }
    let offer = a.engine.create_offer().await.unwrap();
    let outcome = b.engine.receive_offer(offer).await.unwrap();
    let OfferOutcome::Answered { answer, .. } = outcome else {
        panic!("expected an answer");
    };
    a.engine.receive_answer(answer).await.unwrap();
    assert_eq!(a.connection.applied(), ["good-1", "bad", "good-2"]);

    b.engine.receive_candidate(IceCandidate::new("good-3")).await;
    let disposition = b.engine.receive_candidate(IceCandidate::new("bad")).await;
    assert_eq!(disposition, CandidateDisposition::Rejected);
    assert_eq!(b.engine.state(), NegotiationState::Connected);
    assert_eq!(b.connection.applied(), ["good-3"]);
}

#[tokio::test]
async fn closed_engine_drops_candidates_and_is_idempotent() {
    let (mut a, mut b) = pair().await;
    a.engine.close().await;
    a.engine.close().await;
    assert_eq!(a.engine.state(), NegotiationState::Closed);
    assert_eq!(a.connection.count("close"), 1);

    let disposition = a.engine.receive_candidate(IceCandidate::new("late")).await;
    assert_eq!(disposition, CandidateDisposition::Dropped);

    let sent = a
        .engine
        .local_candidate_generated(IceCandidate::new("local"))
        .await
        .unwrap();
    assert!(!sent);
    assert!(b.inbox.try_recv().is_err());
}

#[tokio::test]
async fn local_candidates_are_trickled() {
    let (mut a, mut b) = pair().await;
    let sent = a
        .engine
        .local_candidate_generated(IceCandidate::new("candidate:host"))
        .await
        .unwrap();
    assert!(sent);
    assert_eq!(
        b.inbox.try_recv().unwrap(),
        SignalingMessage::Candidate(IceCandidate::new("candidate:host"))
    );
}

#[tokio::test]
async fn bad_remote_description_is_fatal() {
    let (mut a, mut b) = pair().await;
    b.connection.fail_remote.store(true, Ordering::SeqCst);
    let offer = a.engine.create_offer().await.unwrap();

    let err = b.engine.receive_offer(offer).await.unwrap_err();
    assert!(matches!(err, CallError::NegotiationFailure(_)));
    assert_eq!(b.engine.state(), NegotiationState::Closed);
}

#[tokio::test]
async fn offer_refused_by_a_full_room_is_withdrawn() {
    let relay = MemoryRelay::new();
    let _a = side(&relay, "a", GlarePolicy::default()).await;
    let _b = side(&relay, "b", GlarePolicy::default()).await;
    let mut c = side(&relay, "c", GlarePolicy::default()).await;

    let err = c.engine.create_offer().await.unwrap_err();
    assert!(matches!(err, CallError::CapacityRejected(_)));
    assert!(!err.is_fatal());
    assert_eq!(c.engine.state(), NegotiationState::New);
    assert_eq!(c.engine.offers_sent(), 0);
    assert!(c.engine.local_description().is_none());
    assert_eq!(c.connection.count("rollback"), 1);
    assert!(!c.connection.is_closed());
}

#[tokio::test]
async fn answer_for_another_session_is_rejected() {
    let (mut a, mut b) = pair().await;
    let offer = a.engine.create_offer().await.unwrap();
    assert_eq!(offer.session.as_deref(), Some(a.engine.session_id()));

    let err = a
        .engine
        .receive_answer(SessionDescription::answer("answer-old").tagged("gone"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ProtocolViolation(_)));
    assert_eq!(a.engine.state(), NegotiationState::HaveLocalOffer);
    assert_eq!(a.connection.count("set_remote"), 0);

    // the real answer still lands
    b.engine.receive_offer(offer).await.unwrap();
    let answer = match a.inbox.try_recv().unwrap() {
        SignalingMessage::Answer(answer) => answer,
        other => panic!("unexpected message {:?}", other),
    };
    assert_eq!(answer.session.as_deref(), Some(a.engine.session_id()));
    a.engine.receive_answer(answer).await.unwrap();
    assert_eq!(a.engine.state(), NegotiationState::Connected);
}
