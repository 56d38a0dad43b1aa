mod common;

use common::{offer, Harness, MockCapture, MockControl};
use janus_room::peer::{IceConnectionState, MediaTrack, RemoteStream, TrackKind};
use janus_room::{ClientConfig, ClientEvent, EventSink, FailurePolicy, HandleId, Role};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn accepting_twice_replaces_the_entry_without_disposing() {
    let mut h = Harness::new(FailurePolicy::Shared);
    let hid = HandleId(42);
    for sdp in [offer(1), offer(2)] {
        h.client.accept_responder_offer(hid, sdp).unwrap();
        let answers = h
            .drain()
            .await
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::AnswerReady { .. }))
            .count();
        assert_eq!(answers, 1);
    }

    let natives = h.control.sessions_for(hid);
    assert_eq!(natives.len(), 2);
    assert_eq!(natives[0].dispose_count(), 0, "superseded session is left alive");
    assert_eq!(h.client.handles().await.unwrap(), vec![hid]);

    // the superseded session's observer no longer reaches the registry
    natives[0]
        .observer
        .on_ice_connection_change(IceConnectionState::Connected);
    assert!(h.drain().await.is_empty());
    natives[1]
        .observer
        .on_ice_connection_change(IceConnectionState::Connected);
    assert_eq!(h.drain().await.len(), 1);
}

#[tokio::test]
async fn unknown_handles_are_ignored() {
    let mut h = Harness::new(FailurePolicy::Shared);
    let ghost = HandleId(404);
    h.client.create_offer(ghost).unwrap();
    h.client.set_remote_description(ghost, offer(404)).unwrap();
    h.client
        .add_remote_candidate(ghost, common::host_candidate(9))
        .unwrap();
    h.client.poll_stats(ghost, Duration::from_millis(5), true).unwrap();

    assert!(h.drain().await.is_empty());
    assert!(h.client.session_snapshot(ghost).await.unwrap().is_none());
    assert!(h.client.handles().await.unwrap().is_empty());
    assert!(h.control.sessions.lock().is_empty());
}

#[tokio::test]
async fn operations_before_initialize_are_no_ops() {
    let control = MockControl::new();
    let h = Harness::uninitialized(control.clone());
    h.publish(HandleId(1), Arc::new(MockCapture::default()));
    h.client.accept_responder_offer(HandleId(2), offer(2)).unwrap();
    h.client.create_offer(HandleId(1)).unwrap();
    h.settle().await;

    assert!(h.client.handles().await.unwrap().is_empty());
    assert_eq!(control.engines_created.load(Ordering::SeqCst), 0);
    assert!(control.sessions.lock().is_empty());
}

#[tokio::test]
async fn close_all_disposes_every_session_once() {
    let mut h = Harness::new(FailurePolicy::Shared);
    let capture = Arc::new(MockCapture::default());
    h.publish(HandleId(1), capture.clone());
    h.client.create_offer(HandleId(1)).unwrap();
    h.client.accept_responder_offer(HandleId(2), offer(2)).unwrap();
    h.client.accept_responder_offer(HandleId(3), offer(3)).unwrap();
    h.client.poll_stats(HandleId(2), Duration::from_millis(5), true).unwrap();
    h.drain().await;

    h.client.close_and_wait().await.unwrap();
    let events = h.drain().await;
    let closed = events
        .iter()
        .filter(|e| matches!(e, ClientEvent::Closed))
        .count();
    assert_eq!(closed, 1);
    assert!(matches!(events.last(), Some(ClientEvent::Closed)));

    for id in 1..=3 {
        for native in h.control.sessions_for(HandleId(id)) {
            assert_eq!(native.dispose_count(), 1, "handle {id}");
        }
    }
    assert_eq!(h.control.engine_disposed.load(Ordering::SeqCst), 1);
    assert_eq!(capture.stopped.load(Ordering::SeqCst), 1);
    assert!(h.client.handles().await.unwrap().is_empty());

    // second close is guarded
    h.client.close_all().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.drain().await.is_empty());
    assert_eq!(h.control.engine_disposed.load(Ordering::SeqCst), 1);
    for native in h.control.sessions.lock().iter() {
        assert_eq!(native.dispose_count(), 1);
    }
}

#[tokio::test]
async fn initialize_after_close_starts_a_new_call() {
    let mut h = Harness::new(FailurePolicy::Shared);
    h.client.accept_responder_offer(HandleId(5), offer(5)).unwrap();
    h.client.close_and_wait().await.unwrap();
    h.drain().await;

    let (sink, events) = EventSink::channel();
    h.client
        .initialize_engine(ClientConfig::default(), sink)
        .unwrap();
    h.events = events;
    h.client.accept_responder_offer(HandleId(6), offer(6)).unwrap();
    assert!(matches!(
        h.next_event().await,
        ClientEvent::AnswerReady { handle, .. } if handle == HandleId(6)
    ));
    assert_eq!(h.control.engines_created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn remote_video_is_rendered_to_the_publisher_sinks() {
    let mut h = Harness::new(FailurePolicy::Shared);
    h.publish(HandleId(1), Arc::new(MockCapture::default()));
    h.client.accept_responder_offer(HandleId(2), offer(2)).unwrap();
    h.drain().await;

    let video = common::MockTrack::new("remote-v", TrackKind::Video);
    let observer = h.control.latest(HandleId(2)).observer.clone();
    observer.on_add_stream(RemoteStream {
        id: "janus".into(),
        audio_tracks: vec![],
        video_tracks: vec![video.clone() as Arc<dyn MediaTrack>],
    });
    let events = h.drain().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::RemoteRender { handle, track } => {
            assert_eq!(*handle, HandleId(2));
            assert_eq!(track.id(), "remote-v");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(video.is_enabled());
    assert_eq!(video.sinks.load(Ordering::SeqCst), 2);
    let snapshot = h.client.session_snapshot(HandleId(2)).await.unwrap().unwrap();
    assert!(snapshot.has_remote_video);
    assert_eq!(snapshot.role, Role::Responder);

    h.client.set_video_enabled(false).unwrap();
    h.settle().await;
    assert!(!video.is_enabled());

    observer.on_remove_stream("janus");
    h.settle().await;
    let snapshot = h.client.session_snapshot(HandleId(2)).await.unwrap().unwrap();
    assert!(!snapshot.has_remote_video);
}

#[tokio::test]
async fn streams_with_several_video_tracks_are_not_rendered() {
    let mut h = Harness::new(FailurePolicy::Shared);
    h.client.accept_responder_offer(HandleId(2), offer(2)).unwrap();
    h.drain().await;

    h.control.latest(HandleId(2)).observer.on_add_stream(RemoteStream {
        id: "multi".into(),
        audio_tracks: vec![],
        video_tracks: vec![
            common::MockTrack::new("a", TrackKind::Video) as Arc<dyn MediaTrack>,
            common::MockTrack::new("b", TrackKind::Video) as Arc<dyn MediaTrack>,
        ],
    });
    assert!(h.drain().await.is_empty());
}

#[tokio::test]
async fn independent_clients_do_not_share_state() {
    let mut a = Harness::new(FailurePolicy::Shared);
    let mut b = Harness::new(FailurePolicy::Shared);
    a.client.accept_responder_offer(HandleId(1), offer(1)).unwrap();
    a.drain().await;
    assert!(b.drain().await.is_empty());
    assert!(b.client.handles().await.unwrap().is_empty());
    assert_eq!(a.client.handles().await.unwrap(), vec![HandleId(1)]);
}

#[tokio::test]
async fn reinitializing_disposes_live_sessions_and_the_engine() {
    let mut h = Harness::new(FailurePolicy::Shared);
    let capture = Arc::new(MockCapture::default());
    h.publish(HandleId(1), capture.clone());
    h.client.accept_responder_offer(HandleId(2), offer(2)).unwrap();
    h.drain().await;

    let (sink, events) = EventSink::channel();
    h.client.initialize_engine(ClientConfig::default(), sink).unwrap();
    h.events = events;
    h.settle().await;

    assert!(h.client.handles().await.unwrap().is_empty());
    assert_eq!(h.control.latest(HandleId(1)).dispose_count(), 1);
    assert_eq!(h.control.latest(HandleId(2)).dispose_count(), 1);
    assert_eq!(capture.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(h.control.engine_disposed.load(Ordering::SeqCst), 1);
    assert_eq!(h.control.engines_created.load(Ordering::SeqCst), 2);
    // no Closed event: this is a reset, not a teardown
    assert!(h.drain().await.is_empty());
}

#[tokio::test]
async fn zero_stats_period_is_ignored() {
    let mut h = Harness::new(FailurePolicy::Shared);
    h.client.accept_responder_offer(HandleId(3), offer(3)).unwrap();
    h.drain().await;

    h.client.poll_stats(HandleId(3), Duration::ZERO, true).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.drain().await.is_empty());
}
