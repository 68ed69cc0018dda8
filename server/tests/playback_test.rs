mod common;

use ::common::PacketKind;
use server::events::{event_channel, ReplayEvent};
use server::playback::{PlaybackEngine, PlaybackStatus};
use std::time::Duration;
use tokio::time::advance;
use uuid::Uuid;

use crate::common::{chat, destroy, spawn, test_metadata, RecordingSink};

fn engine_with(packets: Vec<::common::PacketRecord>, duration_ms: i64) -> PlaybackEngine {
    let (events, _) = event_channel();
    PlaybackEngine::new(packets, test_metadata(duration_ms), 20, events)
}

fn attach(engine: &mut PlaybackEngine) -> RecordingSink {
    let sink = RecordingSink::new();
    engine.attach_viewer("viewer".into(), Uuid::new_v4(), Box::new(sink.clone()));
    sink.clear();
    sink
}

#[tokio::test(start_paused = true)]
async fn emits_due_packets_in_real_time() {
    let mut engine = engine_with(vec![chat(0, "a"), chat(100, "b"), chat(200, "c")], 1_000);
    let sink = attach(&mut engine);

    engine.start_playback();
    engine.tick();
    assert_eq!(sink.frame_names(), vec!["chat"]);

    advance(Duration::from_millis(150)).await;
    engine.tick();
    assert_eq!(sink.frame_names(), vec!["chat", "chat"]);

    advance(Duration::from_millis(100)).await;
    engine.tick();
    assert_eq!(sink.frame_names(), vec!["chat", "chat", "chat"]);
}

#[tokio::test(start_paused = true)]
async fn pacing_scales_with_speed() {
    let packets = (0..5).map(|i| chat(i * 100, "x")).collect();
    let mut engine = engine_with(packets, 1_000);
    let sink = attach(&mut engine);

    engine.set_playback_speed(2.0);
    engine.start_playback();
    advance(Duration::from_millis(100)).await;
    engine.tick();

    // 100 wall-ms at 2x is 200 virtual ms: packets at 0, 100 and 200 are due
    assert_eq!(sink.frame_names().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn speed_is_clamped() {
    let mut engine = engine_with(vec![chat(0, "a")], 1_000);

    engine.set_playback_speed(0.0);
    assert_eq!(engine.status().speed, 0.1);

    engine.set_playback_speed(100.0);
    assert_eq!(engine.status().speed, 10.0);
}

#[tokio::test(start_paused = true)]
async fn speed_change_keeps_current_time() {
    let mut engine = engine_with(vec![chat(0, "a")], 10_000);
    engine.start_playback();
    advance(Duration::from_millis(100)).await;
    assert_eq!(engine.status().current_time_ms, 100);

    engine.set_playback_speed(5.0);
    assert_eq!(engine.status().current_time_ms, 100);
    assert!(engine.status().playing);
}

#[tokio::test(start_paused = true)]
async fn seek_rebuilds_entity_state() {
    // spawn 42, destroy it, then spawn 99 later
    let packets = vec![
        spawn(100, PacketKind::SpawnEntityLiving, 42),
        destroy(500, &[42]),
        spawn(900, PacketKind::SpawnEntityLiving, 99),
    ];
    let mut engine = engine_with(packets, 2_000);

    engine.seek_to_time(600);
    assert!(engine.projection().entity_ids().is_empty());
    assert_eq!(engine.status().current_time_ms, 600);

    engine.seek_to_time(1_000);
    assert_eq!(engine.projection().entity_ids().len(), 1);
    assert!(engine.projection().entity_ids().contains(&99));
}

#[tokio::test(start_paused = true)]
async fn seek_is_clamped_to_duration() {
    let mut engine = engine_with(vec![chat(0, "a"), chat(500, "b")], 2_000);
    engine.seek_to_time(99_999);
    assert_eq!(engine.status().current_time_ms, 2_000);
    assert_eq!(engine.status().cursor, 2);
}

#[tokio::test(start_paused = true)]
async fn seek_is_idempotent() {
    let packets = vec![
        spawn(100, PacketKind::SpawnEntityLiving, 42),
        chat(300, "x"),
        spawn(900, PacketKind::SpawnEntityLiving, 99),
    ];
    let mut engine = engine_with(packets, 2_000);

    engine.seek_to_time(400);
    let first: PlaybackStatus = engine.status();
    let first_entities = engine.projection().entity_ids().clone();

    engine.seek_to_time(400);
    let second = engine.status();
    assert_eq!(second.cursor, first.cursor);
    assert_eq!(second.current_time_ms, first.current_time_ms);
    assert_eq!(engine.projection().entity_ids(), &first_entities);
}

#[tokio::test(start_paused = true)]
async fn seek_preserves_playing_polarity() {
    let mut engine = engine_with(vec![chat(0, "a"), chat(800, "b")], 2_000);

    engine.seek_to_time(100);
    assert!(!engine.status().playing);

    engine.start_playback();
    engine.seek_to_time(100);
    assert!(engine.status().playing);
}

#[tokio::test(start_paused = true)]
async fn recent_ring_stays_bounded_through_seek() {
    let packets = (0..1_500).map(|i| chat(i, "x")).collect();
    let mut engine = engine_with(packets, 2_000);
    engine.seek_to_time(2_000);
    assert_eq!(engine.projection().recent_len(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn playback_end_fires_exactly_once() {
    let (events, mut event_rx) = event_channel();
    let mut engine = PlaybackEngine::new(
        vec![chat(0, "a"), chat(500, "b")],
        test_metadata(500),
        20,
        events,
    );

    engine.start_playback();
    advance(Duration::from_millis(600)).await;
    engine.tick();

    let status = engine.status();
    assert_eq!(status.cursor, 2);
    assert!(!status.playing);

    // extra ticks after the end must not fire the event again
    advance(Duration::from_millis(100)).await;
    engine.tick();
    engine.tick();

    let mut ended = 0;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, ReplayEvent::PlaybackEnded) {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}

#[tokio::test(start_paused = true)]
async fn seek_rearms_the_end_event() {
    let (events, mut event_rx) = event_channel();
    let mut engine = PlaybackEngine::new(vec![chat(0, "a")], test_metadata(100), 20, events);

    engine.start_playback();
    advance(Duration::from_millis(200)).await;
    engine.tick();

    engine.seek_to_time(0);
    engine.start_playback();
    advance(Duration::from_millis(200)).await;
    engine.tick();

    let mut ended = 0;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, ReplayEvent::PlaybackEnded) {
            ended += 1;
        }
    }
    assert_eq!(ended, 2);
}

#[tokio::test(start_paused = true)]
async fn progress_events_fire_every_hundred_packets() {
    let (events, mut event_rx) = event_channel();
    let packets = (0..250).map(|i| chat(i, "x")).collect();
    let mut engine = PlaybackEngine::new(packets, test_metadata(1_000), 20, events);

    engine.start_playback();
    advance(Duration::from_millis(300)).await;
    engine.tick();

    let mut cursors = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        if let ReplayEvent::PlaybackProgress { cursor, total, .. } = event {
            assert_eq!(total, 250);
            cursors.push(cursor);
        }
    }
    assert_eq!(cursors, vec![100, 200]);
}

#[tokio::test(start_paused = true)]
async fn all_viewers_receive_live_packets() {
    let mut engine = engine_with(vec![chat(0, "a"), chat(100, "b")], 1_000);
    let first = attach(&mut engine);
    let second = attach(&mut engine);

    engine.start_playback();
    advance(Duration::from_millis(150)).await;
    engine.tick();

    assert_eq!(first.frame_names(), vec!["chat", "chat"]);
    assert_eq!(second.frame_names(), vec!["chat", "chat"]);
}
