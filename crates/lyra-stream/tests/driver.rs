use std::time::Duration;

use lyra_events::{Event, EventBus, SegmentEvent, StreamEvent, StreamState};
use lyra_net::NetError;
use lyra_stream::{
    MemoryMediaSource, MemorySinkHandle, PlaybackHandle, ReadyState, SegmentRetryPolicy,
    StreamConfig, StreamDriver, StreamError, StreamOutcome, StreamResult,
};
use lyra_test_utils::{RecordingSurface, ScriptedNet, init_tracing, test_asset};
use rstest::{fixture, rstest};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use url::Url;

const ASSET_LEN: usize = 1000;

struct Session {
    net: ScriptedNet,
    sink: MemorySinkHandle,
    surface: RecordingSurface,
    playback: PlaybackHandle,
    events: broadcast::Receiver<Event>,
    task: JoinHandle<StreamResult<StreamOutcome>>,
}

#[fixture]
fn net() -> ScriptedNet {
    init_tracing();
    ScriptedNet::new(test_asset(ASSET_LEN))
}

fn config() -> StreamConfig {
    StreamConfig::new(Url::parse("http://cdn.test/movie.mp4").unwrap())
        .with_events(EventBus::new(512))
}

fn start(net: ScriptedNet, config: StreamConfig, media: MemoryMediaSource) -> Session {
    let sink = media.handle();
    let surface = RecordingSurface::new();
    let (driver, playback) =
        StreamDriver::new(config, net.clone(), media, surface.clone()).unwrap();
    let events = driver.events().subscribe();
    Session {
        net,
        sink,
        surface,
        playback,
        events,
        task: driver.spawn(),
    }
}

async fn wait_for(events: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}

async fn wait_appended(events: &mut broadcast::Receiver<Event>, index: usize) {
    wait_for(events, |e| {
        matches!(e, Event::Segment(SegmentEvent::Appended { index: i, .. }) if *i == index)
    })
    .await;
}

async fn wait_state(events: &mut broadcast::Receiver<Event>, state: StreamState) {
    wait_for(events, |e| {
        matches!(e, Event::Stream(StreamEvent::StateChanged { to, .. }) if *to == state)
    })
    .await;
}

/// Ready with 50 s duration (10 s per segment), first position at 0.
async fn start_streaming(session: &mut Session) {
    wait_appended(&mut session.events, 0).await;
    session.playback.ready(50.0).await.unwrap();
    wait_state(&mut session.events, StreamState::Ready).await;
    session.playback.time_update(0.0).await.unwrap();
    wait_state(&mut session.events, StreamState::Streaming).await;
}

#[rstest]
#[tokio::test]
async fn plays_through_to_end_of_stream(net: ScriptedNet) {
    let mut session = start(net, config(), MemoryMediaSource::new());
    start_streaming(&mut session).await;

    for index in 1..5 {
        let near_end = (index - 1) as f64 * 10.0 + 8.0;
        session.playback.time_update(near_end).await.unwrap();
        wait_appended(&mut session.events, index).await;
    }
    session.playback.time_update(45.0).await.unwrap();

    let outcome = session.task.await.unwrap().unwrap();
    assert_eq!(outcome, StreamOutcome::Ended);
    assert_eq!(session.sink.contents(), *session.net.body());
    assert_eq!(session.sink.buffered(), vec![0..ASSET_LEN as u64]);
    assert_eq!(session.sink.ready_state(), ReadyState::Ended);
    assert_eq!(session.sink.overlapping_appends(), 0);
    assert_eq!(session.surface.plays(), 1);
    for start in [0, 200, 400, 600, 800] {
        assert_eq!(session.net.range_requests(start), 1, "segment at {start}");
    }
}

#[rstest]
#[tokio::test]
async fn ready_before_first_append_is_honored(net: ScriptedNet) {
    net.delay_range(0, Duration::from_millis(50));
    let mut session = start(net, config(), MemoryMediaSource::new());

    session.playback.ready(50.0).await.unwrap();
    wait_state(&mut session.events, StreamState::Ready).await;

    assert_eq!(session.surface.plays(), 1);
    session.task.abort();
}

#[rstest]
#[tokio::test]
async fn failed_segment_is_refetched_on_next_update(net: ScriptedNet) {
    net.fail_range(400, 500, 1);
    let mut session = start(net, config(), MemoryMediaSource::new());
    start_streaming(&mut session).await;

    session.playback.time_update(20.0).await.unwrap();
    let failed = wait_for(&mut session.events, |e| {
        matches!(e, Event::Segment(SegmentEvent::FetchFailed { index: 2, .. }))
    })
    .await;
    session.playback.time_update(21.0).await.unwrap();
    wait_appended(&mut session.events, 2).await;

    assert!(matches!(
        failed,
        Event::Segment(SegmentEvent::FetchFailed { retry_in: Some(d), .. }) if d.is_zero()
    ));
    assert_eq!(session.net.range_requests(400), 2);
    session.task.abort();
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn first_segment_retries_with_backoff(net: ScriptedNet) {
    net.fail_range(0, 503, 3);
    let mut session = start(net, config(), MemoryMediaSource::new());

    wait_appended(&mut session.events, 0).await;

    assert_eq!(session.net.range_requests(0), 4);
    session.task.abort();
}

#[rstest]
#[tokio::test]
async fn first_segment_exhaustion_is_fatal(net: ScriptedNet) {
    net.fail_range(0, 404, 10);
    let config = config().with_retry(SegmentRetryPolicy::immediate().with_max_attempts(3));
    let session = start(net, config, MemoryMediaSource::new());

    let result = session.task.await.unwrap();

    assert!(matches!(
        result,
        Err(StreamError::RangeFetch { status: Some(404), .. })
    ));
    assert_eq!(session.net.range_requests(0), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn appends_follow_fetch_completion_order(net: ScriptedNet) {
    net.delay_range(800, Duration::from_millis(40));
    net.delay_range(200, Duration::from_millis(30));
    net.delay_range(400, Duration::from_millis(20));
    net.delay_range(600, Duration::from_millis(10));
    let mut session = start(net, config(), MemoryMediaSource::new());
    start_streaming(&mut session).await;

    // Seeking to the last segment fetches everything; once it is all in,
    // the session ends on its own.
    session.playback.seeking(40.0).await.unwrap();

    assert_eq!(session.task.await.unwrap().unwrap(), StreamOutcome::Ended);
    assert_eq!(session.sink.commit_order(), vec![0, 600, 400, 200, 800]);
    assert_eq!(session.sink.overlapping_appends(), 0);
}

#[rstest]
#[tokio::test]
async fn seek_back_requests_nothing_twice(net: ScriptedNet) {
    let mut session = start(net, config(), MemoryMediaSource::new());
    start_streaming(&mut session).await;

    session.playback.seeking(30.0).await.unwrap();
    wait_for(&mut session.events, |e| {
        matches!(e, Event::Segment(SegmentEvent::Appended { appended: 5, .. }))
    })
    .await;
    session.playback.seeking(0.0).await.unwrap();
    session.playback.time_update(49.0).await.unwrap();

    assert_eq!(session.task.await.unwrap().unwrap(), StreamOutcome::Ended);
    for start in [0, 200, 400, 600, 800] {
        assert_eq!(session.net.range_requests(start), 1);
    }
}

#[rstest]
#[tokio::test]
async fn cancel_stops_the_session(net: ScriptedNet) {
    let cancel = CancellationToken::new();
    let mut session = start(net, config().with_cancel(cancel.clone()), MemoryMediaSource::new());
    wait_appended(&mut session.events, 0).await;

    cancel.cancel();

    assert_eq!(session.task.await.unwrap().unwrap(), StreamOutcome::Cancelled);
}

#[rstest]
#[tokio::test]
async fn dropping_playback_handle_detaches(net: ScriptedNet) {
    let mut session = start(net, config(), MemoryMediaSource::new());
    wait_appended(&mut session.events, 0).await;

    drop(session.playback);

    assert_eq!(session.task.await.unwrap().unwrap(), StreamOutcome::Detached);
}

#[rstest]
#[tokio::test]
async fn missing_length_is_fatal(net: ScriptedNet) {
    net.hide_length();
    let session = start(net, config(), MemoryMediaSource::new());

    let result = session.task.await.unwrap();

    assert!(matches!(result, Err(StreamError::LengthUnavailable(_))));
}

#[rstest]
#[tokio::test]
async fn head_failure_is_fatal(net: ScriptedNet) {
    net.fail_head(NetError::timeout());
    let session = start(net, config(), MemoryMediaSource::new());

    assert!(matches!(
        session.task.await.unwrap(),
        Err(StreamError::LengthUnavailable(_))
    ));
}

#[rstest]
#[tokio::test]
async fn unsupported_codec_is_fatal(net: ScriptedNet) {
    let session = start(
        net,
        config().with_codec("video/x-flv"),
        MemoryMediaSource::new(),
    );

    assert!(matches!(
        session.task.await.unwrap(),
        Err(StreamError::UnsupportedMedia(_))
    ));
    assert!(session.net.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn detached_sink_ends_session_with_error(net: ScriptedNet) {
    let mut session = start(net, config(), MemoryMediaSource::new());
    start_streaming(&mut session).await;

    session.sink.detach();

    assert_eq!(
        session.task.await.unwrap(),
        Err(StreamError::SinkUnavailable)
    );
}

#[rstest]
#[case::zero_segments(config().with_segment_count(0))]
#[case::bad_threshold(config().with_near_end_threshold(1.5))]
fn invalid_config_is_rejected(net: ScriptedNet, #[case] config: StreamConfig) {
    let result = StreamDriver::new(config, net, MemoryMediaSource::new(), RecordingSurface::new());
    assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
}
