//! Async task that owns a [`StreamController`] and performs its I/O.

use bytes::Bytes;
use futures::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use lyra_events::{EventBus, StreamState};
use lyra_net::{DefaultNet, Net, NetBuilder};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::StreamConfig,
    controller::{Command, StreamController},
    error::{StreamError, StreamResult},
    fetch::RangeFetcher,
    position::{PlaybackEvent, PlaybackSurface},
    sink::{MediaSource, SinkSignal},
};

type FetchFuture = BoxFuture<'static, (usize, StreamResult<Bytes>)>;

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every segment appended and end-of-stream signalled.
    Ended,
    /// The cancellation token fired.
    Cancelled,
    /// Every [`PlaybackHandle`] was dropped.
    Detached,
}

/// Feeds playback surface events into a running [`StreamDriver`].
#[derive(Clone, Debug)]
pub struct PlaybackHandle {
    tx: mpsc::Sender<PlaybackEvent>,
}

impl PlaybackHandle {
    /// # Errors
    ///
    /// [`StreamError::ChannelClosed`] once the driver has stopped.
    pub async fn send(&self, event: PlaybackEvent) -> StreamResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| StreamError::ChannelClosed)
    }

    /// Non-blocking variant of [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// [`StreamError::ChannelClosed`] if the driver stopped or the channel is
    /// full.
    pub fn try_send(&self, event: PlaybackEvent) -> StreamResult<()> {
        self.tx
            .try_send(event)
            .map_err(|_| StreamError::ChannelClosed)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn ready(&self, duration: f64) -> StreamResult<()> {
        self.send(PlaybackEvent::Ready { duration }).await
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn time_update(&self, position: f64) -> StreamResult<()> {
        self.send(PlaybackEvent::TimeUpdate { position }).await
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn seeking(&self, position: f64) -> StreamResult<()> {
        self.send(PlaybackEvent::Seeking { position }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

enum Step {
    Cancelled,
    Sink(Option<SinkSignal>),
    Fetched(usize, StreamResult<Bytes>),
    Playback(Option<PlaybackEvent>),
    Wake,
}

/// Single task driving one session.
///
/// Multiplexes cancellation, sink signals, fetch completions, playback
/// events, and retry timers; every input goes through the controller and
/// the resulting commands are executed here.
pub struct StreamDriver<N, M: MediaSource, P> {
    controller: StreamController<M, P>,
    fetcher: RangeFetcher<N>,
    playback_rx: mpsc::Receiver<PlaybackEvent>,
    cancel: CancellationToken,
}

impl<M, P> StreamDriver<DefaultNet, M, P>
where
    M: MediaSource,
    P: PlaybackSurface,
{
    /// Driver over the default HTTP stack built from `config.net`.
    ///
    /// # Errors
    ///
    /// Invalid configuration or HTTP client construction failure.
    pub fn http(config: StreamConfig, media: M, surface: P) -> StreamResult<(Self, PlaybackHandle)> {
        let net = NetBuilder::from_options(config.net.clone())
            .build()
            .map_err(|e| StreamError::InvalidConfig(e.to_string()))?;
        Self::new(config, net, media, surface)
    }
}

impl<N, M, P> StreamDriver<N, M, P>
where
    N: Net + 'static,
    M: MediaSource,
    P: PlaybackSurface,
{
    /// # Errors
    ///
    /// [`StreamError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: StreamConfig,
        net: N,
        media: M,
        surface: P,
    ) -> StreamResult<(Self, PlaybackHandle)> {
        config.validate()?;

        let bus = config
            .events
            .clone()
            .unwrap_or_else(|| EventBus::new(config.events_channel_capacity));
        let cancel = config.cancel.clone().unwrap_or_default();
        let (tx, playback_rx) = mpsc::channel(config.playback_channel_capacity);
        let fetcher =
            RangeFetcher::new(net, config.url.clone()).with_headers(config.headers.clone());
        let controller = StreamController::new(&config, media, surface, bus);

        Ok((
            Self {
                controller,
                fetcher,
                playback_rx,
                cancel,
            },
            PlaybackHandle { tx },
        ))
    }

    pub fn events(&self) -> &EventBus {
        self.controller.events()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a new tokio task.
    pub fn spawn(self) -> JoinHandle<StreamResult<StreamOutcome>> {
        tokio::spawn(self.run())
    }

    /// Drive the session to completion.
    ///
    /// # Errors
    ///
    /// Setup failures and a vanished sink. Per-segment failures are retried
    /// and never surface here.
    pub async fn run(mut self) -> StreamResult<StreamOutcome> {
        debug!(url = %self.fetcher.url(), "stream driver started");
        let mut signals = self.controller.open()?;

        let fetcher = self.fetcher.clone();
        let length = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("cancelled during length discovery");
                return Ok(StreamOutcome::Cancelled);
            }
            length = fetcher.discover_length() => length,
        };

        let mut fetches: FuturesUnordered<FetchFuture> = FuturesUnordered::new();
        let mut wake: Option<Instant> = None;
        let commands = self.controller.on_length(length)?;
        self.apply(commands, &mut fetches, &mut wake);

        loop {
            if self.controller.state() == StreamState::Ended {
                info!(total_fetched = self.controller.total_fetched(), "stream driver finished");
                return Ok(StreamOutcome::Ended);
            }

            let deadline = wake.unwrap_or_else(Instant::now);
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Cancelled,
                signal = signals.recv() => Step::Sink(signal),
                Some((index, result)) = fetches.next(), if !fetches.is_empty() => {
                    Step::Fetched(index, result)
                }
                event = self.playback_rx.recv() => Step::Playback(event),
                () = sleep_until(deadline), if wake.is_some() => Step::Wake,
            };

            let commands = match step {
                Step::Cancelled => {
                    debug!(in_flight = fetches.len(), "stream driver cancelled");
                    return Ok(StreamOutcome::Cancelled);
                }
                Step::Sink(signal) => self.controller.on_sink_signal(signal)?,
                Step::Fetched(index, result) => self.controller.on_fetch_complete(index, result)?,
                Step::Playback(Some(event)) => self.controller.on_playback(event)?,
                Step::Playback(None) => {
                    debug!("playback handles dropped");
                    return Ok(StreamOutcome::Detached);
                }
                Step::Wake => {
                    wake = None;
                    self.controller.on_wake()?
                }
            };
            self.apply(commands, &mut fetches, &mut wake);
        }
    }

    fn apply(
        &self,
        commands: Vec<Command>,
        fetches: &mut FuturesUnordered<FetchFuture>,
        wake: &mut Option<Instant>,
    ) {
        for command in commands {
            match command {
                Command::Fetch { index, start, end } => {
                    let fetcher = self.fetcher.clone();
                    fetches.push(
                        async move { (index, fetcher.fetch_range(start, end).await) }.boxed(),
                    );
                }
                Command::WakeAt(at) => {
                    *wake = Some(wake.map_or(at, |current| current.min(at)));
                }
            }
        }
    }
}
