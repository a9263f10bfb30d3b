use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    io::BufRead,
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::Instant,
};

use slog::{debug, info};

use crate::connectivity::Connectivity;
use crate::error::FetchError;
use crate::fetcher::{Effect, Generation, LocationFetcher};
use crate::location::ApiResponse;
use crate::network::LocationSource;
use crate::view::View;

#[derive(Debug)]
pub enum Event {
    /// Manual re-fetch, e.g. the user pressed the refresh key.
    Refresh,
    Connectivity(Connectivity),
    Completed {
        generation: Generation,
        outcome: Result<ApiResponse, FetchError>,
    },
    RetryDue {
        generation: Generation,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stop as soon as the first fetch chain settles.
    Once,
    /// Keep serving refreshes and connectivity changes until shut down.
    Watch,
}

/// Single threaded event loop around a [`LocationFetcher`]. Lookups run on
/// helper threads and come back as [`Event::Completed`], retry delays are
/// deadlines the loop waits on instead of sleeping.
pub struct Runtime<V: View, S: LocationSource + 'static> {
    log: slog::Logger,
    fetcher: LocationFetcher<V>,
    source: Arc<S>,
    sender: Sender<Event>,
    events: Receiver<Event>,
    timers: BinaryHeap<Reverse<(Instant, Generation)>>,
}
impl<V: View, S: LocationSource + 'static> Runtime<V, S> {
    pub fn new(log: &slog::Logger, fetcher: LocationFetcher<V>, source: S) -> Self {
        let (sender, events) = mpsc::channel();
        Self {
            log: log.clone(),
            fetcher,
            source: Arc::new(source),
            sender,
            events,
            timers: BinaryHeap::new(),
        }
    }

    /// Handle for feeding events in from other threads.
    pub fn sender(&self) -> Sender<Event> {
        self.sender.clone()
    }

    pub fn run(mut self, mode: Mode) -> LocationFetcher<V> {
        let effect = self.fetcher.fetch();
        self.apply(effect);

        loop {
            if mode == Mode::Once && self.fetcher.is_settled() {
                break;
            }
            let Some(event) = self.next_event() else {
                break;
            };
            debug!(self.log, "event"; "event" => format!("{event:?}"));

            let effect = match event {
                Event::Refresh => Some(self.fetcher.fetch()),
                Event::Connectivity(connectivity) => self.fetcher.on_connectivity(connectivity),
                Event::Completed {
                    generation,
                    outcome,
                } => self.fetcher.on_response(generation, outcome),
                Event::RetryDue { generation } => self.fetcher.on_retry_due(generation),
                Event::Shutdown => {
                    info!(self.log, "shutting down");
                    break;
                }
            };
            if let Some(effect) = effect {
                self.apply(effect);
            }
        }

        self.fetcher
    }

    fn next_event(&mut self) -> Option<Event> {
        loop {
            let Some(Reverse((deadline, generation))) = self.timers.peek().copied() else {
                return self.events.recv().ok();
            };
            let now = Instant::now();
            if deadline <= now {
                self.timers.pop();
                return Some(Event::RetryDue { generation });
            }
            match self.events.recv_timeout(deadline - now) {
                Ok(event) => return Some(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Request { generation } => {
                let source = Arc::clone(&self.source);
                let sender = self.sender.clone();
                thread::spawn(move || {
                    let outcome = source.lookup();
                    // the loop may already be gone
                    let _ = sender.send(Event::Completed {
                        generation,
                        outcome,
                    });
                });
            }
            Effect::ScheduleRetry { generation, delay } => {
                let now = Instant::now();
                let deadline = now.checked_add(delay).unwrap_or(now);
                self.timers.push(Reverse((deadline, generation)));
            }
        }
    }
}

/// Every line read from `input` asks for a fresh lookup, closing the input
/// shuts the loop down.
pub fn spawn_refresh_reader<R>(log: &slog::Logger, input: R, events: Sender<Event>)
where
    R: BufRead + Send + 'static,
{
    let log = log.clone();
    thread::spawn(move || {
        for line in input.lines() {
            if line.is_err() || events.send(Event::Refresh).is_err() {
                break;
            }
        }
        debug!(log, "refresh input closed");
        let _ = events.send(Event::Shutdown);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetcherConfig, Phase};
    use crate::location::{Scalar, Slot};
    use std::{
        collections::VecDeque,
        io::Cursor,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[derive(Default)]
    struct NullView;
    impl View for NullView {
        fn set_visible(&mut self, _element: &str, _visible: bool) {}
        fn set_text(&mut self, _slot: Slot, _value: &str) -> bool {
            true
        }
    }

    /// Hands out scripted outcomes, then keeps failing with an abort.
    struct ScriptedSource {
        outcomes: Mutex<VecDeque<Result<ApiResponse, FetchError>>>,
        calls: Arc<AtomicUsize>,
    }
    impl ScriptedSource {
        fn new(outcomes: Vec<Result<ApiResponse, FetchError>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    outcomes: Mutex::new(outcomes.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }
    impl LocationSource for ScriptedSource {
        fn lookup(&self) -> Result<ApiResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Aborted("script exhausted".into())))
        }
    }

    fn ok() -> Result<ApiResponse, FetchError> {
        Ok(ApiResponse {
            ip: Some(Scalar::Text("8.8.8.8".into())),
            ..Default::default()
        })
    }

    fn timeout() -> Result<ApiResponse, FetchError> {
        Err(FetchError::NetworkTimeout("timed out".into()))
    }

    fn runtime(source: ScriptedSource) -> Runtime<NullView, ScriptedSource> {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let config = FetcherConfig {
            retry_step: Duration::from_millis(5),
            ..Default::default()
        };
        Runtime::new(&log, LocationFetcher::new(&log, NullView, config), source)
    }

    #[test]
    fn test_once_settles_on_success() {
        let (source, calls) = ScriptedSource::new(vec![ok()]);
        let fetcher = runtime(source).run(Mode::Once);
        assert_eq!(fetcher.phase(), Phase::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_retries_then_succeeds() {
        let (source, calls) = ScriptedSource::new(vec![timeout(), timeout(), ok()]);
        let fetcher = runtime(source).run(Mode::Once);
        assert_eq!(fetcher.phase(), Phase::Success);
        assert_eq!(fetcher.retry_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_four_timeouts_exhaust_retries() {
        let (source, calls) =
            ScriptedSource::new(vec![timeout(), timeout(), timeout(), timeout(), ok()]);
        let fetcher = runtime(source).run(Mode::Once);
        assert_eq!(fetcher.phase(), Phase::Failed);
        assert_eq!(fetcher.retry_count(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_watch_refetches_when_back_online() {
        let (source, calls) =
            ScriptedSource::new(vec![Err(FetchError::Aborted("offline".into())), ok()]);
        let runtime = runtime(source);
        let sender = runtime.sender();
        let handle = thread::spawn(move || runtime.run(Mode::Watch));

        thread::sleep(Duration::from_millis(200));
        sender.send(Event::Connectivity(Connectivity::Offline)).unwrap();
        sender.send(Event::Connectivity(Connectivity::Online)).unwrap();
        thread::sleep(Duration::from_millis(200));
        sender.send(Event::Shutdown).unwrap();

        let fetcher = handle.join().unwrap();
        assert_eq!(fetcher.phase(), Phase::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_lines_become_events() {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let (sender, events) = mpsc::channel();
        spawn_refresh_reader(&log, Cursor::new("\n\n"), sender);
        let received: Vec<_> = events.iter().collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(received[0], Event::Refresh));
        assert!(matches!(received[1], Event::Refresh));
        assert!(matches!(received[2], Event::Shutdown));
    }
}
