//! In-memory [`Net`] with scripted failures and delays.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use lyra_net::{ByteStream, Headers, Net, NetError, RangeSpec};
use parking_lot::Mutex;
use url::Url;

/// A request seen by [`ScriptedNet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetCall {
    Head,
    Range { start: u64, end: Option<u64> },
}

#[derive(Default)]
struct Script {
    calls: Vec<NetCall>,
    range_failures: HashMap<u64, VecDeque<NetError>>,
    range_delays: HashMap<u64, Duration>,
    head_failure: Option<NetError>,
    hide_length: bool,
}

/// Serves `body` from memory.
///
/// Clones share the script and the call log, so a test can keep one clone
/// and hand the other to the code under test.
#[derive(Clone)]
pub struct ScriptedNet {
    body: Bytes,
    script: Arc<Mutex<Script>>,
}

impl ScriptedNet {
    #[must_use]
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Fail the next `times` requests for the range starting at `start`.
    pub fn fail_range(&self, start: u64, status: u16, times: usize) {
        let mut script = self.script.lock();
        let queue = script.range_failures.entry(start).or_default();
        for _ in 0..times {
            queue.push_back(NetError::http_status(status, format!("memory://asset#{start}")));
        }
    }

    /// Delay every response for the range starting at `start`.
    pub fn delay_range(&self, start: u64, delay: Duration) {
        self.script.lock().range_delays.insert(start, delay);
    }

    pub fn fail_head(&self, error: NetError) {
        self.script.lock().head_failure = Some(error);
    }

    /// Answer HEAD without a `Content-Length`.
    pub fn hide_length(&self) {
        self.script.lock().hide_length = true;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<NetCall> {
        self.script.lock().calls.clone()
    }

    /// Number of range requests that started at `start`.
    #[must_use]
    pub fn range_requests(&self, start: u64) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, NetCall::Range { start: s, .. } if *s == start))
            .count()
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[async_trait]
impl Net for ScriptedNet {
    async fn get_range(
        &self,
        _url: Url,
        range: RangeSpec,
        _headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        let (failure, delay) = {
            let mut script = self.script.lock();
            script.calls.push(NetCall::Range {
                start: range.start,
                end: range.end,
            });
            let failure = script
                .range_failures
                .get_mut(&range.start)
                .and_then(VecDeque::pop_front);
            (failure, script.range_delays.get(&range.start).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let len = self.body.len() as u64;
        if range.start >= len {
            return Err(NetError::http_status(416, "memory://asset"));
        }
        let end = range.end.map_or(len, |end| (end + 1).min(len));
        let slice = self.body.slice(range.start as usize..end as usize);
        let mid = slice.len() / 2;
        let chunks = vec![Ok(slice.slice(..mid)), Ok(slice.slice(mid..))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn head(&self, _url: Url, _headers: Option<Headers>) -> Result<Headers, NetError> {
        let mut script = self.script.lock();
        script.calls.push(NetCall::Head);
        if let Some(error) = script.head_failure.clone() {
            return Err(error);
        }
        let mut headers = Headers::new();
        if !script.hide_length {
            headers.insert("content-length", self.body.len().to_string());
        }
        Ok(headers)
    }
}
