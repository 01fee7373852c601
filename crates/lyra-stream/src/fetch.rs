//! Byte-range retrieval on top of [`lyra_net::Net`].

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use lyra_net::{Headers, Net, NetError, RangeSpec};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{StreamError, StreamResult};

/// Issues HEAD and inclusive range requests for a single asset.
pub struct RangeFetcher<N> {
    net: Arc<N>,
    url: Url,
    headers: Option<Headers>,
}

impl<N> Clone for RangeFetcher<N> {
    fn clone(&self) -> Self {
        Self {
            net: Arc::clone(&self.net),
            url: self.url.clone(),
            headers: self.headers.clone(),
        }
    }
}

impl<N: Net> RangeFetcher<N> {
    pub fn new(net: N, url: Url) -> Self {
        Self {
            net: Arc::new(net),
            url,
            headers: None,
        }
    }

    /// Extra headers sent with every request.
    #[must_use]
    pub fn with_headers(mut self, headers: Option<Headers>) -> Self {
        self.headers = headers;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Total asset length from the HEAD `Content-Length`.
    ///
    /// # Errors
    ///
    /// [`StreamError::LengthUnavailable`] if the request fails or the header is
    /// absent or unparseable.
    pub async fn discover_length(&self) -> StreamResult<u64> {
        let headers = self
            .net
            .head(self.url.clone(), self.headers.clone())
            .await
            .map_err(|e| StreamError::LengthUnavailable(e.to_string()))?;

        let len = headers.content_length().ok_or_else(|| {
            StreamError::LengthUnavailable(format!("no content-length for {}", self.url))
        })?;
        debug!(url = %self.url, len, "asset length discovered");
        Ok(len)
    }

    /// Fetch `[start, end]` (inclusive) as one contiguous chunk.
    ///
    /// A server that ignores the range and answers with the full body gets
    /// sliced down to the requested span. A short non-empty body is returned
    /// as-is; whether that is acceptable depends on which segment asked.
    ///
    /// # Errors
    ///
    /// [`StreamError::RangeFetch`] on any transport or status failure.
    pub async fn fetch_range(&self, start: u64, end: u64) -> StreamResult<Bytes> {
        let range = RangeSpec::inclusive(start, end).map_err(|e| StreamError::range_fetch(&e))?;
        let expected = end - start + 1;

        let mut stream = self
            .net
            .get_range(self.url.clone(), range, self.headers.clone())
            .await
            .map_err(|e| StreamError::range_fetch(&e))?;

        let mut buf = BytesMut::with_capacity(usize::try_from(expected).unwrap_or(0));
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StreamError::range_fetch(&e))?;
            trace!(len = chunk.len(), "range chunk");
            buf.extend_from_slice(&chunk);
        }

        let received = buf.len() as u64;
        let bytes = if received > expected {
            // Full body: the server ignored the Range header.
            if received <= start {
                return Err(short_body(start, end, received));
            }
            warn!(start, end, received, "range ignored by server, slicing full body");
            let to = received.min(end + 1);
            let from = usize::try_from(start).map_err(|_| short_body(start, end, received))?;
            let to = usize::try_from(to).map_err(|_| short_body(start, end, received))?;
            buf.freeze().slice(from..to)
        } else if received == 0 {
            return Err(short_body(start, end, received));
        } else {
            buf.freeze()
        };

        debug!(start, end, len = bytes.len(), "fetched bytes");
        Ok(bytes)
    }
}

fn short_body(start: u64, end: u64, received: u64) -> StreamError {
    StreamError::range_fetch(&NetError::InvalidRange(format!(
        "bytes={start}-{end}: received {received} bytes"
    )))
}
