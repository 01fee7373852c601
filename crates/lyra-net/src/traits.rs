use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{
    error::NetError,
    retry::{DefaultRetryPolicy, RetryNet},
    timeout::TimeoutNet,
    types::{Headers, RangeSpec, RetryPolicy},
};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;

#[cfg_attr(test, unimock(api = NetMock))]
#[async_trait]
pub trait Net: Send + Sync {
    /// Stream the bytes of an inclusive (or open-ended) range.
    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError>;

    /// Issue a HEAD request and return the response headers.
    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError>;
}

pub trait NetExt: Net + Sized {
    /// Add timeout layer
    fn with_timeout(self, timeout: Duration) -> TimeoutNet<Self> {
        TimeoutNet::new(self, timeout)
    }

    /// Add retry layer
    fn with_retry(self, policy: RetryPolicy) -> RetryNet<Self, DefaultRetryPolicy> {
        RetryNet::new(self, DefaultRetryPolicy::new(policy))
    }
}

impl<T: Net> NetExt for T {}
