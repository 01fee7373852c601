use crate::{
    client::HttpClient,
    error::NetError,
    retry::{DefaultRetryPolicy, RetryNet},
    timeout::TimeoutNet,
    traits::NetExt,
    types::{NetOptions, RetryPolicy},
};

/// Fully layered client: reqwest, then per-request timeout, then retries.
pub type DefaultNet = RetryNet<TimeoutNet<HttpClient>, DefaultRetryPolicy>;

/// Builder for creating configured Net clients
#[derive(Clone, Debug, Default)]
pub struct NetBuilder {
    options: NetOptions,
}

impl NetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: NetOptions) -> Self {
        Self { options }
    }

    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = policy;
        self
    }

    /// # Errors
    ///
    /// Returns [`NetError`] if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<DefaultNet, NetError> {
        let timeout = self.options.request_timeout;
        let retry = self.options.retry_policy.clone();
        let base = HttpClient::new(self.options)?;

        Ok(base.with_timeout(timeout).with_retry(retry))
    }
}
