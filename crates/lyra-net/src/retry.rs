use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
#[cfg(test)]
use unimock::unimock;
use tracing::debug;
use url::Url;

use crate::{
    ByteStream,
    error::NetError,
    traits::Net,
    types::{Headers, RangeSpec, RetryPolicy},
};

#[cfg_attr(test, unimock(api = RetryPolicyMock))]
pub trait RetryPolicyTrait: Send + Sync {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool;
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

/// [`RetryPolicy`] plus [`NetError::is_retryable`] classification.
#[derive(Clone, Debug)]
pub struct DefaultRetryPolicy {
    policy: RetryPolicy,
}

impl DefaultRetryPolicy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RetryPolicyTrait for DefaultRetryPolicy {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        if attempt >= self.policy.max_retries {
            return false;
        }

        error.is_retryable()
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // attempt 0 already failed once, so the first retry waits base_delay.
        self.policy.delay_for_attempt(attempt.saturating_add(1))
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_retries
    }
}

/// Retry decorator for Net implementations
pub struct RetryNet<N, P> {
    inner: N,
    retry_policy: P,
}

impl<N: Net, P: RetryPolicyTrait> RetryNet<N, P> {
    pub fn new(inner: N, retry_policy: P) -> Self {
        Self {
            inner,
            retry_policy,
        }
    }

    async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, NetError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, NetError>> + Send,
        T: Send,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(out) => return Ok(out),
                Err(error) => {
                    if !self.retry_policy.should_retry(&error, attempt) {
                        if attempt == 0 || !error.is_retryable() {
                            return Err(error);
                        }
                        return Err(NetError::RetryExhausted {
                            max_retries: self.retry_policy.max_attempts(),
                            source: Box::new(error),
                        });
                    }

                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, %error, "lyra-net: retrying request");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<N: Net, P: RetryPolicyTrait> Net for RetryNet<N, P> {
    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.run(|| {
            self.inner
                .get_range(url.clone(), range.clone(), headers.clone())
        })
        .await
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        self.run(|| self.inner.head(url.clone(), headers.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use unimock::{MockFn, Unimock, matching};

    use super::*;
    use crate::traits::NetMock;

    fn fast_policy(max_retries: u32) -> DefaultRetryPolicy {
        DefaultRetryPolicy::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            max_retries,
        })
    }

    fn test_url() -> Url {
        Url::parse("http://test.com/asset.mp4").unwrap()
    }

    fn empty_stream() -> ByteStream {
        Box::pin(futures::stream::empty())
    }

    #[rstest]
    #[case(0, true, "first attempt should retry")]
    #[case(2, true, "third attempt should retry")]
    #[case(3, false, "fourth attempt should not retry (max=3)")]
    fn test_default_retry_policy_should_retry_max_retries(
        #[case] attempt: u32,
        #[case] expected: bool,
        #[case] _desc: &str,
    ) {
        let retry_policy = DefaultRetryPolicy::new(RetryPolicy::default());
        assert_eq!(retry_policy.should_retry(&NetError::Timeout, attempt), expected);
    }

    #[rstest]
    fn test_default_retry_policy_should_not_retry_non_retryable() {
        let retry_policy = DefaultRetryPolicy::new(RetryPolicy::default());
        let error = NetError::http_status(404, "http://test.com/");
        assert!(!retry_policy.should_retry(&error, 0));
    }

    #[rstest]
    #[case(0, Duration::from_millis(100))]
    #[case(1, Duration::from_millis(200))]
    #[case(2, Duration::from_millis(400))]
    fn test_default_retry_policy_delay_for_attempt(
        #[case] attempt: u32,
        #[case] expected: Duration,
    ) {
        let retry_policy = DefaultRetryPolicy::new(RetryPolicy::default());
        assert_eq!(retry_policy.delay_for_attempt(attempt), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_head_success_first_try() {
        let mock = Unimock::new(
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Ok(Headers::new())),
        );
        let retry_net = RetryNet::new(mock, fast_policy(3));

        let result = retry_net.head(test_url(), None).await;

        assert!(result.is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_head_retry_then_success() {
        let mock = Unimock::new((
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_status(503, "http://test.com/"))),
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Ok(Headers::new())),
        ));
        let retry_net = RetryNet::new(mock, fast_policy(3));

        let result = retry_net.head(test_url(), None).await;

        assert!(result.is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_head_exhausted_wraps_last_error() {
        let mock = Unimock::new(
            NetMock::head
                .each_call(matching!(_, _))
                .returns(Err(NetError::http_status(500, "http://test.com/"))),
        );
        let retry_net = RetryNet::new(mock, fast_policy(2));

        let err = retry_net.head(test_url(), None).await.unwrap_err();

        assert!(matches!(err, NetError::RetryExhausted { max_retries: 2, .. }));
        assert_eq!(err.status_code(), Some(500));
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_non_retryable_returned_as_is() {
        let mock = Unimock::new(
            NetMock::head
                .next_call(matching!(_, _))
                .returns(Err(NetError::http_status(404, "http://test.com/"))),
        );
        let retry_net = RetryNet::new(mock, fast_policy(3));

        let err = retry_net.head(test_url(), None).await.unwrap_err();

        assert_eq!(err.status_code(), Some(404));
        assert!(!matches!(err, NetError::RetryExhausted { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_get_range_retry_then_success() {
        let mock = Unimock::new((
            NetMock::get_range
                .next_call(matching!(_, _, _))
                .answers(&|_, _, _, _| Err(NetError::Timeout)),
            NetMock::get_range
                .next_call(matching!(_, _, _))
                .answers(&|_, _, _, _| Ok(empty_stream())),
        ));
        let retry_net = RetryNet::new(mock, fast_policy(3));

        let range = RangeSpec::inclusive(0, 199).unwrap();
        let result = retry_net.get_range(test_url(), range, None).await;

        assert!(result.is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_zero_retries_fails_fast() {
        let mock = Unimock::new(
            NetMock::get_range
                .next_call(matching!(_, _, _))
                .answers(&|_, _, _, _| Err(NetError::Timeout)),
        );
        let retry_net = RetryNet::new(mock, fast_policy(0));

        let range = RangeSpec::inclusive(0, 9).unwrap();
        let err = retry_net.get_range(test_url(), range, None).await.err();

        assert!(matches!(err, Some(NetError::Timeout)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_retry_net_honours_custom_policy() {
        let policy = Unimock::new((
            RetryPolicyMock::should_retry
                .next_call(matching!(_, 0))
                .returns(true),
            RetryPolicyMock::delay_for_attempt
                .next_call(matching!(0))
                .returns(Duration::ZERO),
            RetryPolicyMock::should_retry
                .next_call(matching!(_, 1))
                .returns(false),
            RetryPolicyMock::max_attempts
                .next_call(matching!())
                .returns(1_u32),
        ));
        let mock = Unimock::new(
            NetMock::head
                .each_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
        );
        let retry_net = RetryNet::new(mock, policy);

        let err = retry_net.head(test_url(), None).await.unwrap_err();

        assert!(matches!(err, NetError::RetryExhausted { max_retries: 1, .. }));
    }
}
