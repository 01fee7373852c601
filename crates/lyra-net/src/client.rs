use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use tracing::trace;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, NetOptions, RangeSpec},
};

/// reqwest-backed [`Net`] implementation.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`NetError::Http`] if the underlying client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| NetError::http(e.to_string()))?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: Option<Headers>,
    ) -> reqwest::RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        let header = range.to_header_value();
        trace!(%url, range = %header, "lyra-net: range request");

        let req = self.inner.get(url.clone()).header("Range", header);
        let req = Self::apply_headers(req, headers);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
            return Err(NetError::http_status(status.as_u16(), url));
        }

        let stream = resp.bytes_stream().map_err(NetError::from);
        Ok(Box::pin(stream))
    }

    async fn head(&self, url: Url, headers: Option<Headers>) -> Result<Headers, NetError> {
        let req = self.inner.head(url.clone());
        let req = Self::apply_headers(req, headers);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        if !status.is_success() {
            return Err(NetError::http_status(status.as_u16(), url));
        }

        let mut out = Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str(), v);
            }
        }

        Ok(out)
    }
}
