#![forbid(unsafe_code)]

//! HTTP transport for segment fetching.
//!
//! [`Net`] is the seam the stream engine talks to. [`HttpClient`] is the
//! reqwest-backed implementation; [`TimeoutNet`] and [`RetryNet`] decorate any
//! `Net` with a per-request deadline and exponential-backoff retries.

mod builder;
mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

pub use crate::{
    builder::{DefaultNet, NetBuilder},
    client::HttpClient,
    error::{NetError, NetResult},
    retry::{DefaultRetryPolicy, RetryNet, RetryPolicyTrait},
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt},
    types::{Headers, NetOptions, RangeSpec, RetryPolicy},
};
