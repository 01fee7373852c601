#![forbid(unsafe_code)]

//! Shared test utilities for the lyra workspace.

pub mod http_server;
pub mod net;
pub mod payload;
pub mod surface;
pub mod trace;

pub use http_server::{RangeAsset, TestHttpServer};
pub use net::{NetCall, ScriptedNet};
pub use payload::{Xorshift64, test_asset};
pub use surface::RecordingSurface;
pub use trace::init_tracing;
