//! Backend implementations of the remote service traits
//!
//! - HTTP backend (reqwest, talks to the real prediction API)
//! - Mock backend (scripted responses for tests and offline demos)

pub mod http;
pub mod mock;

pub use self::http::{HttpMaskFetcher, HttpPredictionApi};
pub use self::mock::{encode_png, fetched_png, soft_circle_mask, MockMaskFetcher, MockPredictionApi};
