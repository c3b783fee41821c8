//! Client for the upstream Responses backend.

pub mod client;
pub mod protocol;
pub mod sse;
pub mod usage;

pub use {
    client::{ResponsesClient, UpstreamError, UpstreamStream},
    protocol::{InputItem, Reasoning, ResponseEvent, ResponsesRequest, Role, TokenUsage},
    sse::{SseFrame, SseParser},
    usage::{AccountQuota, RateLimitWindow, RateLimits},
};

pub type Result<T> = std::result::Result<T, UpstreamError>;
