//! Configuration for channels and calls.
//!
//! - [`ChannelConfig`]: Channel-wide settings and their defaults
//! - [`CallOptions`]: Per-call deadline, cancellation and headers
//! - [`RetryPolicy`]: Opt-in retry with exponential backoff

mod channel;
mod options;
mod retry;

pub use channel::{ChannelConfig, defaults as channel_defaults};
pub(crate) use options::{duration_to_grpc_timeout, is_reserved_header};
pub use options::CallOptions;
pub use retry::{ExponentialBackoff, RetryPolicy, defaults as retry_defaults, retry_with_policy};
