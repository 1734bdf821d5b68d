//! Retry and scheduling policies.
//!
//! This module groups the knobs that control **when** a camera is retried and
//! **how** periodic work is spread out.
//!
//! ## Contents
//! - [`RetryPolicy`] linear backoff, retry budget, cooldown-and-reset
//! - [`Jitter`]      randomization of scheduled delays
//!
//! ## Quick wiring
//! ```text
//! StreamConfig + CameraSpec ──► StreamConfig::retry_policy_for() ──► RetryPolicy
//!      └─► stream::actor::StreamActor uses:
//!           - delay_for(retry) between attempts
//!           - is_exhausted(retry) to enter the cooldown
//!
//! UpdateEngine::run() uses:
//!      - Jitter::STARTUP before the first cycle
//!      - Jitter::INTERVAL when rescheduling
//! ```

mod jitter;
mod retry;

pub use jitter::Jitter;
pub use retry::RetryPolicy;
