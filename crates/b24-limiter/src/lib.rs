//! Per-portal request admission for the Bitrix24 REST client
//!
//! Implements the client side of the server's leaky-bucket quota: a bucket
//! and FIFO queue per portal, one admission released at a time with a
//! minimum spacing, hard blocks when the server reports a breach, and
//! sweeping of idle portal state.
//!
//! Admission lifecycle:
//! 1. Caller awaits `RateLimiter::admit(domain, method)`
//! 2. The tenant's processor decays the bucket, waits out any block,
//!    spacing, or full bucket, then releases the head of the queue
//! 3. The caller performs its request and reports the response through
//!    `RateLimiter::observe()`
//! 4. A breach response blocks the tenant and prefills the bucket

pub mod classify;
pub mod error;
pub mod limiter;

pub use classify::limit_exceeded;
pub use error::{Error, Result};
pub use limiter::{LimiterSettings, RateLimiter, TenantStats};
