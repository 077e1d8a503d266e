//! Middleware chain, outermost first: rate-limit → auth → validate.
//!
//! (Auth itself lives in `crate::auth`; request timing and security
//! headers wrap the whole chain so throttled and rejected requests are
//! recorded and hardened too.)

pub mod headers;
pub mod perf;
pub mod rate_limit;
pub mod validate;
