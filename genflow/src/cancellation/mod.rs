//! Cooperative cancellation.
//!
//! A generation run polls its [`CancellationToken`] at unit boundaries,
//! render-job poll iterations and retry backoff sleeps.

mod token;

pub use token::CancellationToken;
