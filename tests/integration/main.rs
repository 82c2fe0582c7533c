//! Integration test binary -- all integration tests consolidated into a single
//! binary.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod helpers;

mod contest_cycle;
mod post_contest;
mod practice_sync;
mod registration_flow;
mod run_locks;
