#![allow(dead_code, unused_imports)]

mod backend;
mod records;
mod scripted_gateway;

pub use backend::{FakeBackend, BROKEN_USER, GONE_ID};
pub use records::*;
pub use scripted_gateway::{Op, ScriptedGateway};

use std::time::Duration;

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
