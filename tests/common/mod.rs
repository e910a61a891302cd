//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use jerry::config::parse_config;
use jerry::{Jerry, PluginRegistry};

/// Install `toml` with the built-in plugins and start every service.
pub fn start(toml: &str) -> Jerry {
    let config = parse_config(toml).unwrap();
    let jerry = Jerry::from_config(&config, &PluginRegistry::with_builtins()).unwrap();
    jerry.start().unwrap();
    jerry
}

/// Base URL of a started HTTP server.
pub fn base_url(jerry: &Jerry, server: &str) -> String {
    format!("http://{}", jerry.http_local_addr(server).unwrap())
}

/// Release and wait for the daemon to stop.
pub fn stop(jerry: &Jerry) {
    jerry.release().unwrap();
    assert!(jerry.wait(Duration::from_secs(5)), "daemon did not stop");
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
