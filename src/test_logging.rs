//! Structured logging for tests.
//!
//! Test bodies mark their progress with [`test_phase!`](crate::test_phase)
//! and [`test_complete!`](crate::test_complete) and assert through
//! [`assert_with_log!`](crate::assert_with_log), which reports the expected
//! and observed values on failure and, at verbose levels, echoes passing
//! checks too. Verbosity comes from the `TEST_LOG_LEVEL` environment
//! variable (`quiet`, `info`, `debug`).

use std::str::FromStr;
use std::sync::OnceLock;

/// Logging verbosity for tests, from `TEST_LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// No progress output; failures still report.
    Quiet,
    /// Phase markers only.
    #[default]
    Info,
    /// Phase markers and every passing assertion.
    Debug,
}

impl FromStr for TestLogLevel {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_lowercase().as_str() {
            "quiet" | "error" => Ok(Self::Quiet),
            "info" => Ok(Self::Info),
            "debug" | "trace" => Ok(Self::Debug),
            _ => Err(()),
        }
    }
}

fn level() -> TestLogLevel {
    static LEVEL: OnceLock<TestLogLevel> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        std::env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    })
}

/// Resolves the log level once. Call at the top of each test.
pub fn init_test_logging() {
    let _ = level();
}

/// Whether passing assertions should be echoed.
#[must_use]
pub fn verbose() -> bool {
    level() >= TestLogLevel::Debug
}

/// Marks the start of a test phase.
pub fn phase(name: &str) {
    if level() >= TestLogLevel::Info {
        eprintln!("=== {name} ===");
    }
}

/// Marks a test as complete.
pub fn complete(name: &str) {
    if level() >= TestLogLevel::Info {
        eprintln!("=== {name}: ok ===");
    }
}

/// Marks the start of a test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_logging::phase($name)
    };
}

/// Marks a test as complete.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_logging::complete($name)
    };
}

/// Asserts a condition, reporting expected and observed values on failure.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $label:expr, $expected:expr, $actual:expr) => {
        if !$cond {
            panic!(
                "assertion failed: {} (expected {:?}, got {:?})",
                $label, $expected, $actual
            );
        } else if $crate::test_logging::verbose() {
            eprintln!("    ok: {} = {:?}", $label, $actual);
        }
    };
}
