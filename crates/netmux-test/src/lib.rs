//! Integration test infrastructure for the netmux engine
//!
//! Provides:
//! - A scriptable lower layer that can pend requests, sends and closes
//! - A recording upper edge with switchable auto-initialize, auto-halt and
//!   auto-return behavior
//! - Frame fixtures and engine settings with short drain budgets
//! - A harness wiring all of it to a [`netmux_core::Mux`]

pub mod error;
pub mod fixtures;
pub mod harness;
pub mod lower;
pub mod upper;

pub use error::{HarnessError, HarnessResult};
pub use fixtures::*;
pub use harness::Harness;
pub use lower::{MockLower, MOCK_ADDRESS, MOCK_LINK_SPEED, MOCK_LOOKAHEAD};
pub use upper::{CompletionHook, Received, RecordingUpper, UpperEvent};

/// Routes engine logs to the test writer. `RUST_LOG` selects the level.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
