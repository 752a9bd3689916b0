#![allow(dead_code)]

pub use runstop_test_utils::builders;
pub use runstop_test_utils::{
    CoordDir, FakeRunTask, OnSignal, hold_raw_lock, init_tracing, plant_stale_lock, with_timeout,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
