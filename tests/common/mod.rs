#![allow(dead_code)]

pub use teeproc_test_utils::builders::{LogDir, SharedFileSink};
pub use teeproc_test_utils::{init_tracing, pid_alive, with_timeout};
