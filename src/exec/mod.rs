// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`options`] holds what a caller can ask for: command line, redirections,
//!   sinks, echo.
//! - [`fanout`] duplicates one stream into many descriptors through a `tee`
//!   helper process.
//! - [`prompt`] writes the `$ cmd` trace line before a spawn.
//! - [`process`] owns a spawned child plus its fanouts (`ManagedProcess`).
//! - [`tree`] terminates a process together with its descendants.
//! - [`capture`] and [`procfs`] are small helpers for the above.

pub mod capture;
pub mod fanout;
pub mod options;
pub mod process;
pub mod procfs;
pub mod prompt;
pub mod tree;

pub use capture::{AutoCapture, Captured};
pub use fanout::{BoxedReader, OutputRoute, StreamFanout};
pub use options::{CommandLine, OutputMode, Redirect, SpawnOptions, StdinSource};
pub use process::{Communicated, ManagedProcess};
