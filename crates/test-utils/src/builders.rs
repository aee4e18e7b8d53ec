#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use teeproc::TeeTarget;

/// A temp file shared as a sink, plus a handle to read it back.
pub struct SharedFileSink {
    file: File,
}

impl SharedFileSink {
    pub fn new() -> Self {
        Self {
            file: tempfile::tempfile().expect("create temp sink file"),
        }
    }

    /// A `TeeTarget` sharing this file's descriptor.
    pub fn target(&self) -> TeeTarget {
        TeeTarget::shared(self.file.try_clone().expect("clone sink file"))
    }

    pub fn contents(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(0)).expect("seek sink file");
        self.file.read_to_end(&mut buf).expect("read sink file");
        buf
    }

    pub fn text(&mut self) -> String {
        String::from_utf8(self.contents()).expect("sink file is UTF-8")
    }
}

impl Default for SharedFileSink {
    fn default() -> Self {
        Self::new()
    }
}

/// A directory of named log files used as path-based sinks.
pub struct LogDir {
    dir: TempDir,
}

impl LogDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp log dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// An append-mode file target for `name`, opened at every spawn.
    pub fn target(&self, name: &str) -> TeeTarget {
        TeeTarget::file(self.path(name))
    }

    pub fn read(&self, name: &str) -> String {
        read_text(&self.path(name))
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for LogDir {
    fn default() -> Self {
        Self::new()
    }
}

/// File contents, or empty if the file was never created.
pub fn read_text(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
