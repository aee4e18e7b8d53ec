// src/exec/capture.rs

//! Captured output and the auto-capture buffer.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use super::options::OutputMode;
use crate::errors::Result;

/// Output collected from one stream, in binary or text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Bytes(Vec<u8>),
    Text(String),
}

impl Captured {
    pub(crate) fn decode(bytes: Vec<u8>, mode: OutputMode) -> Result<Self> {
        Ok(match mode {
            OutputMode::Binary => Captured::Bytes(bytes),
            OutputMode::Text => Captured::Text(String::from_utf8(bytes)?),
            OutputMode::TextLossy => Captured::Text(String::from_utf8_lossy(&bytes).into_owned()),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Captured::Bytes(bytes) => bytes,
            Captured::Text(text) => text.as_bytes(),
        }
    }

    /// Text view; binary output is decoded lossily.
    pub fn to_text(&self) -> String {
        match self {
            Captured::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Captured::Text(text) => text.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl PartialEq<&str> for Captured {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

/// Unnamed temp file used as a stream destination when capture is implied
/// but no destination was named. Unlike a pipe it never blocks the writer.
#[derive(Debug)]
pub struct AutoCapture {
    file: File,
}

impl AutoCapture {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile()?,
        })
    }

    /// A second handle to hand to a child or a fanout helper.
    pub fn writer(&self) -> io::Result<File> {
        self.file.try_clone()
    }

    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
