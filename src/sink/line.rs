// src/sink/line.rs

//! A sink that turns every line written to it into a `tracing` event.
//!
//! The descriptor handed to helper processes is the write end of an OS pipe;
//! a background thread reads lines from the other end until EOF. Closing the
//! sink drops the write end and joins the thread, so every line written
//! before close has been logged when `close` returns.

use std::io::{self, BufRead, BufReader, PipeReader, PipeWriter};
use std::os::fd::{AsFd, BorrowedFd};
use std::thread::{self, JoinHandle};

use tracing::{Level, debug, error, info, trace, warn};

use super::{Sink, TeeTarget};

pub struct LineSink {
    writer: PipeWriter,
    reader: JoinHandle<usize>,
}

impl LineSink {
    /// Create a sink logging each line at `level` with a `stream` field set
    /// to `name`.
    pub fn new(name: impl Into<String>, level: Level) -> io::Result<Self> {
        let name = name.into();
        let (reader, writer) = io::pipe()?;
        let reader = thread::Builder::new()
            .name(format!("line-sink-{name}"))
            .spawn(move || forward_lines(reader, &name, level))?;
        Ok(Self { writer, reader })
    }

    /// A factory target creating a fresh `LineSink` for every spawn.
    pub fn target(name: impl Into<String>, level: Level) -> TeeTarget {
        let name = name.into();
        TeeTarget::factory(move || Ok(Box::new(LineSink::new(name.clone(), level)?) as Box<dyn Sink>))
    }
}

impl AsFd for LineSink {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.writer.as_fd()
    }
}

impl Sink for LineSink {
    fn close(self: Box<Self>) -> io::Result<()> {
        let LineSink { writer, reader } = *self;
        drop(writer);
        match reader.join() {
            Ok(lines) => {
                debug!(lines, "line sink drained");
                Ok(())
            }
            Err(_) => Err(io::Error::other("line sink reader panicked")),
        }
    }
}

fn forward_lines(reader: PipeReader, stream: &str, level: Level) -> usize {
    let mut count = 0;
    for chunk in BufReader::new(reader).split(b'\n') {
        match chunk {
            Ok(bytes) => {
                let line = String::from_utf8_lossy(&bytes);
                emit(level, stream, line.trim_end_matches('\r'));
                count += 1;
            }
            Err(err) => {
                debug!(stream, error = %err, "line sink read failed");
                break;
            }
        }
    }
    count
}

fn emit(level: Level, stream: &str, line: &str) {
    match level {
        Level::ERROR => error!(target: "teeproc::output", stream, "{line}"),
        Level::WARN => warn!(target: "teeproc::output", stream, "{line}"),
        Level::INFO => info!(target: "teeproc::output", stream, "{line}"),
        Level::DEBUG => debug!(target: "teeproc::output", stream, "{line}"),
        _ => trace!(target: "teeproc::output", stream, "{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn close_waits_for_every_line() {
        let sink = LineSink::new("test", Level::DEBUG).unwrap();
        let mut writer = sink.writer.try_clone().unwrap();
        writer.write_all(b"one\ntwo\nthree").unwrap();
        drop(writer);

        let LineSink { writer, reader } = sink;
        drop(writer);
        assert_eq!(reader.join().unwrap(), 3);
    }
}
