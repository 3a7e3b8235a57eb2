//! Line-buffered diagnostic output for the guest's `write` import.
//!
//! Bytes written to descriptor 1 or 2 are buffered per stream and emitted
//! one completed line at a time through `tracing`. Any other descriptor is
//! a protocol violation. `log` emits whole messages to stdout without
//! touching the buffers.

use hostbridge_hostapi::HostError;
use tracing::{info, warn};

/// Output stream selected by a descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn from_descriptor(fd: i32) -> Result<Self, HostError> {
        match fd {
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(HostError::InvalidDescriptor(other)),
        }
    }
}

/// A completed line of guest output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub stream: Stream,
    pub text: String,
}

/// Per-stream line buffers.
#[derive(Debug, Default)]
pub struct Console {
    stdout: String,
    stderr: String,
    lines: Vec<ConsoleLine>,
    capture: bool,
}

impl Console {
    /// Create a console. With `capture`, completed lines are also kept for
    /// later inspection via [`lines`](Self::lines).
    pub fn new(capture: bool) -> Self {
        Self {
            capture,
            ..Self::default()
        }
    }

    /// Append `text` to the stream for `fd`, emitting each completed line.
    pub fn write(&mut self, fd: i32, text: &str) -> Result<(), HostError> {
        let stream = Stream::from_descriptor(fd)?;
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(self.buffer(stream));
                self.emit(stream, line);
            } else {
                self.buffer(stream).push(ch);
            }
        }
        Ok(())
    }

    /// Emit `message` on stdout as complete lines.
    pub fn log(&mut self, message: &str) {
        for line in message.split('\n') {
            self.emit(Stream::Stdout, line.to_string());
        }
    }

    /// Emit any partial lines still buffered.
    pub fn flush(&mut self) {
        for stream in [Stream::Stdout, Stream::Stderr] {
            let line = std::mem::take(self.buffer(stream));
            if !line.is_empty() {
                self.emit(stream, line);
            }
        }
    }

    /// Captured lines, oldest first.
    pub fn lines(&self) -> &[ConsoleLine] {
        &self.lines
    }

    fn buffer(&mut self, stream: Stream) -> &mut String {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }

    fn emit(&mut self, stream: Stream, text: String) {
        match stream {
            Stream::Stdout => info!(target: "hostbridge::guest", "{}", text),
            Stream::Stderr => warn!(target: "hostbridge::guest", "{}", text),
        }
        if self.capture {
            self.lines.push(ConsoleLine { stream, text });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(stream: Stream, text: &str) -> ConsoleLine {
        ConsoleLine {
            stream,
            text: text.into(),
        }
    }

    #[test]
    fn test_lines_split_across_writes() {
        let mut console = Console::new(true);
        console.write(1, "hello\nwor").unwrap();
        console.write(1, "ld\n").unwrap();
        assert_eq!(
            console.lines(),
            &[line(Stream::Stdout, "hello"), line(Stream::Stdout, "world")]
        );
    }

    #[test]
    fn test_log_bypasses_buffer() {
        let mut console = Console::new(true);
        console.write(1, "partial").unwrap();
        console.log("two\nlines");
        assert_eq!(
            console.lines(),
            &[line(Stream::Stdout, "two"), line(Stream::Stdout, "lines")]
        );
        console.flush();
        assert_eq!(console.lines()[2], line(Stream::Stdout, "partial"));
    }

    #[test]
    fn test_streams_buffer_independently() {
        let mut console = Console::new(true);
        console.write(1, "out").unwrap();
        console.write(2, "err\n").unwrap();
        console.write(1, "\n").unwrap();
        assert_eq!(
            console.lines(),
            &[line(Stream::Stderr, "err"), line(Stream::Stdout, "out")]
        );
    }

    #[test]
    fn test_invalid_descriptor() {
        let mut console = Console::new(true);
        assert_eq!(
            console.write(3, "x\n").unwrap_err(),
            HostError::InvalidDescriptor(3)
        );
        assert!(console.lines().is_empty());
    }

    #[test]
    fn test_flush_partial_line() {
        let mut console = Console::new(true);
        console.write(2, "partial").unwrap();
        assert!(console.lines().is_empty());
        console.flush();
        assert_eq!(console.lines(), &[line(Stream::Stderr, "partial")]);
    }

    #[test]
    fn test_without_capture() {
        let mut console = Console::new(false);
        console.write(1, "a\nb\n").unwrap();
        assert!(console.lines().is_empty());
    }
}
