//! Line-oriented draining of child output pipes.
//!
//! Each pipe gets its own reader thread. Lines land in a shared buffer as they
//! arrive, so whatever was read before a timeout or kill is still reported even
//! if the reader never reaches end-of-stream.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Live consumer of output lines (terminal mirror, UI log pane).
pub type LineSink = Arc<dyn Fn(StreamKind, &str) + Send + Sync>;

/// Per-line hook owned by one drain, e.g. a readiness scanner.
pub type LineHook = Box<dyn FnMut(&str) + Send>;

/// A running drain of one pipe.
pub struct StreamDrain {
    kind: StreamKind,
    buffer: Arc<Mutex<String>>,
    done: Receiver<()>,
    finished: bool,
}

impl StreamDrain {
    /// Start draining `reader` on a background thread.
    pub fn spawn<R>(reader: R, kind: StreamKind, sink: Option<LineSink>, hook: Option<LineHook>) -> Self
    where
        R: Read + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let (done_tx, done) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            if let Err(err) = drain_lines(reader, kind, &shared, sink.as_ref(), hook) {
                warn!(stream = %kind, err = %err, "output stream read failed");
            }
            let _ = done_tx.send(());
        });
        Self {
            kind,
            buffer,
            done,
            finished: false,
        }
    }

    /// Wait up to `grace` for end-of-stream. Returns whether the drain finished.
    pub fn wait(&mut self, grace: Duration) -> bool {
        if !self.finished {
            self.finished = match self.done.recv_timeout(grace) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            };
            if !self.finished {
                warn!(stream = %self.kind, grace_ms = grace.as_millis(), "output drain did not finish");
            }
        }
        self.finished
    }

    /// Text captured so far.
    pub fn text(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Read `reader` line by line until end-of-stream.
///
/// Invalid UTF-8 is replaced lossily and a trailing `\r` is stripped. Each line
/// is appended to `buffer` with a `\n`, then handed to `sink` and `hook`.
pub fn drain_lines<R: Read>(
    reader: R,
    kind: StreamKind,
    buffer: &Mutex<String>,
    sink: Option<&LineSink>,
    mut hook: Option<LineHook>,
) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            return Ok(());
        }
        let decoded = String::from_utf8_lossy(&raw);
        let text: &str = &decoded;
        let line = text.strip_suffix('\n').unwrap_or(text);
        let line = line.strip_suffix('\r').unwrap_or(line);

        {
            let mut captured = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            captured.push_str(line);
            captured.push('\n');
        }
        if let Some(sink) = sink {
            sink(kind, line);
        }
        if let Some(hook) = hook.as_mut() {
            hook(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn drain_normalizes_line_endings() {
        let buffer = Mutex::new(String::new());
        let input = Cursor::new(b"one\r\ntwo\nthree".to_vec());
        drain_lines(input, StreamKind::Stdout, &buffer, None, None).expect("drain");
        assert_eq!(buffer.into_inner().expect("lock"), "one\ntwo\nthree\n");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let buffer = Mutex::new(String::new());
        let input = Cursor::new(vec![b'o', b'k', 0xff, b'\n']);
        drain_lines(input, StreamKind::Stderr, &buffer, None, None).expect("drain");
        assert_eq!(buffer.into_inner().expect("lock"), "ok\u{fffd}\n");
    }

    #[test]
    fn sink_and_hook_see_every_line() {
        let seen: Arc<Mutex<Vec<(StreamKind, String)>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);
        let sink: LineSink = Arc::new(move |kind: StreamKind, line: &str| {
            sink_seen
                .lock()
                .expect("lock")
                .push((kind, line.to_string()));
        });
        let hooked: Arc<Mutex<Vec<String>>> = Arc::default();
        let hook_seen = Arc::clone(&hooked);
        let hook: LineHook = Box::new(move |line: &str| hook_seen.lock().expect("lock").push(line.to_string()));

        let buffer = Mutex::new(String::new());
        let input = Cursor::new(b"a\nb\n".to_vec());
        drain_lines(input, StreamKind::Stderr, &buffer, Some(&sink), Some(hook)).expect("drain");

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                (StreamKind::Stderr, "a".to_string()),
                (StreamKind::Stderr, "b".to_string())
            ]
        );
        assert_eq!(*hooked.lock().expect("lock"), vec!["a", "b"]);
    }

    #[test]
    fn spawned_drain_finishes_and_keeps_text() {
        let mut drain = StreamDrain::spawn(
            Cursor::new(b"hello\nworld\n".to_vec()),
            StreamKind::Stdout,
            None,
            None,
        );
        assert!(drain.wait(Duration::from_secs(5)));
        assert_eq!(drain.text(), "hello\nworld\n");
    }
}
