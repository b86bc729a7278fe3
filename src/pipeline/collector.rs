use crate::classify::{contains_timestamp, guess_level, Level};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

/// Idle period after which a buffered message is flushed, and the period of
/// the flush timer itself.
pub const DEFAULT_COLLECTOR_TIMEOUT: Duration = Duration::from_millis(100);

/// Ceiling on the assembled size of a single message, separators included.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// One physical line of input with its arrival timestamp and an optional
/// severity hint from the transport (`Level::Unknown` means no hint).
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub level: Level,
}

/// A logical log event, possibly assembled from several physical lines.
/// The timestamp is the one carried by the first line.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub level: Level,
}

const PYTHON_CAUSE_MARKER: &str =
    "The above exception was the direct cause of the following exception:";
const PYTHON_CONTEXT_MARKER: &str =
    "During handling of the above exception, another exception occurred:";

/// Reassembles logical messages from a stream of physical lines.
///
/// Stack traces, wrapped exceptions and JSON dumps arrive as runs of lines
/// that belong together. The collector buffers lines, decides on each new
/// line whether it starts a fresh message, and emits assembled messages on
/// a capacity-1 channel. A timer task flushes the buffer once the stream
/// has been idle for longer than the configured timeout.
///
/// All state transitions (`add`, the timer tick, shutdown) serialize on one
/// mutex, which is held across the channel send so that emission order
/// matches arrival order.
pub struct MultilineCollector {
    state: Arc<Mutex<CollectorState>>,
}

struct CollectorState {
    lines: Vec<String>,
    size: usize,
    max_bytes: usize,
    timestamp: Option<DateTime<Utc>>,
    level: Level,
    first_line_has_timestamp: bool,
    last_receive: Instant,
    python_traceback: bool,
    python_traceback_expected: bool,
    closed: bool,
    tx: Option<mpsc::Sender<Message>>,
}

impl MultilineCollector {
    /// Create a collector plus the receiving end of its message channel and
    /// spawn the timer task. The task exits, marks the collector closed and
    /// closes the channel when `shutdown` fires.
    pub fn new(
        shutdown: watch::Receiver<bool>,
        timeout: Duration,
        max_bytes: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(1);
        let state = Arc::new(Mutex::new(CollectorState {
            lines: Vec::new(),
            size: 0,
            max_bytes,
            timestamp: None,
            level: Level::Unknown,
            first_line_has_timestamp: false,
            last_receive: Instant::now(),
            python_traceback: false,
            python_traceback_expected: false,
            closed: false,
            tx: Some(tx),
        }));
        tokio::spawn(dispatch(Arc::clone(&state), shutdown, timeout));
        (MultilineCollector { state }, rx)
    }

    /// Feed one physical line. May emit the previously buffered message
    /// first; the send blocks while the downstream consumer is behind.
    pub async fn add(&self, entry: LogEntry) {
        let mut state = self.state.lock().await;

        let mut content = entry.content;
        if content.ends_with('\n') {
            content.pop();
        }
        if content.is_empty() {
            // Blank lines inside a message are kept, leading blanks dropped.
            if !state.lines.is_empty() {
                state.append(entry.timestamp, content, entry.level);
            }
            return;
        }

        if state.is_next_message(&content) {
            if let Some(msg) = state.take_message() {
                state.emit(msg).await;
            }
        }
        state.append(entry.timestamp, content, entry.level);
    }
}

/// Timer task: flushes the buffer after an idle period and tears the
/// collector down on shutdown.
async fn dispatch(
    state: Arc<Mutex<CollectorState>>,
    mut shutdown: watch::Receiver<bool>,
    timeout: Duration,
) {
    let mut ticker = tokio::time::interval(timeout);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let mut state = state.lock().await;
                state.closed = true;
                // Dropping the sender closes the channel for the consumer.
                state.tx = None;
                debug!("multiline collector closed");
                return;
            }
            _ = ticker.tick() => {
                let mut state = state.lock().await;
                if state.last_receive.elapsed() > timeout {
                    if let Some(msg) = state.take_message() {
                        state.emit(msg).await;
                    }
                }
            }
        }
    }
}

impl CollectorState {
    async fn emit(&mut self, msg: Message) {
        if let Some(tx) = self.tx.clone() {
            let _ = tx.send(msg).await;
        }
    }

    /// Decide whether `line` starts a new logical message (`true`) or
    /// continues the buffered one (`false`). Also advances the Python
    /// traceback sub-state.
    fn is_next_message(&mut self, line: &str) -> bool {
        if line == "}" || line.starts_with('\t') || line.starts_with("  ") {
            return false;
        }

        // A first line with a timestamp pins the strongest rule: only
        // another timestamped line starts the next message.
        if self.first_line_has_timestamp {
            return contains_timestamp(line);
        }

        if line.starts_with("Caused by: ") || line.starts_with("for call at") {
            return false;
        }

        if line.starts_with("Traceback ") {
            self.python_traceback = true;
            if self.python_traceback_expected {
                // A chained exception was announced; this traceback belongs
                // to the buffered message.
                self.python_traceback_expected = false;
                return false;
            }
            return !self.lines.is_empty();
        }
        if line == PYTHON_CAUSE_MARKER || line == PYTHON_CONTEXT_MARKER {
            self.python_traceback_expected = true;
            return false;
        }
        if self.python_traceback {
            // The unindented exception line that terminates a traceback.
            self.python_traceback = false;
            return false;
        }

        true
    }

    fn append(&mut self, timestamp: DateTime<Utc>, content: String, hint: Level) {
        if self.lines.is_empty() {
            self.timestamp = Some(timestamp);
            self.level = guess_level(&content);
            if self.level == Level::Unknown && hint != Level::Unknown {
                self.level = hint;
            }
            self.first_line_has_timestamp = contains_timestamp(&content);
            let line = truncate_to_boundary(content, self.max_bytes);
            self.size = line.len();
            self.lines.push(line);
        } else {
            // One byte per separator, the rest for the line itself. Past
            // the budget the line is cut to fill the remainder exactly;
            // once full, lines are dropped until the next flush.
            let remaining = self.max_bytes.saturating_sub(self.size);
            if remaining > 0 {
                let allowed = remaining - 1;
                let line = if content.len() <= allowed {
                    content
                } else {
                    truncate_to_boundary(content, allowed)
                };
                self.size += 1 + line.len();
                self.lines.push(line);
            }
        }
        self.last_receive = Instant::now();
    }

    /// Assemble the buffered lines into a message and reset the buffer.
    /// Returns `None` when there is nothing to flush or the collector is
    /// closed. The Python traceback flags survive the reset: a flush
    /// triggered by a fresh `Traceback` line must not lose that sub-state.
    fn take_message(&mut self) -> Option<Message> {
        if self.closed || self.lines.is_empty() {
            return None;
        }
        let content = self.lines.join("\n").trim().to_owned();
        let msg = Message {
            timestamp: self.timestamp.take().unwrap_or_else(Utc::now),
            content,
            level: self.level,
        };
        self.lines.clear();
        self.size = 0;
        self.level = Level::Unknown;
        self.first_line_has_timestamp = false;
        Some(msg)
    }
}

fn truncate_to_boundary(mut s: String, limit: usize) -> String {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s
}
