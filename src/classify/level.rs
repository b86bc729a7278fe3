use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Severity of a log message.
///
/// The derived ordering runs from least to most severe so that consumers
/// can rank `Critical` output first with a descending sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Unknown,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Unknown => "unknown",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Redis server lines carry a one-character severity marker between the
/// timestamp and the message body.
static REDIS_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}:\d{2}:\d{2}\.\d{3} ([.\-*#]) ").unwrap());

/// Guess the severity of a raw log line from known prefix conventions.
///
/// This is a total function: lines that match no convention are `Unknown`.
/// Recognized forms include glog/klog one-letter prefixes (`I0430 ...`),
/// Redis markers, syslog-style `[error]` brackets, logfmt `level=warn`,
/// three-letter `[06:23:18 DBG]` tags, nginx `[emerg]`/`[alert]`/`[crit]`,
/// and bare severity words such as `ERROR:` in Python logging output.
pub fn guess_level(line: &str) -> Level {
    if let Some(level) = glog_level(line) {
        return level;
    }
    if let Some(level) = redis_level(line) {
        return level;
    }
    line.split(is_delimiter)
        .find_map(keyword_level)
        .unwrap_or(Level::Unknown)
}

/// glog and klog: a single `[IWEF]` letter followed by the four-digit
/// month-day stamp, as in `W0430 11:29:23.177635 1 nanny.go:120]`.
fn glog_level(line: &str) -> Option<Level> {
    let bytes = line.as_bytes();
    if bytes.len() < 5 || !bytes[1..5].iter().all(u8::is_ascii_digit) {
        return None;
    }
    match bytes[0] {
        b'I' => Some(Level::Info),
        b'W' => Some(Level::Warning),
        b'E' => Some(Level::Error),
        b'F' => Some(Level::Critical),
        _ => None,
    }
}

fn redis_level(line: &str) -> Option<Level> {
    let marker = REDIS_MARKER_RE.captures(line)?.get(1)?;
    match marker.as_str() {
        "." => Some(Level::Debug),
        "-" => Some(Level::Info),
        "*" => Some(Level::Warning),
        "#" => Some(Level::Error),
        _ => None,
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | '<' | '>' | ':' | '=' | '.' | ',' | '"')
}

fn keyword_level(token: &str) -> Option<Level> {
    const KEYWORDS: &[(&str, Level)] = &[
        ("trace", Level::Debug),
        ("debug", Level::Debug),
        ("dbg", Level::Debug),
        ("info", Level::Info),
        ("inf", Level::Info),
        ("notice", Level::Info),
        ("warning", Level::Warning),
        ("warn", Level::Warning),
        ("wrn", Level::Warning),
        ("error", Level::Error),
        ("err", Level::Error),
        ("severe", Level::Error),
        ("critical", Level::Critical),
        ("crit", Level::Critical),
        ("fatal", Level::Critical),
        ("ftl", Level::Critical),
        ("emergency", Level::Critical),
        ("emerg", Level::Critical),
        ("alert", Level::Critical),
        ("panic", Level::Critical),
    ];
    KEYWORDS
        .iter()
        .find(|(kw, _)| token.eq_ignore_ascii_case(kw))
        .map(|(_, level)| *level)
}
