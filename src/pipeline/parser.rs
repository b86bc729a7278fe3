use crate::classify::Level;
use crate::pattern::Pattern;
use crate::pipeline::collector::{
    LogEntry, Message, MultilineCollector, DEFAULT_MAX_MESSAGE_BYTES,
};
use crate::pipeline::decoder::Decoder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Sample shown for messages routed to the per-level overflow bucket.
pub const UNCLASSIFIED_PATTERN_LABEL: &str = "unclassified pattern (pattern limit reached)";

/// Key hash of the overflow bucket. Real fingerprints are MD5 output, so
/// the all-zeros string cannot collide in practice.
pub const OVERFLOW_PATTERN_HASH: &str = "00000000000000000000000000000000";

/// Observer invoked for every aggregated message with its timestamp,
/// level, pattern hash (empty for levels that are not fingerprinted) and
/// assembled content.
pub type MessageCallback = dyn Fn(DateTime<Utc>, Level, &str, &str) + Send + Sync;

/// One row of the aggregation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogCounter {
    pub level: Level,
    pub hash: String,
    pub sample: String,
    pub messages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PatternKey {
    level: Level,
    hash: String,
}

#[derive(Debug, Default)]
struct PatternStat {
    pattern: Option<Pattern>,
    sample: String,
    messages: u64,
}

/// Streaming log digest engine.
///
/// Consumes `LogEntry` values from a channel, reassembles multi-line
/// messages, and aggregates them into a per-(level, pattern) index with a
/// bounded number of distinct patterns per level. Two workers service the
/// stream; `stop` cancels both plus the collector's timer task.
pub struct Parser {
    index: Arc<RwLock<PatternIndex>>,
    shutdown: watch::Sender<bool>,
}

impl Parser {
    /// Spawn the pipeline over `entries`.
    ///
    /// `decoder` preprocesses each line (a failed decode drops the entry),
    /// `on_message` observes every aggregated message, `collector_timeout`
    /// bounds how long a partially assembled message may sit idle, and
    /// `patterns_per_level_limit` caps the distinct patterns tracked per
    /// level before overflow. Must be called from within a Tokio runtime.
    pub fn new(
        entries: mpsc::Receiver<LogEntry>,
        decoder: Option<Box<dyn Decoder>>,
        on_message: Option<Box<MessageCallback>>,
        collector_timeout: Duration,
        patterns_per_level_limit: usize,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (collector, messages) =
            MultilineCollector::new(shutdown_rx, collector_timeout, DEFAULT_MAX_MESSAGE_BYTES);

        let index = Arc::new(RwLock::new(PatternIndex::new(
            patterns_per_level_limit,
            on_message,
        )));

        tokio::spawn(run_ingestion(
            entries,
            decoder,
            collector,
            shutdown.subscribe(),
        ));
        tokio::spawn(run_aggregation(messages, Arc::clone(&index), shutdown.subscribe()));

        Parser { index, shutdown }
    }

    /// Snapshot the current aggregation state. Order is unspecified.
    pub fn get_counters(&self) -> Vec<LogCounter> {
        self.index.read().unwrap().counters()
    }

    /// Cancel the workers and the collector. Buffered but unflushed lines
    /// are discarded.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Feeds decoded entries into the collector.
async fn run_ingestion(
    mut entries: mpsc::Receiver<LogEntry>,
    decoder: Option<Box<dyn Decoder>>,
    collector: MultilineCollector,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            entry = entries.recv() => {
                let Some(mut entry) = entry else { break };
                if let Some(decoder) = &decoder {
                    match decoder.decode(&entry.content) {
                        Ok(decoded) => entry.content = decoded,
                        Err(err) => {
                            debug!(error = %err, "dropping entry, decode failed");
                            continue;
                        }
                    }
                }
                collector.add(entry).await;
            }
        }
    }
    debug!("ingestion worker stopped");
}

/// Drains assembled messages into the pattern index.
async fn run_aggregation(
    mut messages: mpsc::Receiver<Message>,
    index: Arc<RwLock<PatternIndex>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = messages.recv() => {
                let Some(msg) = msg else { break };
                index.write().unwrap().inc(msg);
            }
        }
    }
    debug!("aggregation worker stopped");
}

/// The aggregation index: (level, pattern hash) to accumulator, with a cap
/// on distinct fingerprinted patterns per level.
struct PatternIndex {
    patterns: HashMap<PatternKey, PatternStat>,
    per_level: HashMap<Level, usize>,
    limit: usize,
    on_message: Option<Box<MessageCallback>>,
}

impl PatternIndex {
    fn new(limit: usize, on_message: Option<Box<MessageCallback>>) -> Self {
        PatternIndex {
            patterns: HashMap::new(),
            per_level: HashMap::new(),
            limit,
            on_message,
        }
    }

    fn inc(&mut self, msg: Message) {
        // Low-severity traffic is counted per level, never fingerprinted.
        if matches!(msg.level, Level::Unknown | Level::Debug | Level::Info) {
            let key = PatternKey { level: msg.level, hash: String::new() };
            self.patterns.entry(key).or_default().messages += 1;
            if let Some(cb) = &self.on_message {
                cb(msg.timestamp, msg.level, "", &msg.content);
            }
            return;
        }

        let pattern = Pattern::new(&msg.content);
        let key = self.stat_key(msg.level, pattern, &msg.content);
        if let Some(cb) = &self.on_message {
            cb(msg.timestamp, msg.level, &key.hash, &msg.content);
        }
        if let Some(stat) = self.patterns.get_mut(&key) {
            stat.messages += 1;
        }
    }

    /// Resolve the key under which this pattern is counted, inserting a new
    /// stat when the pattern is unseen and the level still has room.
    fn stat_key(&mut self, level: Level, pattern: Pattern, sample: &str) -> PatternKey {
        let exact = PatternKey { level, hash: pattern.fingerprint().to_owned() };
        if self.patterns.contains_key(&exact) {
            return exact;
        }

        // Near-miss lookup: an existing pattern one word apart absorbs
        // this message under its own key.
        for (key, stat) in &self.patterns {
            if key.level != level {
                continue;
            }
            let Some(existing) = &stat.pattern else { continue };
            if existing.weak_equal(&pattern) {
                return key.clone();
            }
        }

        let tracked = self.per_level.get(&level).copied().unwrap_or(0);
        if tracked >= self.limit {
            let key = PatternKey { level, hash: OVERFLOW_PATTERN_HASH.to_owned() };
            self.patterns.entry(key.clone()).or_insert_with(|| PatternStat {
                pattern: None,
                sample: UNCLASSIFIED_PATTERN_LABEL.to_owned(),
                messages: 0,
            });
            return key;
        }

        self.patterns.insert(
            exact.clone(),
            PatternStat {
                pattern: Some(pattern),
                sample: sample.to_owned(),
                messages: 0,
            },
        );
        *self.per_level.entry(level).or_insert(0) += 1;
        exact
    }

    fn counters(&self) -> Vec<LogCounter> {
        self.patterns
            .iter()
            .map(|(key, stat)| LogCounter {
                level: key.level,
                hash: key.hash.clone(),
                sample: stat.sample.clone(),
                messages: stat.messages,
            })
            .collect()
    }
}
