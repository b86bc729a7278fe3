use chrono::{DateTime, TimeZone, Utc};
use logdigest::{
    DecodeError, Decoder, Level, LogCounter, LogEntry, Parser, OVERFLOW_PATTERN_HASH,
    UNCLASSIFIED_PATTERN_LABEL,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_millis(10);

fn entry(ts: DateTime<Utc>, content: &str) -> LogEntry {
    LogEntry {
        timestamp: ts,
        content: content.to_owned(),
        level: Level::Unknown,
    }
}

fn base_ts() -> DateTime<Utc> {
    Utc.timestamp_opt(100_500, 0).unwrap()
}

async fn drain(parser: &Parser) -> Vec<LogCounter> {
    // Give the idle timer room to flush the last message and the
    // aggregation worker room to index it.
    tokio::time::sleep(TIMEOUT * 10).await;
    parser.get_counters()
}

#[tokio::test]
async fn groups_messages_by_pattern_and_level() {
    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(rx, None, None, TIMEOUT, 16);

    for content in [
        "error alpha beta gamma",
        "error alpha beta delta",
        "I0430 11:58:31.792717       1 cluster.go:337] memberlist sync",
    ] {
        tx.send(entry(base_ts(), content)).await.expect("pipeline is running");
    }

    let mut counters = drain(&parser).await;
    parser.stop();

    counters.sort_by(|a, b| b.level.cmp(&a.level));
    assert_eq!(2, counters.len());

    // The two error messages differ in one word and merge under the first
    // pattern's key.
    assert_eq!(Level::Error, counters[0].level);
    assert_eq!(2, counters[0].messages);
    assert_eq!("error alpha beta gamma", counters[0].sample);
    assert_eq!(32, counters[0].hash.len());

    // Info traffic is counted by level only.
    assert_eq!(Level::Info, counters[1].level);
    assert_eq!(1, counters[1].messages);
    assert!(counters[1].hash.is_empty());
    assert!(counters[1].sample.is_empty());
}

#[tokio::test]
async fn cardinality_cap_funnels_overflow() {
    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(rx, None, None, TIMEOUT, 2);

    let msgs = [
        "error alpha beta gamma",
        "error delta epsilon zeta",
        "error eta theta iota",
        "error kappa lambda mu",
    ];
    for content in msgs {
        tx.send(entry(base_ts(), content)).await.expect("pipeline is running");
    }

    let mut counters = drain(&parser).await;
    parser.stop();

    counters.sort_by(|a, b| a.sample.cmp(&b.sample));
    assert_eq!(3, counters.len());
    assert_eq!(msgs[0], counters[0].sample);
    assert_eq!(msgs[1], counters[1].sample);

    let overflow = &counters[2];
    assert_eq!(UNCLASSIFIED_PATTERN_LABEL, overflow.sample);
    assert_eq!(OVERFLOW_PATTERN_HASH, overflow.hash);
    assert_eq!(2, overflow.messages);
}

#[tokio::test]
async fn sample_reproduces_key_hash() {
    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(rx, None, None, TIMEOUT, 16);

    tx.send(entry(base_ts(), "error reading file /tmp/data1 attempt 3"))
        .await
        .expect("pipeline is running");

    let counters = drain(&parser).await;
    parser.stop();

    assert_eq!(1, counters.len());
    let rebuilt = logdigest::Pattern::new(&counters[0].sample);
    assert_eq!(rebuilt.fingerprint(), counters[0].hash);
}

struct RejectingDecoder;

impl Decoder for RejectingDecoder {
    fn decode(&self, raw: &str) -> Result<String, DecodeError> {
        if raw.contains("binary") {
            return Err(DecodeError::Malformed("not a text frame".to_owned()));
        }
        Ok(raw.to_owned())
    }
}

#[tokio::test]
async fn decoder_failures_drop_single_entries() {
    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(rx, Some(Box::new(RejectingDecoder)), None, TIMEOUT, 16);

    tx.send(entry(base_ts(), "error alpha beta gamma")).await.expect("pipeline is running");
    tx.send(entry(base_ts(), "binary error payload here")).await.expect("pipeline is running");
    tx.send(entry(base_ts(), "error alpha beta delta")).await.expect("pipeline is running");

    let counters = drain(&parser).await;
    parser.stop();

    assert_eq!(1, counters.len());
    assert_eq!(2, counters[0].messages);
}

#[tokio::test]
async fn callback_observes_every_message() {
    let seen: Arc<Mutex<Vec<(DateTime<Utc>, Level, String, String)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(
        rx,
        None,
        Some(Box::new(move |ts, level, hash, content| {
            sink.lock().unwrap().push((ts, level, hash.to_owned(), content.to_owned()));
        })),
        TIMEOUT,
        16,
    );

    tx.send(entry(base_ts(), "error alpha beta gamma")).await.expect("pipeline is running");
    tx.send(entry(base_ts(), "just some chatter")).await.expect("pipeline is running");

    drain(&parser).await;
    parser.stop();

    let seen = seen.lock().unwrap();
    assert_eq!(2, seen.len());

    let (ts, level, hash, content) = &seen[0];
    assert_eq!(base_ts(), *ts);
    assert_eq!(Level::Error, *level);
    assert_eq!(32, hash.len());
    assert_eq!("error alpha beta gamma", content);

    let (_, level, hash, _) = &seen[1];
    assert_eq!(Level::Unknown, *level);
    assert!(hash.is_empty());
}

#[tokio::test]
async fn level_hint_applies_to_unclassified_lines() {
    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(rx, None, None, TIMEOUT, 16);

    let mut hinted = entry(base_ts(), "plain worker chatter line");
    hinted.level = Level::Error;
    tx.send(hinted).await.expect("pipeline is running");

    let counters = drain(&parser).await;
    parser.stop();

    assert_eq!(1, counters.len());
    assert_eq!(Level::Error, counters[0].level);
    assert_eq!("plain worker chatter line", counters[0].sample);
}

#[tokio::test]
async fn stop_shuts_the_pipeline_down() {
    let (tx, rx) = mpsc::channel(16);
    let parser = Parser::new(rx, None, None, TIMEOUT, 16);

    tx.send(entry(base_ts(), "error alpha beta gamma")).await.expect("pipeline is running");
    let counters = drain(&parser).await;
    assert_eq!(1, counters.len());

    parser.stop();
    tokio::time::sleep(TIMEOUT * 3).await;

    // The ingestion worker is gone, so the channel reports closure.
    assert!(tx.send(entry(base_ts(), "late")).await.is_err());
    // Snapshots keep working after shutdown.
    assert_eq!(1, parser.get_counters().len());
}
