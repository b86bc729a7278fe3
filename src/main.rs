use chrono::Utc;
use clap::Parser;
use console::Style;
use logdigest::{Level, LogCounter, LogEntry, DEFAULT_COLLECTOR_TIMEOUT};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logdigest")]
#[command(about = "Summarize a log stream from stdin into per-pattern counters", long_about = None)]
struct Cli {
    /// Terminal width used for the bar chart
    #[arg(short = 'w', long, default_value_t = 120)]
    width: usize,

    /// Maximum lines printed per sample
    #[arg(short = 'l', long = "max-lines", default_value_t = 100)]
    max_lines: usize,

    /// Print the snapshot as JSON instead of a chart
    #[arg(long)]
    json: bool,
}

const PATTERNS_PER_LEVEL_LIMIT: usize = 256;
const BAR_WIDTH: usize = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logdigest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (tx, rx) = mpsc::channel(1024);
    let parser = logdigest::Parser::new(
        rx,
        None,
        None,
        DEFAULT_COLLECTOR_TIMEOUT,
        PATTERNS_PER_LEVEL_LIMIT,
    );

    let started = Instant::now();
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let Ok(content) = std::str::from_utf8(&buf) else {
            debug!("dropping non-UTF-8 line");
            continue;
        };
        let entry = LogEntry {
            timestamp: Utc::now(),
            content: content.to_owned(),
            level: Level::Unknown,
        };
        if tx.send(entry).await.is_err() {
            break;
        }
    }
    let elapsed = started.elapsed();

    drop(tx);
    // Let the idle timer flush the last buffered message.
    tokio::time::sleep(DEFAULT_COLLECTOR_TIMEOUT * 3).await;

    let mut counters = parser.get_counters();
    parser.stop();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&counters)?);
        return Ok(());
    }

    order(&mut counters);
    output(&counters, cli.width, cli.max_lines, elapsed);
    Ok(())
}

/// Most severe level first, busiest pattern first within a level.
fn order(counters: &mut [LogCounter]) {
    counters.sort_by(|a, b| b.level.cmp(&a.level).then(b.messages.cmp(&a.messages)));
}

fn output(counters: &[LogCounter], screen_width: usize, max_lines: usize, elapsed: Duration) {
    let grand_total: u64 = counters.iter().map(|c| c.messages).sum();
    let with_sample: Vec<&LogCounter> =
        counters.iter().filter(|c| !c.sample.is_empty()).collect();
    let total: u64 = with_sample.iter().map(|c| c.messages).sum();
    let max = with_sample.iter().map(|c| c.messages).max().unwrap_or(0);

    let line_width = screen_width.saturating_sub(BAR_WIDTH).max(16);
    let digits = max.to_string().len();

    for c in &with_sample {
        let w = (c.messages * BAR_WIDTH as u64 / max) as usize;
        let bar = format!("{}{}", "▇".repeat(w + 1), " ".repeat(BAR_WIDTH - w));
        let pct = c.messages * 100 / total;
        let prefix = format!("{bar} {:>digits$} ({pct:>2}%) ", c.messages);
        let indent = " ".repeat(prefix.chars().count());

        let mut sample = String::new();
        for (i, line) in c.sample.lines().enumerate() {
            if i > max_lines {
                sample.push_str("...\n");
                break;
            }
            if line.chars().count() > line_width {
                let cut: String = line.chars().take(line_width).collect();
                sample.push_str(&cut);
                sample.push_str("...");
            } else {
                sample.push_str(line);
            }
            sample.push('\n');
            sample.push_str(&indent);
        }
        let sample = sample.trim_end_matches([' ', '\n']);
        println!("{}{sample}", level_style(c.level).apply_to(prefix));
    }

    let mut by_level: HashMap<Level, u64> = HashMap::new();
    for c in counters {
        *by_level.entry(c.level).or_insert(0) += c.messages;
    }
    let mut by_level: Vec<(Level, u64)> = by_level.into_iter().collect();
    by_level.sort_by(|a, b| b.0.cmp(&a.0));

    println!();
    println!(
        "{grand_total} messages processed in {:.3} seconds:",
        elapsed.as_secs_f64()
    );
    for (level, count) in by_level {
        println!("  {level}: {count}");
    }
    println!();
}

fn level_style(level: Level) -> Style {
    match level {
        Level::Critical | Level::Error => Style::new().red(),
        Level::Warning => Style::new().yellow(),
        Level::Info => Style::new().green(),
        Level::Debug | Level::Unknown => Style::new().white(),
    }
}
