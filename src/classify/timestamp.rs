use regex::Regex;
use std::sync::LazyLock;

/// Only the head of a line is scanned. Timestamps live at the front of a
/// log line; a bounded scan keeps the predicate cheap on pathological input.
const TIMESTAMP_SCAN_LIMIT: usize = 30;

static TIMESTAMP_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(^|\s)\d{2}:\d{2}(:\d{2}[^\s"']*)?"#,
        r"\d{2} [A-Z][a-z]{2} \d{4}",
        r"\d{4}-\d{2}-\d{2}",
        r"\d{4}/\d{2}/\d{2}",
        r"\d{4}\.\d{2}\.\d{2}",
        r"[A-Z][a-z]{2} \d{2}",
        r"\d{2}-\d{2}-\d{4}",
        r"\d{2}/\d{2}/\d{4}",
        r"\d{2}\.\d{2}\.\d{4}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("timestamp pattern must compile"))
    .collect()
});

/// Reports whether the head of `line` contains something shaped like a
/// timestamp. Values are never decoded, this is purely a structural check
/// used by the multi-line collector to spot message boundaries.
pub fn contains_timestamp(line: &str) -> bool {
    let head = prefix(line, TIMESTAMP_SCAN_LIMIT);
    TIMESTAMP_RES.iter().any(|re| re.is_match(head))
}

fn prefix(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates() {
        assert!(contains_timestamp("2005-08-09"));
        assert!(contains_timestamp("2020/06/26"));
        assert!(contains_timestamp("2013.25.02"));
        assert!(contains_timestamp("02/17/2009"));
        assert!(contains_timestamp("25.02.2013"));
        assert!(contains_timestamp("14-11-2019"));
        assert!(contains_timestamp("12 Nov 2019"));
        assert!(contains_timestamp("Nov 12"));
    }

    #[test]
    fn times_and_zones() {
        assert!(contains_timestamp("18:31"));
        assert!(contains_timestamp("18:31:42"));
        assert!(contains_timestamp("18:31:42+03"));
        assert!(contains_timestamp("18:31:42-03"));
        assert!(contains_timestamp("18:31:42+03:30"));
        assert!(contains_timestamp("18:31:42-03:30"));
    }

    #[test]
    fn combined() {
        assert!(contains_timestamp("2005-08-09T18:31:42"));
        assert!(contains_timestamp("2005-08-09T18:31:42+03"));
        assert!(contains_timestamp("2005-08-09T18:31:42-03:30"));
        assert!(contains_timestamp("2005-08-09T18:31:42.201"));
        assert!(contains_timestamp("2024/02/16 15:01:22 http: panic serving"));
    }

    #[test]
    fn negatives() {
        assert!(!contains_timestamp("Traceback (most recent call last):"));
        assert!(!contains_timestamp("goroutine 7 [running]:"));
        assert!(!contains_timestamp("no numbers here"));
        assert!(!contains_timestamp(""));
    }

    #[test]
    fn scan_stops_after_limit() {
        // A timestamp past the scan window is not seen.
        let line = format!("{} 2005-08-09", "x".repeat(TIMESTAMP_SCAN_LIMIT));
        assert!(!contains_timestamp(&line));
    }

    #[test]
    fn limit_respects_char_boundaries() {
        let line = format!("{}é2005-08-09", "x".repeat(TIMESTAMP_SCAN_LIMIT - 1));
        assert!(!contains_timestamp(&line));
    }
}
