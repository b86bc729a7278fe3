use md5::{Digest, Md5};
use regex::Regex;
use std::sync::{LazyLock, OnceLock};

const MAX_WORDS: usize = 100;
const MIN_WORD_LEN: usize = 2;
const MAX_WORD_DIFFS: usize = 1;

static HEX_PREFIXED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]+$").unwrap());
static HEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-fA-F0-9]{4,}$").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}$")
        .unwrap()
});

/// The canonical word sequence extracted from a message.
///
/// Two messages that differ only in their variable parts (ids, numbers,
/// quoted values, bracketed context) normalize to the same `Pattern`. The
/// space-joined string form and the MD5 fingerprint are computed once on
/// first use.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    words: Vec<String>,
    str_form: OnceLock<String>,
    fingerprint: OnceLock<String>,
}

impl Pattern {
    /// Normalize a raw message into a pattern.
    pub fn new(input: &str) -> Self {
        let mut words = Vec::new();
        let stripped = strip_quoted_and_bracketed(input);
        for token in stripped.split_whitespace() {
            let token = token.trim_end_matches(['=', ':', ']', ',', ';']);
            if token.len() < MIN_WORD_LEN {
                continue;
            }
            if HEX_PREFIXED_RE.is_match(token) || HEX_RE.is_match(token) || UUID_RE.is_match(token)
            {
                continue;
            }
            let word: String = token.chars().filter(|c| !c.is_ascii_digit()).collect();
            if !is_word(&word) {
                continue;
            }
            words.push(word);
            if words.len() >= MAX_WORDS {
                break;
            }
        }
        Pattern { words, ..Pattern::default() }
    }

    /// Build a pattern from an already-normalized space-separated word list.
    pub fn from_words(input: &str) -> Self {
        Pattern {
            words: input.split(' ').map(str::to_owned).collect(),
            ..Pattern::default()
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// The space-joined string form.
    pub fn as_str(&self) -> &str {
        self.str_form.get_or_init(|| self.words.join(" "))
    }

    /// 32-character lowercase hex MD5 of the string form. MD5 is used for
    /// identifier stability across runs and platforms, not as a security
    /// boundary.
    pub fn fingerprint(&self) -> &str {
        self.fingerprint
            .get_or_init(|| format!("{:x}", Md5::digest(self.as_str().as_bytes())))
    }

    /// Two patterns are weakly equal when their word lists have the same
    /// length and differ in at most one position.
    pub fn weak_equal(&self, other: &Pattern) -> bool {
        if self.words.len() != other.words.len() {
            return false;
        }
        let mut diffs = 0;
        for (a, b) in self.words.iter().zip(&other.words) {
            if a != b {
                diffs += 1;
                if diffs > MAX_WORD_DIFFS {
                    return false;
                }
            }
        }
        true
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Eq for Pattern {}

/// Byte-wise equivalent of matching `^[a-zA-Z][a-zA-Z._-]*[a-zA-Z]$`,
/// without the regex engine on the hot path.
fn is_word(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    if !bytes[0].is_ascii_alphabetic() || !bytes[bytes.len() - 1].is_ascii_alphabetic() {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|&b| b.is_ascii_alphabetic() || b == b'.' || b == b'_' || b == b'-')
}

/// Drop quoted regions and bracketed regions from `s`.
///
/// Brackets `[`, `(`, `{` nest on a stack; a closing bracket only pops a
/// matching top, stray closers pass through as ordinary characters. A
/// single quote state covers `"` and `'`; a quote preceded by a backslash
/// does not toggle it, and quotes are inert while the bracket stack is
/// non-empty.
fn strip_quoted_and_bracketed(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut quote: Option<char> = None;
    let mut brackets: Vec<char> = Vec::new();
    let mut prev: Option<char> = None;

    for c in s.chars() {
        match c {
            '[' | '(' | '{' => {
                if quote.is_none() {
                    brackets.push(c);
                }
            }
            ']' | ')' | '}' => {
                let open = match c {
                    ']' => '[',
                    ')' => '(',
                    _ => '{',
                };
                if brackets.last() == Some(&open) {
                    brackets.pop();
                    prev = Some(c);
                    continue;
                }
            }
            '"' | '\'' => {
                if prev != Some('\\') && brackets.is_empty() {
                    match quote {
                        None => quote = Some(c),
                        Some(q) if q == c => {
                            quote = None;
                            prev = Some(c);
                            continue;
                        }
                        Some(_) => {}
                    }
                }
            }
            _ => {}
        }
        if quote.is_none() && brackets.is_empty() {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}
