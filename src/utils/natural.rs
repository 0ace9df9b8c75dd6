use std::cmp::Ordering;

/// One run of a file name: either text (compared case-insensitively) or ASCII digits.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Text(String),
    Number(Digits),
}

/// Digit run with leading zeros stripped, so that comparison is numeric for any length.
#[derive(Debug, PartialEq, Eq)]
struct Digits(String);

impl Digits {
    fn new(raw: &str) -> Self {
        Digits(raw.trim_start_matches('0').to_string())
    }
}

impl Ord for Digits {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Digits {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Keys always alternate text/number and start and end with text, so a Text
// chunk is never compared against a Number chunk.
fn chunks(name: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut text = String::new();
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if !c.is_ascii_digit() {
            text.push(c);
            continue;
        }
        out.push(Chunk::Text(std::mem::take(&mut text).to_lowercase()));
        let mut digits = String::from(c);
        while let Some(&next) = chars.peek() {
            if !next.is_ascii_digit() {
                break;
            }
            digits.push(next);
            chars.next();
        }
        out.push(Chunk::Number(Digits::new(&digits)));
    }
    out.push(Chunk::Text(text.to_lowercase()));
    out
}

/// Compares two names in natural order: `img2` sorts before `img10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    chunks(a).cmp(&chunks(b))
}

/// Stable in-place natural sort.
pub fn sort_natural<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}
