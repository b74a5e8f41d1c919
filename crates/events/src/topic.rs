//! Routing-key patterns for topic exchange bindings.
//!
//! A pattern is a dot-delimited list of words where `*` matches exactly one
//! word and `#` matches zero or more words.

use std::fmt;
use std::str::FromStr;

use crate::error::MessagingError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Word(String),
    /// `*`
    One,
    /// `#`
    Any,
}

/// A parsed binding pattern such as `device.*` or `monitoring.#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, MessagingError> {
        let raw = pattern.trim();
        if raw.is_empty() {
            return Err(MessagingError::Config("routing pattern is empty".into()));
        }

        let segments = raw
            .split('.')
            .map(|word| match word {
                "*" => Segment::One,
                "#" => Segment::Any,
                w => Segment::Word(w.to_string()),
            })
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a concrete routing key is selected by this pattern.
    pub fn matches(&self, routing_key: &str) -> bool {
        let words: Vec<&str> = routing_key.split('.').collect();
        match_segments(&self.segments, &words)
    }
}

fn match_segments(pattern: &[Segment], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((Segment::Any, rest)) => {
            match_segments(rest, words)
                || (!words.is_empty() && match_segments(pattern, &words[1..]))
        }
        Some((Segment::One, rest)) => !words.is_empty() && match_segments(rest, &words[1..]),
        Some((Segment::Word(w), rest)) => {
            words.first() == Some(&w.as_str()) && match_segments(rest, &words[1..])
        }
    }
}

impl FromStr for TopicPattern {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
