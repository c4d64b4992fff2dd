use super::EventSource;
use std::fmt;

const DELIMITER: char = '.';
const ESCAPE: char = '\\';

/// Broker subject on which events with equal coordinates are published and consumed
///
/// Each coordinate becomes one token. Within a token the escape character is escaped first and
/// the delimiter afterwards, so that distinct coordinate tuples never collide after joining.
/// There is intentionally no decoding, producers and consumers both derive the subject from
/// the same coordinates and compare the results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    /// Derives the subject from the full set of event coordinates
    pub fn encode(source: &EventSource, event_type: &str, event_type_version: &str) -> Self {
        Self::from_tokens(&[
            source.environment.as_str(),
            source.namespace.as_str(),
            source.source_type.as_str(),
            event_type,
            event_type_version,
        ])
    }

    /// Escapes and joins arbitrary tokens
    pub fn from_tokens(tokens: &[&str]) -> Self {
        let encoded: Vec<String> = tokens.iter().map(|token| escape(token)).collect();
        Self(encoded.join(&DELIMITER.to_string()))
    }

    /// Textual representation used on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn escape(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());

    for character in token.chars() {
        if character == ESCAPE || character == DELIMITER {
            escaped.push(ESCAPE);
        }
        escaped.push(character);
    }

    escaped
}
