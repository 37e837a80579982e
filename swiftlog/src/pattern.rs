//! Rendering of the full log line around the message body
//!
//! A pattern is a literal string with `%(name)` tokens, e.g.
//! `"%(time) [%(thread_id)] %(source_location) %(level) %(logger) %(message)"`.
//! Formatters are stateless given their configuration and are shared between
//! every logger with the same (pattern, time pattern, timezone) triple; the
//! backend caches them by weak reference so they live exactly as long as the
//! last logger using them.

use crate::sink::RecordContext;
use chrono::{Local, TimeZone, Utc};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timezone {
    Utc,
    Local,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Literal(String),
    Time,
    Level,
    LoggerName,
    ThreadId,
    ThreadName,
    ProcessId,
    SourceLocation,
    Message,
}

pub struct PatternFormatter {
    pattern: String,
    time_pattern: String,
    timezone: Timezone,
    tokens: Vec<Token>,
}

impl PatternFormatter {
    pub fn new(pattern: &str, time_pattern: &str, timezone: Timezone) -> Self {
        Self {
            pattern: pattern.to_owned(),
            time_pattern: time_pattern.to_owned(),
            timezone,
            tokens: Self::parse(pattern),
        }
    }

    fn parse(pattern: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;
        while let Some(pos) = rest.find("%(") {
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 2..];
            match after.find(')') {
                Some(close) => {
                    let token = match &after[..close] {
                        "time" => Some(Token::Time),
                        "level" => Some(Token::Level),
                        "logger" => Some(Token::LoggerName),
                        "thread_id" => Some(Token::ThreadId),
                        "thread_name" => Some(Token::ThreadName),
                        "process_id" => Some(Token::ProcessId),
                        "source_location" => Some(Token::SourceLocation),
                        "message" => Some(Token::Message),
                        // unknown names pass through verbatim
                        _ => None,
                    };
                    match token {
                        Some(token) => {
                            if !literal.is_empty() {
                                tokens.push(Token::Literal(std::mem::take(&mut literal)));
                            }
                            tokens.push(token);
                        }
                        None => literal.push_str(&rest[pos..pos + 2 + close + 1]),
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    literal.push_str(&rest[pos..]);
                    rest = "";
                    break;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        tokens
    }

    /// Cache-key comparison used by the backend's formatter cache.
    pub fn matches(&self, pattern: &str, time_pattern: &str, timezone: Timezone) -> bool {
        self.pattern == pattern && self.time_pattern == time_pattern && self.timezone == timezone
    }

    pub fn format_pattern(&self) -> &str {
        &self.pattern
    }

    /// Render the full line into `out` (cleared first).
    pub fn format(&self, out: &mut String, record: &RecordContext<'_>, message: &str) {
        out.clear();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Time => self.format_timestamp(out, record.timestamp_ns),
                Token::Level => out.push_str(record.level.as_str()),
                Token::LoggerName => out.push_str(record.logger_name),
                Token::ThreadId => {
                    let _ = write!(out, "{}", record.thread_id);
                }
                Token::ThreadName => out.push_str(record.thread_name),
                Token::ProcessId => out.push_str(record.process_id),
                Token::SourceLocation => out.push_str(&record.metadata.short_source_location()),
                Token::Message => out.push_str(message),
            }
        }
    }

    fn format_timestamp(&self, out: &mut String, timestamp_ns: u64) {
        let seconds = (timestamp_ns / 1_000_000_000) as i64;
        let nanos = (timestamp_ns % 1_000_000_000) as u32;
        match self.timezone {
            Timezone::Utc => {
                if let Some(time) = Utc.timestamp_opt(seconds, nanos).single() {
                    let _ = write!(out, "{}", time.format(&self.time_pattern));
                }
            }
            Timezone::Local => {
                if let Some(time) = Local.timestamp_opt(seconds, nanos).single() {
                    let _ = write!(out, "{}", time.format(&self.time_pattern));
                }
            }
        }
    }
}
