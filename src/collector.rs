//! Response collection for the two reply shapes backends use.
//!
//! Single-object replies are decoded once. Streamed replies arrive as
//! newline-delimited JSON fragments, each carrying an incremental piece of the
//! message; fragments that fail to parse are skipped with a warning.

use crate::error::{RelayError, Result};
use futures::{Stream, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use std::fmt::Display;

/// Top-level single-object reply (`candidates[0].content.parts[*].text`)
#[derive(Debug, Deserialize)]
pub struct CandidatesResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One line of a streamed reply
#[derive(Debug, Deserialize)]
struct StreamFragment {
    #[serde(default)]
    message: Option<FragmentMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct FragmentMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

/// Concatenates the text parts of the first candidate.
///
/// `status` is the HTTP status the body arrived with, used when the body
/// carries an application-level error instead of candidates.
pub fn collect_single(body: &[u8], status: u16) -> Result<String> {
    let response: CandidatesResponse =
        serde_json::from_slice(body).map_err(|e| RelayError::Decode(e.to_string()))?;

    let Some(first) = response.candidates.into_iter().next() else {
        let (code, message) = match response.error {
            Some(err) => (
                err.code.unwrap_or(status),
                err.message.unwrap_or_else(|| "Unknown error".to_string()),
            ),
            None => (status, "Unknown error".to_string()),
        };
        return Err(RelayError::Backend {
            status: code,
            message,
        });
    };

    let text = first
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(text)
}

/// Accumulates line-delimited fragments from a byte stream into one string.
///
/// Transport errors mid-stream become [`RelayError::Connection`]. A body that
/// yields no parseable fragment at all is a [`RelayError::Decode`].
pub async fn collect_stream<S, B, E>(body: S, status: u16) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::pin_mut!(body);
    let mut buffer: Vec<u8> = Vec::new();
    let mut collector = FragmentCollector::new(status);

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| RelayError::Connection(e.to_string()))?;
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            collector.push_line(&line[..line.len() - 1])?;
        }
    }

    // The final fragment may arrive without a trailing newline
    if !buffer.is_empty() {
        collector.push_line(&buffer)?;
    }

    collector.finish()
}

struct FragmentCollector {
    status: u16,
    text: String,
    fragments: usize,
    skipped: usize,
}

impl FragmentCollector {
    fn new(status: u16) -> Self {
        FragmentCollector {
            status,
            text: String::new(),
            fragments: 0,
            skipped: 0,
        }
    }

    fn push_line(&mut self, raw: &[u8]) -> Result<()> {
        let line = match std::str::from_utf8(raw) {
            Ok(s) => s.trim(),
            Err(e) => {
                warn!("Invalid UTF-8 in stream line, skipping: {e}");
                self.skipped += 1;
                return Ok(());
            }
        };
        if line.is_empty() {
            return Ok(());
        }

        let fragment: StreamFragment = match serde_json::from_str(line) {
            Ok(f) => f,
            Err(e) => {
                warn!("Invalid JSON line in stream, skipping: {e}: {line}");
                self.skipped += 1;
                return Ok(());
            }
        };

        if let Some(message) = fragment.error {
            return Err(RelayError::Backend {
                status: self.status,
                message,
            });
        }

        self.fragments += 1;
        if let Some(message) = fragment.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                debug!("Thinking fragment ({} chars)", thinking.len());
            }
            self.text.push_str(&message.content);
        }
        if fragment.done {
            debug!("Stream reported done after {} fragments", self.fragments);
        }
        Ok(())
    }

    fn finish(self) -> Result<String> {
        if self.fragments == 0 {
            return Err(RelayError::Decode(format!(
                "no message fragments in response ({} malformed lines)",
                self.skipped
            )));
        }
        Ok(self.text)
    }
}
