//! Prompt matching over an interactive terminal
//!
//! [`Expect`] buffers everything a [`Terminal`] prints and waits for the first
//! of several regex patterns to appear, the same way a person watches a
//! terminal for a prompt. Bastion menus have no machine interface, so every
//! step of the relayed session is driven through this.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use russh::client;
use russh::{Channel, ChannelMsg};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{JumpSshError, Result};

/// Bytes of buffered output quoted in error messages
const ERROR_TAIL_CHARS: usize = 500;

/// Already-searched output that is searched again when new output arrives,
/// so a match split across chunks is still found
const RESCAN_BYTES: usize = 256;

/// An interactive byte stream (a PTY shell channel)
#[async_trait]
pub trait Terminal: Send {
    /// Write raw bytes as if typed
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Next piece of output, `Ok(None)` once the remote side has closed
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Send EOF and close; errors are ignored
    async fn close(&mut self);
}

/// A successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Index of the pattern that matched
    pub index: usize,

    /// Output preceding the match
    pub before: String,

    /// The matched text itself
    pub text: String,
}

/// Buffered pattern matcher over a [`Terminal`]
pub struct Expect<T: Terminal> {
    terminal: T,
    buffer: String,
}

impl<T: Terminal> Expect<T> {
    /// Wrap a terminal
    pub fn new(terminal: T) -> Self {
        Self {
            terminal,
            buffer: String::new(),
        }
    }

    /// Send text without a line ending
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.terminal.send(text.as_bytes()).await
    }

    /// Send text followed by `\n`
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        self.terminal.send(format!("{}\n", text).as_bytes()).await
    }

    /// Output received but not yet consumed by a match
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Give back the wrapped terminal
    pub fn into_inner(self) -> T {
        self.terminal
    }

    /// Wait until one of `patterns` appears in the output
    ///
    /// When several patterns match, the one starting earliest wins; ties go to
    /// the pattern listed first. Output up to the end of the match is
    /// consumed.
    ///
    /// # Returns
    /// * `Ok(Some(Matched))` - A pattern matched within `limit`
    /// * `Ok(None)` - Nothing matched within `limit`; the buffer is kept
    /// * `Err(JumpSshError::SessionIo)` - The terminal closed or failed
    pub async fn expect(&mut self, patterns: &[&Regex], limit: Duration) -> Result<Option<Matched>> {
        // A limit too large to represent waits without a deadline
        let deadline = Instant::now().checked_add(limit);
        let mut scan_from = 0;

        loop {
            if let Some(found) = self.take_match(patterns, scan_from) {
                return Ok(Some(found));
            }
            scan_from = rescan_start(&self.buffer);

            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    match tokio::time::timeout(remaining, self.terminal.recv()).await {
                        Ok(received) => received,
                        Err(_) => return Ok(None),
                    }
                }
                None => self.terminal.recv().await,
            };

            match received {
                Ok(Some(chunk)) => self.buffer.push_str(&chunk),
                Ok(None) => {
                    return Err(JumpSshError::session_io(format!(
                        "session closed unexpectedly, last output: {:?}",
                        tail(&self.buffer)
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn take_match(&mut self, patterns: &[&Regex], from: usize) -> Option<Matched> {
        let (index, start, end) = patterns
            .iter()
            .enumerate()
            .filter_map(|(i, re)| re.find_at(&self.buffer, from).map(|m| (i, m.start(), m.end())))
            .min_by_key(|&(i, start, _)| (start, i))?;

        let before = self.buffer[..start].to_string();
        let text = self.buffer[start..end].to_string();
        self.buffer.drain(..end);

        debug!("matched pattern {} ({:?})", index, text);
        Some(Matched {
            index,
            before,
            text,
        })
    }
}

/// Where the next search starts once everything in `buffer` failed to match
fn rescan_start(buffer: &str) -> usize {
    let mut start = buffer.len().saturating_sub(RESCAN_BYTES);
    while !buffer.is_char_boundary(start) {
        start -= 1;
    }
    start
}

/// UTF-8 decoding of a chunked byte stream
///
/// A multibyte character split across two chunks is held back until its
/// remaining bytes arrive. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `data`, returning every complete character received so far
    pub fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut text = String::new();

        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), e.error_len()),
            };
            text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));

            match invalid {
                Some(len) => {
                    text.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    // Whatever is left is the start of an incomplete character
                    self.pending.drain(..valid);
                    return text;
                }
            }
        }
    }

    /// Flush bytes still held back once the stream has ended
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Last few hundred characters of `text`, for error messages
pub fn tail(text: &str) -> &str {
    let count = text.chars().count();
    if count <= ERROR_TAIL_CHARS {
        return text;
    }
    let skip = count - ERROR_TAIL_CHARS;
    let offset = text
        .char_indices()
        .nth(skip)
        .map_or(text.len(), |(offset, _)| offset);
    &text[offset..]
}

/// PTY shell channel on an SSH session
pub struct PtyTerminal {
    channel: Channel<client::Msg>,
    decoder: Utf8Stream,
}

impl PtyTerminal {
    /// Wrap a channel that already has a PTY and a shell
    pub fn new(channel: Channel<client::Msg>) -> Self {
        Self {
            channel,
            decoder: Utf8Stream::new(),
        }
    }
}

#[async_trait]
impl Terminal for PtyTerminal {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| JumpSshError::session_io(format!("Failed to send to terminal: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            let text = match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.decoder.decode(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => self.decoder.decode(&data),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    let rest = self.decoder.finish();
                    return Ok((!rest.is_empty()).then_some(rest));
                }
                Some(_) => continue,
            };
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeTerminal;
    use super::*;

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[tokio::test]
    async fn test_expect_across_chunks() {
        let term = FakeTerminal::new(&["Welcome\r\nO", "pt> "], vec![]);
        let mut exp = Expect::new(term);
        let opt = re("Opt>");

        let found = exp.expect(&[&opt], Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(found.before, "Welcome\r\n");
        assert_eq!(found.text, "Opt>");
        assert_eq!(exp.pending(), " ");
    }

    #[tokio::test]
    async fn test_expect_earliest_match_wins() {
        let term = FakeTerminal::new(&["[Host]> ... Opt>"], vec![]);
        let mut exp = Expect::new(term);
        let opt = re("Opt>");
        let host = re(r"\[Host\]>");

        let found = exp
            .expect(&[&opt, &host], Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.index, 1);
    }

    #[tokio::test]
    async fn test_expect_timeout_keeps_buffer() {
        let term = FakeTerminal::new(&["partial output"], vec![]);
        let mut exp = Expect::new(term);
        let opt = re("Opt>");

        let found = exp.expect(&[&opt], Duration::from_millis(50)).await.unwrap();
        assert!(found.is_none());
        assert_eq!(exp.pending(), "partial output");
    }

    #[tokio::test]
    async fn test_expect_closed_session() {
        let term = FakeTerminal::new(&["bye"], vec![]).closing();
        let mut exp = Expect::new(term);
        let opt = re("Opt>");

        let err = exp.expect(&[&opt], Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), "SessionIOError");
        assert!(err.to_string().contains("bye"));
    }

    #[tokio::test]
    async fn test_send_releases_replies() {
        let term = FakeTerminal::new(&[], vec![vec!["pong\r\n"]]);
        let sent = term.sent.clone();
        let mut exp = Expect::new(term);
        let pong = re("pong");

        exp.send_line("ping").await.unwrap();
        let found = exp.expect(&[&pong], Duration::from_secs(1)).await.unwrap();
        assert!(found.is_some());
        assert_eq!(sent.lock().unwrap().as_slice(), ["ping\n"]);
    }

    #[tokio::test]
    async fn test_expect_unbounded_limit() {
        let term = FakeTerminal::new(&["$ "], vec![]);
        let mut exp = Expect::new(term);
        let prompt = re(r"\$\s");

        let found = exp
            .expect(&[&prompt], Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_expect_match_split_after_long_output() {
        let filler = "x".repeat(1024);
        let mut chunks: Vec<&str> = vec![filler.as_str(); 64];
        chunks.push("JUMP_E");
        chunks.push("ND_1:0\r\n");
        let term = FakeTerminal::new(&chunks, vec![]);
        let mut exp = Expect::new(term);
        let marker = re(r"JUMP_END_1:(\d+)\r?\n");

        let found = exp.expect(&[&marker], Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(found.text, "JUMP_END_1:0\r\n");
        assert_eq!(found.before.len(), 64 * 1024);
    }

    #[test]
    fn test_rescan_start_is_char_boundary() {
        let text = "部".repeat(200);
        let start = rescan_start(&text);
        assert!(text.is_char_boundary(start));
        assert!(text.len() - start >= RESCAN_BYTES);
        assert_eq!(rescan_start("short"), 0);
    }

    #[test]
    fn test_utf8_stream_joins_split_characters() {
        let bytes = "部署完成".as_bytes();
        let mut stream = Utf8Stream::new();

        let first = stream.decode(&bytes[..4]);
        let second = stream.decode(&bytes[4..]);
        assert_eq!(first, "部");
        assert_eq!(format!("{}{}", first, second), "部署完成");
        assert_eq!(stream.finish(), "");
    }

    #[test]
    fn test_utf8_stream_byte_at_a_time() {
        let mut stream = Utf8Stream::new();
        let decoded: String = "ok 完成\n".bytes().map(|b| stream.decode(&[b])).collect();
        assert_eq!(decoded, "ok 完成\n");
    }

    #[test]
    fn test_utf8_stream_invalid_and_truncated() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.decode(b"a\xffb"), "a\u{fffd}b");
        assert_eq!(stream.decode(&"完".as_bytes()[..2]), "");
        assert_eq!(stream.finish(), "\u{fffd}");
    }

    #[test]
    fn test_tail_is_char_safe() {
        let text = "界".repeat(ERROR_TAIL_CHARS + 10);
        assert_eq!(tail(&text).chars().count(), ERROR_TAIL_CHARS);
        assert_eq!(tail("short"), "short");
    }
}
