//! Typed view of the backend's realtime change feed.
//!
//! The wire shape is `{table, eventType: INSERT|UPDATE|DELETE, new, old}`
//! where `new`/`old` are present or empty depending on the operation, and
//! `old` on DELETE may only carry the primary key. The transport itself lives
//! outside this crate; anything that can yield `FeedMessage`s implements
//! [`ChangeFeed`].

use crate::logging;
use crate::model::{CommentRow, TaskRow};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimePayload<R> {
    Insert { new: R },
    Update { new: R, old: Option<R> },
    Delete { old: R },
}

impl<R> RealtimePayload<R> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            RealtimePayload::Insert { .. } => ChangeKind::Insert,
            RealtimePayload::Update { .. } => ChangeKind::Update,
            RealtimePayload::Delete { .. } => ChangeKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawFeedMessage")]
pub enum FeedMessage {
    Task(RealtimePayload<TaskRow>),
    Comment(RealtimePayload<CommentRow>),
}

impl FeedMessage {
    pub fn table(&self) -> &'static str {
        match self {
            FeedMessage::Task(_) => "tasks",
            FeedMessage::Comment(_) => "comments",
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            FeedMessage::Task(p) => p.kind(),
            FeedMessage::Comment(p) => p.kind(),
        }
    }
}

#[derive(Deserialize)]
struct RawFeedMessage {
    table: String,
    #[serde(rename = "eventType")]
    event_type: String,
    #[serde(default)]
    new: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
}

impl TryFrom<RawFeedMessage> for FeedMessage {
    type Error = String;

    fn try_from(raw: RawFeedMessage) -> Result<Self, Self::Error> {
        match raw.table.as_str() {
            "tasks" => Ok(FeedMessage::Task(payload(&raw.event_type, raw.new, raw.old)?)),
            "comments" => Ok(FeedMessage::Comment(payload(
                &raw.event_type,
                raw.new,
                raw.old,
            )?)),
            other => Err(format!("unsupported table: {}", other)),
        }
    }
}

fn payload<R: FeedRow>(
    event_type: &str,
    new: Option<Value>,
    old: Option<Value>,
) -> Result<RealtimePayload<R>, String> {
    match event_type {
        "INSERT" => Ok(RealtimePayload::Insert {
            new: R::lenient(new.unwrap_or(Value::Null)),
        }),
        "UPDATE" => Ok(RealtimePayload::Update {
            new: R::lenient(new.unwrap_or(Value::Null)),
            old: non_empty(old).map(R::lenient),
        }),
        "DELETE" => Ok(RealtimePayload::Delete {
            old: R::lenient(old.unwrap_or(Value::Null)),
        }),
        other => Err(format!("unsupported eventType: {}", other)),
    }
}

fn non_empty(value: Option<Value>) -> Option<Value> {
    match value {
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(Value::Null) | None => None,
        other => other,
    }
}

/// A row type that degrades to "id only" when a column fails to parse.
pub trait FeedRow: DeserializeOwned + Default {
    fn from_id(id: Option<String>) -> Self;

    fn lenient(value: Value) -> Self {
        let id = value.get("id").and_then(Value::as_str).map(str::to_string);
        match serde_json::from_value(value) {
            Ok(row) => row,
            Err(e) => {
                logging::warn(&format!("Malformed realtime row (id {:?}): {}", id, e));
                Self::from_id(id)
            }
        }
    }
}

impl FeedRow for TaskRow {
    fn from_id(id: Option<String>) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

impl FeedRow for CommentRow {
    fn from_id(id: Option<String>) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Source of change notifications. Best-effort, at-least-once, possibly
/// reordered.
#[async_trait]
pub trait ChangeFeed: Send {
    /// `None` once the feed is closed.
    async fn next_message(&mut self) -> Option<FeedMessage>;
}

/// Feed backed by an in-process channel. The sender side is handed to
/// whatever owns the transport.
pub struct ChannelFeed {
    rx: mpsc::Receiver<FeedMessage>,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> (mpsc::Sender<FeedMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    async fn next_message(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }
}

/// Adapts any stream of messages, e.g. a websocket transport decoded
/// upstream, into a feed.
pub struct StreamFeed<S> {
    stream: S,
}

impl<S> StreamFeed<S>
where
    S: Stream<Item = FeedMessage> + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> ChangeFeed for StreamFeed<S>
where
    S: Stream<Item = FeedMessage> + Unpin + Send,
{
    async fn next_message(&mut self) -> Option<FeedMessage> {
        self.stream.next().await
    }
}

/// Replays recorded payloads, one JSON object per line. Lines that do not
/// parse are logged and skipped.
pub struct JsonLinesFeed {
    lines: Lines<BufReader<tokio::fs::File>>,
    line_no: usize,
}

impl JsonLinesFeed {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

#[async_trait]
impl ChangeFeed for JsonLinesFeed {
    async fn next_message(&mut self) -> Option<FeedMessage> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    logging::error(&format!("Replay read failed: {}", e));
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedMessage>(&line) {
                Ok(msg) => return Some(msg),
                Err(e) => {
                    logging::warn(&format!("Skipping replay line {}: {}", self.line_no, e));
                }
            }
        }
    }
}
