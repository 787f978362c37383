//! Where samples come from. The pipeline only needs something that yields
//! spans of samples; the channel-backed source is how an embedding process
//! (a device poller, a replay tool, a test) feeds it.

use crate::domain::{Sample, TagCatalog, TagKind, TagValue};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Sample source closed")]
    Closed,

    #[error("Unparseable sample: {0}")]
    Parse(String),

    #[error("Sample references unknown tag id {0}")]
    UnknownTag(u32),
}

#[derive(Debug, Deserialize)]
struct RawSample {
    tag_id: u32,
    value: serde_json::Value,
    timestamp: i64,
}

/// Parse one ingestion line, `{"tag_id":…,"value":…,"timestamp":…}`, into
/// a typed sample. The tag name and kind come from the catalog; the value
/// is coerced to the cataloged kind, so a float fed to an integer tag is
/// rejected rather than silently truncated.
pub fn parse_sample(catalog: &TagCatalog, line: &str) -> Result<Sample, SourceError> {
    let raw: RawSample =
        serde_json::from_str(line).map_err(|e| SourceError::Parse(e.to_string()))?;
    let meta = catalog
        .get(raw.tag_id)
        .ok_or(SourceError::UnknownTag(raw.tag_id))?;

    let value = match (meta.kind, &raw.value) {
        (TagKind::Boolean, serde_json::Value::Bool(b)) => TagValue::Bool(*b),
        (TagKind::Boolean, serde_json::Value::Number(n)) => match n.as_i64() {
            Some(0) => TagValue::Bool(false),
            Some(1) => TagValue::Bool(true),
            _ => return Err(SourceError::Parse(format!("bad boolean value {n}"))),
        },
        (TagKind::Integer, serde_json::Value::Number(n)) => TagValue::Int(
            n.as_i64()
                .ok_or_else(|| SourceError::Parse(format!("bad integer value {n}")))?,
        ),
        (TagKind::Float, serde_json::Value::Number(n)) => TagValue::Float(
            n.as_f64()
                .ok_or_else(|| SourceError::Parse(format!("bad float value {n}")))?,
        ),
        (TagKind::DWord, serde_json::Value::Number(n)) => TagValue::DWord(
            n.as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| SourceError::Parse(format!("bad dword value {n}")))?,
        ),
        (TagKind::Str, serde_json::Value::String(s)) => TagValue::Str(s.clone()),
        (kind, other) => {
            return Err(SourceError::Parse(format!(
                "value {other} does not fit tag kind {kind:?}"
            )));
        }
    };

    Ok(Sample {
        tag_id: meta.id,
        tag_name: meta.name.clone(),
        kind: meta.kind,
        value,
        timestamp: raw.timestamp,
    })
}

/// Supplier of telemetry samples, in timestamp order per tag.
pub trait SampleSource: Send {
    /// Wait for the next span of samples. A span holds at least one sample.
    fn next_span(&mut self) -> impl Future<Output = Result<Vec<Sample>, SourceError>> + Send;

    /// How far behind real time the source currently is, if it knows.
    fn time_behind(&self) -> Option<Duration> {
        None
    }
}

/// Producer side handed to the embedding process.
#[derive(Debug, Clone)]
pub struct SampleHandle {
    tx: mpsc::Sender<Sample>,
}

impl SampleHandle {
    pub async fn send(&self, sample: Sample) -> Result<(), SourceError> {
        self.tx.send(sample).await.map_err(|_| SourceError::Closed)
    }
}

/// Source backed by a bounded channel. `next_span` waits for one sample
/// and then drains whatever else is already buffered, so a burst arrives
/// as a single span.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Sample>,
}

/// Create a connected handle/source pair.
pub fn channel(capacity: usize) -> (SampleHandle, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (SampleHandle { tx }, ChannelSource { rx })
}

impl SampleSource for ChannelSource {
    async fn next_span(&mut self) -> Result<Vec<Sample>, SourceError> {
        let first = self.rx.recv().await.ok_or(SourceError::Closed)?;
        let mut span = vec![first];
        while let Ok(sample) = self.rx.try_recv() {
            span.push(sample);
        }
        Ok(span)
    }
}
