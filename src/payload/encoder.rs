use crate::config::naming::NamingScheme;
use crate::domain::{Sample, WebIdMap};
use chrono::DateTime;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("No remote identifier resolved for tag \"{0}\"")]
    NotProvisioned(String),
}

/// UTC ISO-8601 without sub-second precision, e.g. `2024-05-01T12:00:00`.
pub fn format_utc(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => {
            warn!(timestamp, "Sample timestamp out of range, using epoch");
            "1970-01-01T00:00:00".to_string()
        }
    }
}

/// Encoder for the legacy batch envelope: one envelope entry per sample,
/// each addressing its own stream resource by WebId.
#[derive(Debug, Clone)]
pub struct LegacyEncoder {
    base_url: String,
    credentials: String,
    web_ids: WebIdMap,
}

impl LegacyEncoder {
    pub fn new(base_url: impl Into<String>, credentials: impl Into<String>, web_ids: WebIdMap) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            credentials: credentials.into(),
            web_ids,
        }
    }

    /// One envelope member, keyed by the admission-order index. The inner
    /// stream body is embedded as an escaped JSON string, exactly as the
    /// batch controller expects.
    fn encode(&self, sample: &Sample, seq: usize) -> Result<String, EncodeError> {
        let web_id = self
            .web_ids
            .get(sample.tag_id)
            .ok_or_else(|| EncodeError::NotProvisioned(sample.tag_name.clone()))?;

        let body = json!({
            "Timestamp": format_utc(sample.timestamp),
            "Value": sample.value.to_legacy_json(),
            "UnitsAbbreviation": "",
            "Good": true,
            "Questionable": false,
        });

        let entry = json!({
            "Method": "POST",
            "Resource": format!("{}/piwebapi/streams/{web_id}/Value", self.base_url),
            "Content": body.to_string(),
            "Headers": { "Authorization": format!("Basic {}", self.credentials) },
        });

        Ok(format!("\"{seq}\": {entry}"))
    }
}

/// Encoder for the OMF data message: per-tag container blocks holding the
/// values admitted for that tag this batch. Shared by the on-prem and cloud
/// variants, which differ only in endpoint and headers.
#[derive(Debug, Clone)]
pub struct OmfEncoder {
    naming: NamingScheme,
    serial: String,
}

impl OmfEncoder {
    pub fn new(naming: NamingScheme, serial: impl Into<String>) -> Self {
        Self {
            naming,
            serial: serial.into(),
        }
    }

    fn encode(&self, sample: &Sample) -> String {
        json!({
            "timestamp": format!("{}.000Z", format_utc(sample.timestamp)),
            "tagValue": sample.value.to_omf_json(),
        })
        .to_string()
    }

    fn container_id(&self, sample: &Sample) -> String {
        self.naming
            .container_id(&sample.tag_name, &self.serial, sample.kind.omf_type())
    }
}

/// Protocol serialization strategy, dispatched once per call site instead of
/// branching on a mode code throughout the accumulator.
#[derive(Debug, Clone)]
pub enum ProtocolEncoder {
    Legacy(LegacyEncoder),
    Omf(OmfEncoder),
}

impl ProtocolEncoder {
    pub fn header(&self) -> &'static str {
        match self {
            ProtocolEncoder::Legacy(_) => "{",
            ProtocolEncoder::Omf(_) => "[",
        }
    }

    pub fn footer(&self) -> &'static str {
        match self {
            ProtocolEncoder::Legacy(_) => "}",
            ProtocolEncoder::Omf(_) => "]",
        }
    }

    /// Serialize one sample into a fragment string. `seq` is the
    /// admission-order index within the current batch.
    pub fn encode_sample(&self, sample: &Sample, seq: usize) -> Result<String, EncodeError> {
        match self {
            ProtocolEncoder::Legacy(encoder) => encoder.encode(sample, seq),
            ProtocolEncoder::Omf(encoder) => Ok(encoder.encode(sample)),
        }
    }

    /// Assemble one tag's fragments into its per-tag block. OMF wraps them
    /// in a container; the legacy envelope has no grouping, so the fragments
    /// are joined flat (blocks are themselves comma-separated by the
    /// finalizer, which yields the flat member list).
    pub fn container_wrap(&self, first_sample: &Sample, fragments: &[String]) -> String {
        match self {
            ProtocolEncoder::Legacy(_) => fragments.join(","),
            ProtocolEncoder::Omf(encoder) => {
                let id = serde_json::Value::from(encoder.container_id(first_sample)).to_string();
                format!("{{\"containerid\":{id},\"values\":[{}]}}", fragments.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TagCatalog, TagKind, TagMeta, TagValue};

    fn sample(tag_id: u32, name: &str, kind: TagKind, value: TagValue, timestamp: i64) -> Sample {
        Sample {
            tag_id,
            tag_name: name.to_string(),
            kind,
            value,
            timestamp,
        }
    }

    fn web_ids() -> WebIdMap {
        let catalog = TagCatalog::new(vec![TagMeta {
            id: 1,
            name: "Temp".to_string(),
            kind: TagKind::Float,
        }])
        .unwrap();
        let mut ids = WebIdMap::new(&catalog);
        ids.set(1, "W1".to_string());
        ids
    }

    #[test]
    fn timestamps_render_as_utc_iso8601() {
        assert_eq!(format_utc(0), "1970-01-01T00:00:00");
        assert_eq!(format_utc(1_700_000_000), "2023-11-14T22:13:20");
    }

    #[test]
    fn legacy_entry_carries_resource_and_escaped_body() {
        let encoder = LegacyEncoder::new("https://pi.example.com/", "Y3JlZHM=", web_ids());
        let entry = encoder
            .encode(
                &sample(1, "Temp", TagKind::Float, TagValue::Float(21.5), 0),
                3,
            )
            .unwrap();

        // The fragment is one envelope member; wrap it to parse.
        let parsed: serde_json::Value = serde_json::from_str(&format!("{{{entry}}}")).unwrap();
        let member = &parsed["3"];
        assert_eq!(member["Method"], "POST");
        assert_eq!(
            member["Resource"],
            "https://pi.example.com/piwebapi/streams/W1/Value"
        );
        assert_eq!(member["Headers"]["Authorization"], "Basic Y3JlZHM=");

        let body: serde_json::Value =
            serde_json::from_str(member["Content"].as_str().unwrap()).unwrap();
        assert_eq!(body["Value"], 21.5);
        assert_eq!(body["Good"], true);
        assert_eq!(body["Questionable"], false);
        assert_eq!(body["UnitsAbbreviation"], "");
    }

    #[test]
    fn legacy_unresolved_tag_is_not_provisioned() {
        let catalog = TagCatalog::new(vec![TagMeta {
            id: 1,
            name: "Temp".to_string(),
            kind: TagKind::Float,
        }])
        .unwrap();
        let encoder = LegacyEncoder::new("https://pi.example.com", "c", WebIdMap::new(&catalog));
        let result = encoder.encode(
            &sample(1, "Temp", TagKind::Float, TagValue::Float(1.0), 0),
            0,
        );
        assert!(matches!(result, Err(EncodeError::NotProvisioned(_))));
    }

    #[test]
    fn omf_booleans_use_native_tokens() {
        let encoder = OmfEncoder::new(NamingScheme::parse("tn").unwrap(), "1234");
        let fragment = encoder.encode(&sample(
            1,
            "Motor",
            TagKind::Boolean,
            TagValue::Bool(true),
            0,
        ));
        let parsed: serde_json::Value = serde_json::from_str(&fragment).unwrap();
        assert_eq!(parsed["tagValue"], true);
        assert_eq!(parsed["timestamp"], "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn omf_container_wrap_uses_naming_scheme() {
        let encoder = ProtocolEncoder::Omf(OmfEncoder::new(
            NamingScheme::parse("default").unwrap(),
            "1234",
        ));
        let first = sample(1, "Temp", TagKind::Float, TagValue::Float(1.0), 0);
        let block = encoder.container_wrap(&first, &["{\"a\":1}".to_string()]);
        let parsed: serde_json::Value = serde_json::from_str(&block).unwrap();
        assert_eq!(parsed["containerid"], "Temp-1234-number");
        assert_eq!(parsed["values"][0]["a"], 1);
    }
}
