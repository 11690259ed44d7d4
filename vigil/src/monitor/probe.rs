//! Status probe: asks streamlink whether the target is live and what it is.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Identity of a broadcast as reported by the probe.
///
/// Two probe results describe the same snapshot iff their identities are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamIdentity {
    pub plugin: Option<String>,
    pub stream_id: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub title: Option<String>,
}

/// One parsed probe result.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    raw: Arc<Value>,
}

impl ProbeReport {
    pub fn new(raw: Value) -> Self {
        Self { raw: Arc::new(raw) }
    }

    /// Parse the JSON document printed by `streamlink --json`.
    pub fn parse(output: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(output.trim())
            .map_err(|e| Error::probe(format!("malformed probe payload: {e}")))?;
        if !raw.is_object() {
            return Err(Error::probe("probe payload is not a JSON object"));
        }
        Ok(Self::new(raw))
    }

    pub fn raw(&self) -> &Arc<Value> {
        &self.raw
    }

    /// Error message reported by the probe, if any.
    pub fn error(&self) -> Option<&str> {
        self.raw.get("error").and_then(Value::as_str)
    }

    /// Online iff the probe reported no error and a stream id is present.
    pub fn is_online(&self) -> bool {
        let has_error = self.raw.get("error").is_some_and(|e| !e.is_null());
        !has_error && self.identity().stream_id.is_some()
    }

    pub fn identity(&self) -> StreamIdentity {
        let metadata = self.raw.get("metadata");
        let field = |key: &str| metadata.and_then(|m| m.get(key)).and_then(scalar_to_string);
        StreamIdentity {
            plugin: self.raw.get("plugin").and_then(scalar_to_string),
            stream_id: field("id"),
            author: field("author"),
            category: field("category"),
            title: field("title"),
        }
    }

    /// Quality labels advertised under `streams`.
    pub fn qualities(&self) -> BTreeSet<String> {
        qualities_of(&self.raw)
    }
}

/// Quality labels (the keys of `streams`) in a raw probe payload.
pub fn qualities_of(raw: &Value) -> BTreeSet<String> {
    raw.get("streams")
        .and_then(Value::as_object)
        .map(|streams| streams.keys().cloned().collect())
        .unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Something that can report the current status of the watched broadcast.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self) -> Result<ProbeReport>;
}

/// Probe backed by `streamlink --json`.
pub struct StreamlinkProbe {
    binary_path: String,
    target_url: String,
    extra_args: Vec<String>,
}

impl StreamlinkProbe {
    pub fn new(
        binary_path: impl Into<String>,
        target_url: impl Into<String>,
        extra_args: Vec<String>,
    ) -> Self {
        Self {
            binary_path: binary_path.into(),
            target_url: target_url.into(),
            extra_args,
        }
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = vec!["--json".to_string()];
        args.extend(self.extra_args.iter().cloned());
        args.push(self.target_url.clone());
        args
    }
}

#[async_trait]
impl StatusProbe for StreamlinkProbe {
    async fn probe(&self) -> Result<ProbeReport> {
        let args = self.build_args();
        debug!(binary = %self.binary_path, ?args, "probing stream status");

        // streamlink exits non-zero when the stream is offline but still prints JSON.
        let output = process_utils::tokio_command(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::spawn(&self.binary_path, e))?;

        ProbeReport::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_online_requires_id_and_no_error() {
        let online = ProbeReport::new(json!({
            "plugin": "twitch",
            "metadata": {"id": "abc", "author": "A", "category": "C", "title": "T"}
        }));
        assert!(online.is_online());

        let errored = ProbeReport::new(json!({
            "error": "No playable streams found on this URL",
            "metadata": {"id": "abc"}
        }));
        assert!(!errored.is_online());
        assert_eq!(errored.error(), Some("No playable streams found on this URL"));

        let missing_id = ProbeReport::new(json!({"metadata": {"id": null, "title": "T"}}));
        assert!(!missing_id.is_online());

        let null_error = ProbeReport::new(json!({"error": null, "metadata": {"id": 42}}));
        assert!(null_error.is_online());
    }

    #[test]
    fn test_identity_stringifies_numbers() {
        let report = ProbeReport::new(json!({
            "plugin": "youtube",
            "metadata": {"id": 12345, "author": "A", "category": null, "title": "Live"}
        }));
        let identity = report.identity();
        assert_eq!(identity.plugin.as_deref(), Some("youtube"));
        assert_eq!(identity.stream_id.as_deref(), Some("12345"));
        assert_eq!(identity.category, None);
        assert_eq!(identity.title.as_deref(), Some("Live"));
    }

    #[test]
    fn test_qualities() {
        let report = ProbeReport::new(json!({
            "streams": {"720p": {}, "1080p60": {}, "best": {}}
        }));
        let qualities: Vec<_> = report.qualities().into_iter().collect();
        assert_eq!(qualities, vec!["1080p60", "720p", "best"]);
        assert!(ProbeReport::new(json!({})).qualities().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(ProbeReport::parse("not json"), Err(Error::Probe(_))));
        assert!(matches!(ProbeReport::parse("[1, 2]"), Err(Error::Probe(_))));
        assert!(ProbeReport::parse("  {\"plugin\": \"x\"}\n").is_ok());
    }

    #[test]
    fn test_build_args_places_url_last() {
        let probe = StreamlinkProbe::new(
            "streamlink",
            "https://example.com/live",
            vec!["--twitch-disable-ads".to_string()],
        );
        assert_eq!(
            probe.build_args(),
            vec!["--json", "--twitch-disable-ads", "https://example.com/live"]
        );
    }
}
