use serde_json::Value;
use tracing::{error, info, warn};

/// Marker the historian puts in a response body when a stream WebID in the
/// request could not be resolved.
const INVALID_WEB_ID_MARKER: &str = "Unknown or invalid WebID format:";

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The body carried a top-level "Message", which the historian uses for
    /// authentication and authorization rejections.
    #[error("Server refused the request: {0}")]
    Refused(String),

    /// The body carried a non-empty "Errors" list.
    #[error("Server reported errors: {0}")]
    ServerErrors(String),

    /// An OMF "Messages" entry with Error severity.
    #[error("OMF message rejected: {0}")]
    MessageRejected(String),

    /// An HTTP-success body that could not be interpreted at all.
    #[error("Malformed response from {url}")]
    Malformed { url: String },
}

/// Inspect an HTTP-success response body for application-level failure.
///
/// The historian reports many failures inside 2xx responses, so transport
/// success alone does not mean the data was accepted. An empty body is a
/// plain success. The checks run in a fixed order: top-level "Message"
/// first, then the "Errors" list, then the OMF "Messages" severity walk.
pub fn classify(body: &str, url: &str, dataserver_web_id: Option<&str>) -> Result<(), ResponseError> {
    if body.trim().is_empty() {
        return Ok(());
    }

    let parsed: Value = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => {
            error!(%url, "Response body is not valid JSON");
            return Err(ResponseError::Malformed {
                url: url.to_string(),
            });
        }
    };

    if let Some(message) = parsed.get("Message").and_then(Value::as_str) {
        error!(%message, "Server refused the request, check the configured credentials");
        return Err(ResponseError::Refused(message.to_string()));
    }

    if let Some(errors) = parsed.get("Errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let joined = errors
            .iter()
            .map(|e| e.as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>()
            .join("; ");
        if joined.contains(INVALID_WEB_ID_MARKER) {
            error!(
                web_id = dataserver_web_id.unwrap_or("<unset>"),
                "Server rejected a stream WebID, check the configured data server WebID"
            );
        }
        return Err(ResponseError::ServerErrors(joined));
    }

    if let Some(messages) = parsed.get("Messages").and_then(Value::as_array) {
        for message in messages {
            walk_omf_message(message)?;
        }
    }

    Ok(())
}

/// One OMF response message carries a `Status` with the highest severity
/// seen, plus nested `Events` with per-event detail. All events are logged
/// at a severity-mapped level; only a highest severity of `Error` fails
/// the batch.
fn walk_omf_message(message: &Value) -> Result<(), ResponseError> {
    let status = message.get("Status").unwrap_or(&Value::Null);
    let highest = status
        .get("HighestSeverity")
        .and_then(Value::as_str)
        .unwrap_or("");

    let events = message
        .get("Events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut first_error: Option<String> = None;
    for event in events {
        let severity = event.get("Severity").and_then(Value::as_str).unwrap_or("");
        let reason = event
            .get("EventInfo")
            .and_then(|detail| detail.get("Message"))
            .and_then(Value::as_str)
            .unwrap_or("no detail");
        if severity.eq_ignore_ascii_case("Error") {
            if first_error.is_none() {
                first_error = Some(reason.to_string());
            }
            error!(%reason, "Historian rejected an OMF message event");
        } else if severity.eq_ignore_ascii_case("Warning") {
            warn!(%reason, "Historian flagged an OMF message event");
        } else {
            info!(severity, %reason, "Historian OMF message event");
        }
    }

    if highest.eq_ignore_ascii_case("Error") || first_error.is_some() {
        let reason = first_error.unwrap_or_else(|| {
            status
                .get("Code")
                .map(ToString::to_string)
                .unwrap_or_else(|| "no detail".to_string())
        });
        return Err(ResponseError::MessageRejected(reason));
    }
    Ok(())
}
