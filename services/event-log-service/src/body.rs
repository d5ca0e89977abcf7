use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};

use crate::models::ErrorResponse;

// Keys above this index stay object keys instead of becoming array slots.
const ARRAY_INDEX_LIMIT: usize = 20;
// Bracket segments past this depth are folded into one literal key.
const MAX_DEPTH: usize = 5;

/// Request body decoded into a JSON map. JSON and URL-encoded payloads are
/// understood; any other content type decodes to an empty object.
pub struct EventBody(pub Value);

#[derive(Debug, thiserror::Error)]
pub enum BodyRejection {
    #[error("{0}")]
    Syntax(String),
    #[error("{message}")]
    Read { status: StatusCode, message: String },
}

impl IntoResponse for BodyRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Syntax(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("SyntaxError", message)),
            )
                .into_response(),
            Self::Read { status, message } => {
                (status, Json(ErrorResponse::new("BodyError", message))).into_response()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BodyFormat {
    Json,
    UrlEncoded,
    Other,
}

fn body_format(content_type: Option<&str>) -> BodyFormat {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if mime == "application/json" || mime.ends_with("+json") {
        BodyFormat::Json
    } else if mime == "application/x-www-form-urlencoded" {
        BodyFormat::UrlEncoded
    } else {
        BodyFormat::Other
    }
}

#[async_trait]
impl<S> FromRequest<S> for EventBody
where
    S: Send + Sync,
{
    type Rejection = BodyRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let format = body_format(
            req.headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );
        if format == BodyFormat::Other {
            return Ok(Self(Value::Object(Map::new())));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| BodyRejection::Read {
                status: rejection.status(),
                message: rejection.body_text(),
            })?;

        let value = match format {
            BodyFormat::Json => parse_json(&bytes)?,
            _ => parse_urlencoded(&bytes)?,
        };
        Ok(Self(value))
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value, BodyRejection> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| BodyRejection::Syntax(err.to_string()))?;
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        _ => Err(BodyRejection::Syntax(
            "JSON body must be an object or an array".to_string(),
        )),
    }
}

/// Decodes `a[b][0][c]=v` style forms into nested objects and arrays.
pub fn parse_urlencoded(bytes: &[u8]) -> Result<Value, BodyRejection> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| BodyRejection::Syntax(format!("form body is not UTF-8: {err}")))?;

    let mut root = Map::new();
    for pair in text.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key)?;
        if key.is_empty() {
            continue;
        }
        let value = decode_component(raw_value)?;
        insert_pair(&mut root, &key_segments(&key), value);
    }
    Ok(compact(Value::Object(root)))
}

fn decode_component(raw: &str) -> Result<String, BodyRejection> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| BodyRejection::Syntax(format!("malformed form encoding: {err}")))
}

/// `a[b][]` becomes `["a", "b", ""]`. Unbalanced brackets, and anything
/// nested deeper than `MAX_DEPTH`, are kept as a literal trailing segment.
fn key_segments(key: &str) -> Vec<String> {
    let open = match key.find('[') {
        Some(open) if open > 0 => open,
        _ => return vec![key.to_string()],
    };

    let mut segments = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(inner) = rest.strip_prefix('[') {
        if segments.len() > MAX_DEPTH {
            break;
        }
        match inner.find(']') {
            Some(close) => {
                segments.push(inner[..close].to_string());
                rest = &inner[close + 1..];
            }
            None => break,
        }
    }
    if !rest.is_empty() {
        segments.push(rest.to_string());
    }
    segments
}

fn insert_pair(map: &mut Map<String, Value>, segments: &[String], value: String) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };
    // An empty segment appends at the next free index.
    let key = if head.is_empty() {
        map.len().to_string()
    } else {
        head.clone()
    };

    if tail.is_empty() {
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
        return;
    }

    let child = map
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(child) = child {
        insert_pair(child, tail, value);
    }
}

fn is_array_index(key: &str) -> bool {
    key.parse::<usize>()
        .is_ok_and(|index| index <= ARRAY_INDEX_LIMIT && index.to_string() == key)
}

/// Turns objects keyed only by small indices into arrays ordered by index.
fn compact(value: Value) -> Value {
    match value {
        Value::Object(map) if !map.is_empty() && map.keys().all(|key| is_array_index(key)) => {
            let mut items: Vec<(usize, Value)> = map
                .into_iter()
                .filter_map(|(key, value)| key.parse().ok().map(|index| (index, compact(value))))
                .collect();
            items.sort_by_key(|(index, _)| *index);
            Value::Array(items.into_iter().map(|(_, value)| value).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, compact(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(compact).collect()),
        other => other,
    }
}
