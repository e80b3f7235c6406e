//! Request payloads.
//!
//! A payload has two forms: the local form handed to the on-device runtime
//! and the remote form put on the wire. Input encoding (resizing,
//! tokenization) happens before a request is built, so both forms carry the
//! same content here; the distinction is kept so the two paths stay
//! separately addressable.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;

use crate::types::Application;

/// Opaque payload of an inference request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    /// Encoded image bytes
    Image(Bytes),
    /// Named text fields, e.g. `query` and `context`
    Text(BTreeMap<String, String>),
}

impl RequestData {
    /// Payload size in bytes.
    ///
    /// Images count their encoded bytes; text counts the summed length of its
    /// field values.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Image(bytes) => bytes.len(),
            Self::Text(fields) => fields.values().map(String::len).sum(),
        }
    }

    pub fn application(&self) -> Application {
        match self {
            Self::Image(_) => Application::Image,
            Self::Text(_) => Application::Text,
        }
    }

    /// URL-safe, unpadded base64 rendering used by the proxy protocol.
    pub fn to_base64(&self) -> String {
        match self {
            Self::Image(bytes) => URL_SAFE_NO_PAD.encode(bytes),
            Self::Text(fields) => {
                let json = serde_json::to_string(fields).unwrap_or_default();
                URL_SAFE_NO_PAD.encode(json)
            }
        }
    }
}

/// Build a text payload from `(field, value)` pairs.
pub fn text_fields<K, V, I>(fields: I) -> BTreeMap<String, String>
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
