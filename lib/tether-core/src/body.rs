//! JSON body helpers.

use bytes::Bytes;

use crate::Result;

/// MIME type used for JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Serialize a value to JSON bytes.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
///
/// # Example
///
/// ```
/// use tether_core::to_json;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Message { subject: String }
///
/// let message = Message { subject: "Hello".to_string() };
/// let bytes = to_json(&message).expect("serialize");
/// assert_eq!(bytes.as_ref(), br#"{"subject":"Hello"}"#);
/// ```
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(Into::into)
}

/// Deserialize JSON bytes, reporting the path of the field that failed.
///
/// # Errors
///
/// Returns [`crate::Error::JsonDeserialization`] with the failing path
/// (e.g., `value[0].id`).
pub fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        crate::Error::json_deserialization(e.path().to_string(), e.inner().to_string())
    })
}

#[cfg(test)]
mod tests {
    use assert2::let_assert;

    use super::*;

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Page {
        value: Vec<Item>,
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Item {
        id: String,
    }

    #[test]
    fn from_json_reads_collection() {
        let page: Page = from_json(br#"{"value":[{"id":"a"},{"id":"b"}]}"#).expect("deserialize");
        assert_eq!(page.value.len(), 2);
        assert_eq!(page.value[1].id, "b");
    }

    #[test]
    fn from_json_reports_path() {
        let result = from_json::<Page>(br#"{"value":[{"id":"a"},{"name":"b"}]}"#);

        let_assert!(Err(crate::Error::JsonDeserialization { path, message }) = result);
        assert_eq!(path, "value[1]");
        assert!(message.contains("missing field `id`"));
    }

    #[test]
    fn from_json_syntax_error() {
        let result = from_json::<Page>(b"{not json");
        assert!(matches!(
            result,
            Err(crate::Error::JsonDeserialization { .. })
        ));
    }
}
