//! Serde support for partial-update payloads.
//!
//! A nullable field in a patch is `Option<Option<T>>`: the outer `None`
//! means "not supplied", `Some(None)` means "clear it".

use serde::{Deserialize, Deserializer};

/// Use with `#[serde(default, deserialize_with = "present")]` so an explicit
/// `null` is kept apart from an absent key.
pub fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Trim a required text field, rejecting blanks.
pub(crate) fn required_text(field: &str, value: &str) -> Result<String, crate::db::DatabaseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::db::DatabaseError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct NotesPatch {
        #[serde(default, deserialize_with = "present")]
        notes: Option<Option<String>>,
    }

    #[test]
    fn absent_key_is_none() {
        let p: NotesPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(p.notes, None);
    }

    #[test]
    fn explicit_null_is_some_none() {
        let p: NotesPatch = serde_json::from_str(r#"{"notes": null}"#).unwrap();
        assert_eq!(p.notes, Some(None));
    }

    #[test]
    fn value_is_some_some() {
        let p: NotesPatch = serde_json::from_str(r#"{"notes": "fasting"}"#).unwrap();
        assert_eq!(p.notes, Some(Some("fasting".into())));
    }

    #[test]
    fn required_text_trims_and_rejects_blank() {
        assert_eq!(required_text("name", "  Aspirin ").unwrap(), "Aspirin");
        assert!(required_text("name", "   ").is_err());
    }
}
