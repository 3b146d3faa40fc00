//! Parsing of the `source` field of a job submission.
//!
//! A source is either a remote URL (left for the executor to fetch) or an
//! inline attachment of the form `data:...;name=report.txt;base64,<payload>`.
//! Only the metadata before the first comma is inspected; the rest is
//! base64.

use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use thiserror::Error;
use url::Url;

const DEFAULT_EXTENSION: &str = ".zip";
const NAME_FIELD: &str = "name=";
const PREVIEW_CHARS: usize = 96;

const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("inline attachment has no `,` separating metadata from payload: `{}`", preview(.raw))]
    MissingSeparator { raw: String },
    #[error("inline attachment metadata has no `name=` field: `{}`", preview(.raw))]
    MissingName { raw: String },
    #[error("inline attachment payload is not valid base64 ({reason}): `{}`", preview(.raw))]
    InvalidPayload { raw: String, reason: String },
}

impl DecodeError {
    /// The untouched source field, for diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            DecodeError::MissingSeparator { raw }
            | DecodeError::MissingName { raw }
            | DecodeError::InvalidPayload { raw, .. } => raw,
        }
    }
}

/// Bounded rendering of a potentially huge source field.
fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// What a `source` field turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceField {
    /// Nothing to do: no source, or a non-string value.
    Absent,
    /// A remote location that the executor downloads itself.
    Remote(Url),
    Inline(InlineAttachment),
}

/// A decoded inline attachment, not yet written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAttachment {
    /// File name without the extension.
    pub name: String,
    /// Extension including the leading dot.
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl InlineAttachment {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }
}

/// Classify and, for inline attachments, decode a raw `source` value.
pub fn parse_source(raw: &str) -> Result<SourceField, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(SourceField::Absent);
    }

    if let Some(url) = remote_url(trimmed) {
        return Ok(SourceField::Remote(url));
    }

    let Some((metadata, payload)) = trimmed.split_once(',') else {
        return Err(DecodeError::MissingSeparator {
            raw: raw.to_string(),
        });
    };

    let file_name = metadata
        .split(';')
        .map(str::trim)
        .find_map(|segment| segment.strip_prefix(NAME_FIELD))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DecodeError::MissingName {
            raw: raw.to_string(),
        })?;

    let (name, extension) = split_extension(file_name);

    let compact: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = PAYLOAD_ENGINE
        .decode(compact.as_bytes())
        .map_err(|err| DecodeError::InvalidPayload {
            raw: raw.to_string(),
            reason: err.to_string(),
        })?;

    Ok(SourceField::Inline(InlineAttachment {
        name,
        extension,
        bytes,
    }))
}

fn remote_url(candidate: &str) -> Option<Url> {
    let lowered = candidate.get(..8).map(str::to_ascii_lowercase)?;
    if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
        return None;
    }
    Url::parse(candidate)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
}

/// Split `report.final.txt` into (`report.final`, `.txt`). Files without a usable extension
/// are archives by convention.
fn split_extension(file_name: &str) -> (String, String) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name.to_string(), DEFAULT_EXTENSION.to_string()),
        Some(index) => {
            let (stem, extension) = file_name.split_at(index);
            if extension.len() == 1 {
                (stem.to_string(), DEFAULT_EXTENSION.to_string())
            } else {
                (stem.to_string(), extension.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(raw: &str) -> InlineAttachment {
        match parse_source(raw).expect("decodes") {
            SourceField::Inline(attachment) => attachment,
            other => panic!("expected inline attachment, got {other:?}"),
        }
    }

    #[test]
    fn keeps_everything_before_the_last_dot_as_the_name() {
        let attachment = inline("data:text/plain;name=report.final.txt;base64,SGVsbG8=");
        assert_eq!(attachment.name, "report.final");
        assert_eq!(attachment.extension, ".txt");
        assert_eq!(attachment.bytes, b"Hello");
        assert_eq!(attachment.file_name(), "report.final.txt");
    }

    #[test]
    fn defaults_to_zip_without_an_extension() {
        let attachment = inline("data:application/octet-stream;name=report;base64,SGVsbG8=");
        assert_eq!(attachment.name, "report");
        assert_eq!(attachment.extension, ".zip");
        assert_eq!(attachment.bytes, b"Hello");
    }

    #[test]
    fn leading_or_trailing_dots_are_not_extensions() {
        let hidden = inline("name=.env;base64,SGVsbG8=");
        assert_eq!((hidden.name.as_str(), hidden.extension.as_str()), (".env", ".zip"));

        let trailing = inline("name=report.;base64,SGVsbG8=");
        assert_eq!(
            (trailing.name.as_str(), trailing.extension.as_str()),
            ("report", ".zip")
        );
    }

    #[test]
    fn accepts_unpadded_and_wrapped_payloads() {
        let attachment = inline("name=a.txt;base64,SGVs\nbG8");
        assert_eq!(attachment.bytes, b"Hello");
    }

    #[test]
    fn urls_pass_through_untouched() {
        match parse_source("https://example.com/src/archive.zip").unwrap() {
            SourceField::Remote(url) => {
                assert_eq!(url.as_str(), "https://example.com/src/archive.zip")
            }
            other => panic!("expected remote source, got {other:?}"),
        }
        assert!(matches!(
            parse_source("HTTP://example.com/a").unwrap(),
            SourceField::Remote(_)
        ));
    }

    #[test]
    fn empty_source_is_absent() {
        assert_eq!(parse_source("").unwrap(), SourceField::Absent);
        assert_eq!(parse_source("   ").unwrap(), SourceField::Absent);
    }

    #[test]
    fn missing_comma_is_reported_with_the_raw_field() {
        let err = parse_source("data:text/plain;name=a.txt;base64").unwrap_err();
        assert!(matches!(err, DecodeError::MissingSeparator { .. }));
        assert_eq!(err.raw(), "data:text/plain;name=a.txt;base64");
    }

    #[test]
    fn missing_name_is_not_defaulted() {
        let err = parse_source("data:text/plain;base64,SGVsbG8=").unwrap_err();
        assert!(matches!(err, DecodeError::MissingName { .. }));

        let err = parse_source("name=;base64,SGVsbG8=").unwrap_err();
        assert!(matches!(err, DecodeError::MissingName { .. }));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = parse_source("name=a.txt;base64,***").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn long_fields_are_truncated_in_messages() {
        let raw = format!("name=a.txt;base64{}", "A".repeat(500));
        let message = parse_source(&raw).unwrap_err().to_string();
        assert!(message.len() < 300);
        assert!(message.ends_with("…`"));
    }
}
