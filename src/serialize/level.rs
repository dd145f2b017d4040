//! `odata.metadata=` negotiation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLevel {
    None,
    Minimal,
    Full,
}

impl MetadataLevel {
    /// Reads the `odata.metadata` parameter off an `Accept` header value.
    /// Absent or unrecognized defaults to `minimal`, matching the
    /// protocol's own default.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else { return Self::Minimal };
        for part in accept.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix("odata.metadata=") {
                return match value.trim() {
                    "none" => Self::None,
                    "full" => Self::Full,
                    _ => Self::Minimal,
                };
            }
        }
        Self::Minimal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Full => "full",
        }
    }

    pub fn content_type(self) -> String {
        format!("application/json;odata.metadata={}", self.as_str())
    }

    pub fn includes_context(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn includes_type_annotations(self) -> bool {
        matches!(self, Self::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_minimal() {
        assert_eq!(MetadataLevel::negotiate(None), MetadataLevel::Minimal);
        assert_eq!(MetadataLevel::negotiate(Some("application/json")), MetadataLevel::Minimal);
    }

    #[test]
    fn reads_explicit_level() {
        assert_eq!(
            MetadataLevel::negotiate(Some("application/json;odata.metadata=full")),
            MetadataLevel::Full
        );
        assert_eq!(
            MetadataLevel::negotiate(Some("application/json;odata.metadata=none")),
            MetadataLevel::None
        );
    }

    #[test]
    fn content_type_round_trips() {
        assert_eq!(MetadataLevel::Full.content_type(), "application/json;odata.metadata=full");
    }
}
