//! Parses the `Prefer` request header and builds the matching
//! `Preference-Applied` response value.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnPreference {
    #[default]
    Representation,
    Minimal,
}

#[derive(Debug, Clone, Default)]
pub struct Preference {
    pub return_pref: ReturnPreference,
    pub track_changes: bool,
    pub max_page_size: Option<u32>,
}

impl Preference {
    pub fn parse(header: Option<&str>) -> Self {
        let mut pref = Self::default();
        let Some(header) = header else {
            return pref;
        };
        for token in header.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("return=minimal") {
                pref.return_pref = ReturnPreference::Minimal;
            } else if token.eq_ignore_ascii_case("return=representation") {
                pref.return_pref = ReturnPreference::Representation;
            } else if token.eq_ignore_ascii_case("odata.track-changes") {
                pref.track_changes = true;
            } else if let Some(rest) = token
                .to_ascii_lowercase()
                .strip_prefix("odata.maxpagesize=")
                .map(|s| s.to_string())
            {
                pref.max_page_size = rest.parse().ok();
            }
        }
        pref
    }

    /// The `Preference-Applied` header value to echo, if any preference
    /// this crate actually honored was present in the request.
    pub fn applied_header(&self) -> Option<String> {
        let mut applied = Vec::new();
        match self.return_pref {
            ReturnPreference::Minimal => applied.push("return=minimal".to_string()),
            ReturnPreference::Representation => {}
        }
        if self.track_changes {
            applied.push("odata.track-changes".to_string());
        }
        if let Some(size) = self.max_page_size {
            applied.push(format!("odata.maxpagesize={size}"));
        }
        if applied.is_empty() {
            None
        } else {
            Some(applied.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_return_minimal() {
        let pref = Preference::parse(Some("return=minimal"));
        assert_eq!(pref.return_pref, ReturnPreference::Minimal);
        assert_eq!(pref.applied_header().as_deref(), Some("return=minimal"));
    }

    #[test]
    fn parses_track_changes_and_page_size() {
        let pref = Preference::parse(Some("odata.track-changes, odata.maxpagesize=50"));
        assert!(pref.track_changes);
        assert_eq!(pref.max_page_size, Some(50));
    }

    #[test]
    fn no_header_yields_defaults() {
        let pref = Preference::parse(None);
        assert_eq!(pref.return_pref, ReturnPreference::Representation);
        assert!(pref.applied_header().is_none());
    }
}
