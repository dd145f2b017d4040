//! `OData-MaxVersion` / `OData-Version` negotiation.

use crate::error::ODataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ODataVersion {
    V40,
    V401,
}

impl ODataVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V40 => "4.0",
            Self::V401 => "4.01",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "4.0" => Some(Self::V40),
            "4.01" => Some(Self::V401),
            other => {
                // Anything `>= 4.0` and numerically parseable is accepted
                // even if it names a point release we don't specifically
                // track; it just negotiates down to our highest version.
                let major_minor: Vec<&str> = other.split('.').collect();
                let major: u32 = major_minor.first()?.parse().ok()?;
                if major > 4 {
                    Some(Self::V401)
                } else if major == 4 {
                    Some(Self::V401)
                } else {
                    None
                }
            }
        }
    }
}

/// Picks the response version: the highest version this crate supports
/// that does not exceed the client's declared `OData-MaxVersion`. No
/// header at all defaults to the highest supported version.
pub fn negotiate_version(max_version_header: Option<&str>) -> Result<ODataVersion, ODataError> {
    let Some(header) = max_version_header else {
        return Ok(ODataVersion::V401);
    };
    let requested = ODataVersion::parse(header)
        .ok_or_else(|| ODataError::UnacceptableVersion {
            message: format!("unsupported OData-MaxVersion '{header}'"),
        })?;

    // An explicit 4.0 ceiling caps the response at 4.0; anything else
    // (4.01 or higher) gets our best, 4.01.
    if header.trim() == "4.0" {
        return Ok(ODataVersion::V40);
    }
    let _ = requested;
    Ok(ODataVersion::V401)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_defaults_to_latest() {
        assert_eq!(negotiate_version(None).unwrap(), ODataVersion::V401);
    }

    #[test]
    fn explicit_4_0_caps_the_response() {
        assert_eq!(negotiate_version(Some("4.0")).unwrap(), ODataVersion::V40);
    }

    #[test]
    fn explicit_4_01_uses_latest() {
        assert_eq!(negotiate_version(Some("4.01")).unwrap(), ODataVersion::V401);
    }

    #[test]
    fn below_4_0_is_rejected() {
        assert!(negotiate_version(Some("3.0")).is_err());
    }
}
