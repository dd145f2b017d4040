pub mod kind;
pub mod negotiate;
pub mod preference;

pub use kind::{AccessKind, HttpMethod, Root, classify};
pub use negotiate::{ODataVersion, negotiate_version};
pub use preference::{Preference, ReturnPreference};

use crate::error::ODataError;

/// Checks `method` against the access kind's allowed set, producing the
/// 405 `MethodNotAllowed` error (with its `Allow` header) when it isn't.
pub fn check_method_allowed(kind: &AccessKind, method: HttpMethod) -> Result<(), ODataError> {
    let allowed = kind.allowed_methods();
    if allowed.contains(&method) {
        return Ok(());
    }
    Err(ODataError::MethodNotAllowed {
        message: format!("{} is not allowed on this resource", method.as_str()),
        allowed: allowed.iter().map(|m| m.as_str()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::kind::Root;

    #[test]
    fn disallowed_method_reports_allow_header_contents() {
        let kind = AccessKind::Collection { root: Root::EntitySet("Products".into()) };
        let err = check_method_allowed(&kind, HttpMethod::Delete).unwrap_err();
        match err {
            ODataError::MethodNotAllowed { allowed, .. } => {
                assert!(allowed.contains(&"GET"));
                assert!(!allowed.contains(&"DELETE"));
            }
            _ => panic!("expected MethodNotAllowed"),
        }
    }
}
