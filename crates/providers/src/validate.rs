//! Response validation.
//!
//! A call that returned successfully can still carry nothing usable. Such
//! responses are rejected and retried like a transient failure.

use parley_core::provider::Content;
use thiserror::Error;

/// Placeholder texts some providers return in place of a filtered reply.
/// Compared case-insensitively against the whole trimmed reply.
pub const CENSORSHIP_STUBS: &[&str] = &["[censored]", "[content filtered]"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidResponse {
    #[error("empty response")]
    Empty,

    #[error("whitespace-only response")]
    Blank,

    #[error("structured response with no parts")]
    NoParts,

    #[error("structured response with no visible text")]
    EmptyParts,

    #[error("provider returned a censorship placeholder")]
    Censored,
}

fn is_censorship_stub(text: &str) -> bool {
    let trimmed = text.trim();
    CENSORSHIP_STUBS
        .iter()
        .any(|stub| trimmed.eq_ignore_ascii_case(stub))
}

/// Check that `content` carries a usable reply.
pub fn validate_content(content: &Content) -> Result<(), InvalidResponse> {
    match content {
        Content::Text(text) => {
            if text.is_empty() {
                return Err(InvalidResponse::Empty);
            }
            if text.trim().is_empty() {
                return Err(InvalidResponse::Blank);
            }
            if is_censorship_stub(text) {
                return Err(InvalidResponse::Censored);
            }
        }
        Content::Parts(parts) => {
            if parts.is_empty() {
                return Err(InvalidResponse::NoParts);
            }
            let visible = parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .any(|t| !t.trim().is_empty());
            if !visible {
                return Err(InvalidResponse::EmptyParts);
            }
            if is_censorship_stub(&content.to_text()) {
                return Err(InvalidResponse::Censored);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::provider::ContentPart;

    #[test]
    fn rejects_empty_and_blank_text() {
        assert_eq!(validate_content(&"".into()), Err(InvalidResponse::Empty));
        assert_eq!(validate_content(&" \n\t ".into()), Err(InvalidResponse::Blank));
    }

    #[test]
    fn rejects_empty_structures() {
        assert_eq!(
            validate_content(&Content::Parts(vec![])),
            Err(InvalidResponse::NoParts)
        );
        let parts = Content::Parts(vec![ContentPart::text(""), ContentPart::text("   ")]);
        assert_eq!(validate_content(&parts), Err(InvalidResponse::EmptyParts));

        let image_only = Content::Parts(vec![ContentPart {
            kind: "image_url".into(),
            text: None,
        }]);
        assert_eq!(validate_content(&image_only), Err(InvalidResponse::EmptyParts));
    }

    #[test]
    fn rejects_bare_censorship_stub() {
        assert_eq!(
            validate_content(&"[censored]".into()),
            Err(InvalidResponse::Censored)
        );
        assert_eq!(
            validate_content(&"  [CENSORED]\n".into()),
            Err(InvalidResponse::Censored)
        );
        let parts = Content::Parts(vec![ContentPart::text("[censored]")]);
        assert_eq!(validate_content(&parts), Err(InvalidResponse::Censored));
    }

    #[test]
    fn accepts_stub_inside_prose() {
        assert!(validate_content(&"The word [censored] appears in the log.".into()).is_ok());
    }

    #[test]
    fn accepts_normal_replies() {
        assert!(validate_content(&"Hello!".into()).is_ok());
        let parts = Content::Parts(vec![ContentPart::text(""), ContentPart::text("Hi")]);
        assert!(validate_content(&parts).is_ok());
    }
}
