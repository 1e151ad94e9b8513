//! Document-identifier syntax.
//!
//! A doc id addresses a room from the outside world, so it is checked at
//! every boundary: the HTTP upgrade (both proxy and backend) and every
//! frame validator.

use thiserror::Error;

/// Maximum doc id length, counted in characters.
pub const MAX_DOC_ID_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocIdError {
    #[error("doc id is required")]
    Empty,
    #[error("doc id must be at most {MAX_DOC_ID_LEN} characters")]
    TooLong,
    #[error("doc id may only contain letters, numbers, hyphens and underscores")]
    InvalidCharacter,
}

/// Checks that `doc` is 1–256 characters of letters, digits, `-` or `_`.
pub fn doc_id(doc: &str) -> Result<(), DocIdError> {
    if doc.is_empty() {
        return Err(DocIdError::Empty);
    }
    let mut len = 0usize;
    for ch in doc.chars() {
        len += 1;
        if !(ch.is_alphanumeric() || ch == '-' || ch == '_') {
            return Err(DocIdError::InvalidCharacter);
        }
    }
    if len > MAX_DOC_ID_LEN {
        return Err(DocIdError::TooLong);
    }
    Ok(())
}
