use crate::ModelError;

const RESERVED_META_DIR: &str = "_meta";

/// Check that `name` is usable as a single path component of the metadata tree.
///
/// `kind` is only used for the error message (`"flow"`, `"step"`, `"artifact"`, ...).
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), ModelError> {
    let invalid = |reason| ModelError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if name == RESERVED_META_DIR {
        return Err(invalid("is reserved"));
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(invalid("must not contain path separators"));
    }
    Ok(())
}
