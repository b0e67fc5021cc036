//! Input guards for engine entry points.
//!
//! The store is trusted to reject ids it does not know; these checks only
//! catch input that is malformed before it is worth a network round trip.

use crate::error::{InboxError, Result};

pub const MAX_ID_LENGTH: usize = 256;

/// Validate an entity or user id.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(InboxError::Validation("id cannot be empty".to_string()));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(InboxError::Validation(format!(
            "id too long (max {} characters)",
            MAX_ID_LENGTH
        )));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(InboxError::Validation(
            "id contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a batch of ids for a multi-delete. An empty set is rejected
/// rather than treated as a trivially successful no-op.
pub fn validate_id_set(ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(InboxError::Validation(
            "delete set cannot be empty".to_string(),
        ));
    }
    for id in ids {
        validate_id(id)?;
    }
    Ok(())
}
