// Case-insensitive naming for groups, polls and options.

use thiserror::Error;

/// Field separator in the persisted flat files. Never valid inside a name.
pub const DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name must not be empty")]
    Empty,

    #[error("name `{name}` contains the reserved character `{ch}`")]
    ReservedCharacter { name: String, ch: char },
}

/// Lookup key for a name. Two names that differ only in case share a key.
pub fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Reject names that could not round-trip through the flat files.
pub fn validate(name: &str) -> Result<(), NameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if let Some(ch) = trimmed
        .chars()
        .find(|c| *c == DELIMITER || *c == '\n' || *c == '\r')
    {
        return Err(NameError::ReservedCharacter {
            name: trimmed.to_string(),
            ch,
        });
    }
    Ok(())
}

/// Case-insensitive ordering used for listings.
pub fn cmp_ignore_case(a: &str, b: &str) -> std::cmp::Ordering {
    fold(a).cmp(&fold(b)).then_with(|| a.cmp(b))
}
