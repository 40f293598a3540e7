use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Length of a rendered [`RunToken`] (a simple-format UUID).
pub const RUN_TOKEN_LEN: usize = 32;

/// Random per-run token carried by every timeout a migration run hides.
///
/// The token lets `abort` find exactly the rows one run claimed, even when
/// the run crashed before its batch records were written.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunToken(Arc<str>);

impl RunToken {
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().simple().to_string()))
    }

    /// Accepts a previously generated token, rejecting anything that could not
    /// have come from [`RunToken::generate`].
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == RUN_TOKEN_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_parse_back() {
        let token = RunToken::generate();
        assert_eq!(token.as_str().len(), RUN_TOKEN_LEN);
        assert_eq!(RunToken::parse(token.as_str()), Some(token));
    }

    #[test]
    fn rejects_foreign_tokens() {
        assert!(RunToken::parse("not-a-token").is_none());
        assert!(RunToken::parse(&"z".repeat(RUN_TOKEN_LEN)).is_none());
    }
}
