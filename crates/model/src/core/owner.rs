//! String encoding of timeout ownership for stores that cannot grow a status
//! column. The owning-endpoint field itself is rewritten:
//!
//! - `Sales` : available, owned by the `Sales` endpoint
//! - `__hidden__<token>__Sales` : claimed by the run identified by `<token>`
//! - `__migrated__Sales` : permanently moved to the target

use crate::core::identifiers::{RUN_TOKEN_LEN, RunToken};
use std::fmt;

pub const HIDDEN_PREFIX: &str = "__hidden__";
pub const MIGRATED_PREFIX: &str = "__migrated__";
const TOKEN_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerMarker {
    Available { endpoint: String },
    InProgress { token: RunToken, endpoint: String },
    Migrated { endpoint: String },
}

impl OwnerMarker {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(MIGRATED_PREFIX) {
            return OwnerMarker::Migrated {
                endpoint: rest.to_string(),
            };
        }

        if let Some(rest) = raw.strip_prefix(HIDDEN_PREFIX)
            && rest.len() >= RUN_TOKEN_LEN + TOKEN_SEPARATOR.len()
            && let Some(token) = RunToken::parse(&rest[..RUN_TOKEN_LEN])
            && let Some(endpoint) = rest[RUN_TOKEN_LEN..].strip_prefix(TOKEN_SEPARATOR)
        {
            return OwnerMarker::InProgress {
                token,
                endpoint: endpoint.to_string(),
            };
        }

        // Anything else, including a malformed hidden prefix, is a plain owner.
        OwnerMarker::Available {
            endpoint: raw.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            OwnerMarker::Available { endpoint }
            | OwnerMarker::InProgress { endpoint, .. }
            | OwnerMarker::Migrated { endpoint } => endpoint,
        }
    }

    pub fn is_migrated(&self) -> bool {
        matches!(self, OwnerMarker::Migrated { .. })
    }

    /// Prefix shared by every owner value hidden under `token`.
    pub fn hidden_prefix(token: &RunToken) -> String {
        format!("{HIDDEN_PREFIX}{token}{TOKEN_SEPARATOR}")
    }

    /// Length of [`OwnerMarker::hidden_prefix`], needed by SQL `substring` calls.
    pub fn hidden_prefix_len() -> usize {
        HIDDEN_PREFIX.len() + RUN_TOKEN_LEN + TOKEN_SEPARATOR.len()
    }
}

impl fmt::Display for OwnerMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerMarker::Available { endpoint } => f.write_str(endpoint),
            OwnerMarker::InProgress { token, endpoint } => {
                write!(f, "{}{endpoint}", Self::hidden_prefix(token))
            }
            OwnerMarker::Migrated { endpoint } => write!(f, "{MIGRATED_PREFIX}{endpoint}"),
        }
    }
}
