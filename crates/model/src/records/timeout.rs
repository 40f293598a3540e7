use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single scheduled delayed message as stored by a legacy timeout manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutData {
    pub id: String,
    pub destination: String,
    /// `Uuid::nil()` when the timeout was not requested by a saga.
    pub saga_id: Uuid,
    pub time: DateTime<Utc>,
    pub headers: BTreeMap<String, String>,
    pub state: Vec<u8>,
    pub owning_timeout_manager: String,
}

impl TimeoutData {
    /// Rough number of bytes this timeout occupies on the wire, used for
    /// payload-size ceilings when chunking writes.
    pub fn size_bytes(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.id.len()
            + self.destination.len()
            + self.owning_timeout_manager.len()
            + self.state.len()
            + headers
            + 16 // saga id
            + 8 // time
    }

    pub fn has_saga(&self) -> bool {
        !self.saga_id.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_accounts_for_body_and_headers() {
        let timeout = TimeoutData {
            id: "t-1".into(),
            destination: "Sales".into(),
            saga_id: Uuid::nil(),
            time: Utc::now(),
            headers: BTreeMap::from([("NServiceBus.MessageId".into(), "abc".into())]),
            state: vec![0; 100],
            owning_timeout_manager: "Sales".into(),
        };

        assert_eq!(timeout.size_bytes(), 3 + 5 + 5 + 100 + 24 + 24);
        assert!(!timeout.has_saga());
    }
}
