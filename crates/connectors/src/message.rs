use chrono::{DateTime, Utc};
use model::records::timeout::TimeoutData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header carrying the id of the saga that requested a timeout.
pub const SAGA_ID_HEADER: &str = "SagaId";

/// A message waiting in native delayed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedMessage {
    pub message_id: String,
    pub destination: String,
    pub deliver_at: DateTime<Utc>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl From<&TimeoutData> for DelayedMessage {
    fn from(timeout: &TimeoutData) -> Self {
        let mut headers = timeout.headers.clone();
        if timeout.has_saga() {
            headers.insert(SAGA_ID_HEADER.into(), timeout.saga_id.to_string());
        }
        DelayedMessage {
            message_id: timeout.id.clone(),
            destination: timeout.destination.clone(),
            deliver_at: timeout.time,
            headers,
            body: timeout.state.clone(),
        }
    }
}

impl DelayedMessage {
    /// Delivery-ordered key: big-endian due time followed by the message id.
    /// The sign bit is flipped so times before the epoch sort first.
    pub(crate) fn delivery_key(&self) -> Vec<u8> {
        let micros = self.deliver_at.timestamp_micros() as u64 ^ (1 << 63);
        let mut key = micros.to_be_bytes().to_vec();
        key.extend_from_slice(self.message_id.as_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn timeout(saga_id: Uuid) -> TimeoutData {
        TimeoutData {
            id: "t-1".into(),
            destination: "Sales.Handler".into(),
            saga_id,
            time: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            headers: BTreeMap::from([("NServiceBus.MessageId".into(), "t-1".into())]),
            state: b"body".to_vec(),
            owning_timeout_manager: "Sales".into(),
        }
    }

    #[test]
    fn saga_id_header_only_when_requested_by_a_saga() {
        let saga = Uuid::new_v4();
        let message = DelayedMessage::from(&timeout(saga));
        assert_eq!(message.headers.get(SAGA_ID_HEADER), Some(&saga.to_string()));

        let message = DelayedMessage::from(&timeout(Uuid::nil()));
        assert!(!message.headers.contains_key(SAGA_ID_HEADER));
    }

    #[test]
    fn delivery_keys_sort_by_due_time() {
        let early = DelayedMessage::from(&timeout(Uuid::nil()));
        let mut late = early.clone();
        late.message_id = "a".into();
        late.deliver_at = early.deliver_at + chrono::Duration::seconds(1);
        assert!(early.delivery_key() < late.delivery_key());
    }

    #[test]
    fn delivery_keys_before_the_epoch_sort_first() {
        let mut message = DelayedMessage::from(&timeout(Uuid::nil()));
        let keys: Vec<_> = [
            Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 0).unwrap(),
            Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        ]
        .into_iter()
        .map(|at| {
            message.deliver_at = at;
            message.delivery_key()
        })
        .collect();

        assert!(keys[0] < keys[1]);
        assert!(keys[1] < keys[2]);
    }
}
