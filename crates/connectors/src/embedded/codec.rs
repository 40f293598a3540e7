use crate::error::ConnectorError;
use serde::{Serialize, de::DeserializeOwned};
use sled::transaction::ConflictableTransactionError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ConnectorError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ConnectorError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Batch numbers are stored big-endian so trees iterate in batch order.
pub(crate) fn batch_key(number: u32) -> [u8; 4] {
    number.to_be_bytes()
}

pub(crate) fn number_from_key(key: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = key.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Wraps `err` so that it aborts the surrounding sled transaction.
pub(crate) fn abort<E, X: Into<E>>(err: X) -> ConflictableTransactionError<E> {
    ConflictableTransactionError::Abort(err.into())
}
