//! Record encoding for persisted state.
//!
//! Every record is one format-version byte followed by a MessagePack body.

use super::StoreError;
use crate::message::{Envelope, Message, MessageId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current record format version.
pub const FORMAT_VERSION: u8 = 1;

/// Stored form of an [`Envelope`].
#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeRecord {
    id: MessageId,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
    persistent: bool,
    timestamp: u64,
    exchange: String,
    routing_key: String,
}

/// Encode a value as a versioned record.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let body = rmp_serde::to_vec_named(value)?;
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode a versioned record.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    match data.split_first() {
        Some((&FORMAT_VERSION, body)) => Ok(rmp_serde::from_slice(body)?),
        Some((version, _)) => Err(StoreError::Corrupt(format!(
            "unsupported record version {version}"
        ))),
        None => Err(StoreError::Corrupt("empty record".to_string())),
    }
}

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, StoreError> {
    let message = &envelope.message;
    encode(&EnvelopeRecord {
        id: message.id(),
        payload: message.payload().to_vec(),
        persistent: message.is_persistent(),
        timestamp: message.timestamp(),
        exchange: envelope.exchange.clone(),
        routing_key: envelope.routing_key.clone(),
    })
}

pub fn decode_envelope(data: &[u8]) -> Result<Envelope, StoreError> {
    let record: EnvelopeRecord = decode(data)?;
    let message = Message::restore(
        record.id,
        record.payload.into(),
        record.persistent,
        record.timestamp,
    );
    Ok(Envelope::new(message, record.exchange, record.routing_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeDef, ExchangeKind};

    #[test]
    fn test_envelope_record() {
        let envelope = Envelope::new(Message::persistent("task.."), "", "task_queue");
        let encoded = encode_envelope(&envelope).unwrap();
        assert_eq!(encoded[0], FORMAT_VERSION);

        let decoded = decode_envelope(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let def = ExchangeDef {
            name: "logs".into(),
            kind: ExchangeKind::Fanout,
            durable: true,
        };
        let mut encoded = encode(&def).unwrap();
        encoded[0] = 9;
        assert!(matches!(
            decode::<ExchangeDef>(&encoded),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(decode::<ExchangeDef>(&[]), Err(StoreError::Corrupt(_))));
    }
}
