//! Log decoding against a parsed contract ABI.
//!
//! A [`EventDecoder`] indexes the ABI's events by their topic-0 hash and
//! turns raw logs into [`DecodedEvent`]s. Payload values are serialized to
//! JSON with a deliberately stringly-typed mapping: integers wider than 53
//! bits become decimal strings, byte blobs become `0x`-prefixed lowercase
//! hex, fixed-width bytes keep their declared width, and tuples become
//! nested objects keyed by component name.

use std::collections::HashMap;

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    json_abi::{Event, JsonAbi, Param},
    primitives::B256,
    rpc::types::Log,
};
use serde_json::{Map, Value};

use crate::{
    error::IndexerError,
    types::{DecodedEvent, MAX_SAFE_INTEGER},
};

/// Decoder for one contract's events, keyed by topic-0.
#[derive(Clone, Debug)]
pub struct EventDecoder {
    events_by_topic: HashMap<B256, Event>,
}

impl EventDecoder {
    /// Parse a raw JSON ABI array and index its events.
    ///
    /// # Errors
    ///
    /// Returns an `Abi` error when the text is not a valid ABI.
    pub fn from_abi_json(raw: &str) -> Result<Self, IndexerError> {
        let abi: JsonAbi = serde_json::from_str(raw)
            .map_err(|e| IndexerError::abi(format!("malformed ABI JSON: {e}")))?;
        Ok(Self::from_abi(&abi))
    }

    #[must_use]
    pub fn from_abi(abi: &JsonAbi) -> Self {
        let events_by_topic = abi
            .events()
            .map(|event| (event.selector(), event.clone()))
            .collect();
        Self { events_by_topic }
    }

    /// Topic-0 hash for a configured event name.
    ///
    /// # Errors
    ///
    /// Returns an `Abi` error when no event with that name exists, so
    /// misconfigured filters fail before the first network call.
    pub fn topic(&self, event_name: &str) -> Result<B256, IndexerError> {
        self.events_by_topic
            .iter()
            .find(|(_, event)| event.name == event_name)
            .map(|(topic, _)| *topic)
            .ok_or_else(|| {
                IndexerError::abi(format!("event {event_name} not found in contract ABI"))
            })
    }

    /// Decode a raw log into a [`DecodedEvent`].
    ///
    /// Returns `Ok(None)` when the log's topic-0 matches no event in the
    /// ABI; callers skip such logs. The returned event's `block_timestamp`
    /// is 0 and is filled in by the fetcher.
    ///
    /// # Errors
    ///
    /// Returns an `Abi` error when the log matches an event but its topics
    /// or data do not decode, and an `Rpc` error when the log is missing
    /// position fields (a pending log).
    pub fn decode_log(&self, log: &Log) -> Result<Option<DecodedEvent>, IndexerError> {
        let Some(topic0) = log.topic0() else {
            return Ok(None);
        };
        let Some(event) = self.events_by_topic.get(topic0) else {
            return Ok(None);
        };

        let block_number = log
            .block_number
            .ok_or_else(|| IndexerError::rpc("log is missing a block number"))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_else(|| IndexerError::rpc("log is missing a transaction hash"))?;
        let log_index = log
            .log_index
            .ok_or_else(|| IndexerError::rpc("log is missing a log index"))?;

        let decoded = event
            .decode_log_parts(log.topics().iter().copied(), log.data().data.as_ref())
            .map_err(|e| {
                IndexerError::abi(format!("failed to decode {} log: {e}", event.name))
            })?;

        let mut indexed = decoded.indexed.iter();
        let mut body = decoded.body.iter();
        let mut payload = Map::with_capacity(event.inputs.len());
        for input in &event.inputs {
            let value = if input.indexed { indexed.next() } else { body.next() };
            let value = value.ok_or_else(|| {
                IndexerError::abi(format!(
                    "decoded {} log is missing parameter {}",
                    event.name, input.name
                ))
            })?;
            payload.insert(input.name.clone(), value_to_json(value, &input.components));
        }

        Ok(Some(DecodedEvent {
            contract_address: format!("{:#x}", log.address()),
            block_number,
            block_timestamp: 0,
            transaction_hash: format!("{transaction_hash:#x}"),
            log_index,
            event_name: event.name.clone(),
            payload,
        }))
    }
}

/// Serialize one decoded value.
///
/// `components` carries the ABI component declarations for tuple-typed
/// values (and elements of tuple arrays); scalar values ignore it.
fn value_to_json(value: &DynSolValue, components: &[Param]) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Address(address) => Value::String(address.to_string()),
        DynSolValue::Uint(v, _) => match u64::try_from(*v) {
            Ok(n) if n <= MAX_SAFE_INTEGER => Value::from(n),
            _ => Value::String(v.to_string()),
        },
        DynSolValue::Int(v, _) => match i64::try_from(*v) {
            Ok(n) if n.unsigned_abs() <= MAX_SAFE_INTEGER => Value::from(n),
            _ => Value::String(v.to_string()),
        },
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", alloy::hex::encode(&word[..*size])))
        }
        DynSolValue::Bytes(bytes) => {
            Value::String(format!("0x{}", alloy::hex::encode(bytes)))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => Value::Array(
            items.iter().map(|item| value_to_json(item, components)).collect(),
        ),
        DynSolValue::Tuple(items) => {
            let mut object = Map::with_capacity(items.len());
            for (component, item) in components.iter().zip(items) {
                object.insert(
                    component.name.clone(),
                    value_to_json(item, &component.components),
                );
            }
            Value::Object(object)
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, I256, LogData, U256, address, b256, keccak256};
    use serde_json::json;

    const TRANSFER_ABI: &str = r#"[
        {
            "type": "event",
            "name": "Transfer",
            "anonymous": false,
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ]
        }
    ]"#;

    const TRANSFER_TOPIC: B256 =
        b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

    fn transfer_log(from: Address, to: Address, value: U256) -> Log {
        let topics = vec![TRANSFER_TOPIC, from.into_word(), to.into_word()];
        let data = Bytes::from(value.to_be_bytes::<32>());
        Log {
            inner: alloy::primitives::Log {
                address: address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
                data: LogData::new_unchecked(topics, data),
            },
            block_hash: Some(keccak256("block")),
            block_number: Some(19_000_000),
            block_timestamp: None,
            transaction_hash: Some(keccak256("tx")),
            transaction_index: Some(3),
            log_index: Some(7),
            removed: false,
        }
    }

    #[test]
    fn topic_matches_keccak_of_signature() -> anyhow::Result<()> {
        let decoder = EventDecoder::from_abi_json(TRANSFER_ABI)?;
        let topic = decoder.topic("Transfer")?;
        assert_eq!(topic, keccak256("Transfer(address,address,uint256)"));
        assert_eq!(topic, TRANSFER_TOPIC);
        Ok(())
    }

    #[test]
    fn unknown_event_name_fails_before_any_network_call() -> anyhow::Result<()> {
        let decoder = EventDecoder::from_abi_json(TRANSFER_ABI)?;
        let err = decoder.topic("Swap").unwrap_err();
        assert!(matches!(err, IndexerError::Abi(msg) if msg.contains("Swap")));
        Ok(())
    }

    #[test]
    fn malformed_abi_is_rejected() {
        let err = EventDecoder::from_abi_json("{not json").unwrap_err();
        assert!(matches!(err, IndexerError::Abi(_)));
    }

    #[test]
    fn decodes_erc20_transfer() -> anyhow::Result<()> {
        let decoder = EventDecoder::from_abi_json(TRANSFER_ABI)?;
        let from = address!("0x1234567890123456789012345678901234567890");
        let to = address!("0x0abcdef000000000000000000000000000000bcd");
        let value = U256::from(1_000_000_000_000_000_000_u64);

        let event = decoder
            .decode_log(&transfer_log(from, to, value))?
            .expect("Transfer should match the ABI");

        assert_eq!(event.event_name, "Transfer");
        assert_eq!(event.contract_address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(event.block_number, 19_000_000);
        assert_eq!(event.block_timestamp, 0);
        assert_eq!(event.log_index, 7);

        // Addresses are compared case-insensitively; value is wider than 53
        // bits and therefore a decimal string.
        let payload_from = event.payload["from"].as_str().unwrap().to_lowercase();
        let payload_to = event.payload["to"].as_str().unwrap().to_lowercase();
        assert_eq!(payload_from, "0x1234567890123456789012345678901234567890");
        assert_eq!(payload_to, "0x0abcdef000000000000000000000000000000bcd");
        assert_eq!(event.payload["value"], json!("1000000000000000000"));

        // Payload keys follow ABI declaration order.
        let keys: Vec<&String> = event.payload.keys().collect();
        assert_eq!(keys, ["from", "to", "value"]);
        Ok(())
    }

    #[test]
    fn unknown_topic_is_skipped_not_an_error() -> anyhow::Result<()> {
        let decoder = EventDecoder::from_abi_json(TRANSFER_ABI)?;
        let mut log = transfer_log(
            Address::ZERO,
            Address::ZERO,
            U256::from(1u64),
        );
        log.inner.data = LogData::new_unchecked(vec![keccak256("Swap()")], Bytes::new());

        assert_eq!(decoder.decode_log(&log)?, None);
        Ok(())
    }

    #[test]
    fn small_integers_stay_numeric() -> anyhow::Result<()> {
        assert_eq!(value_to_json(&DynSolValue::Uint(U256::from(42u64), 256), &[]), json!(42));
        assert_eq!(
            value_to_json(&DynSolValue::Int(I256::try_from(-7i64)?, 256), &[]),
            json!(-7)
        );
        Ok(())
    }

    #[test]
    fn large_integers_become_decimal_strings() -> anyhow::Result<()> {
        let just_above = U256::from(MAX_SAFE_INTEGER) + U256::from(1u64);
        assert_eq!(
            value_to_json(&DynSolValue::Uint(just_above, 256), &[]),
            json!("9007199254740992")
        );

        let negative = I256::try_from(-9_007_199_254_740_992_i64)?;
        assert_eq!(
            value_to_json(&DynSolValue::Int(negative, 256), &[]),
            json!("-9007199254740992")
        );
        Ok(())
    }

    #[test]
    fn boundary_integer_stays_numeric() {
        assert_eq!(
            value_to_json(&DynSolValue::Uint(U256::from(MAX_SAFE_INTEGER), 256), &[]),
            json!(9_007_199_254_740_991_u64)
        );
    }

    #[test]
    fn fixed_bytes_keep_declared_width() {
        let word = B256::repeat_byte(0xab);
        assert_eq!(
            value_to_json(&DynSolValue::FixedBytes(word, 4), &[]),
            json!("0xabababab")
        );
        assert_eq!(
            value_to_json(&DynSolValue::FixedBytes(word, 32), &[]),
            json!(format!("0x{}", "ab".repeat(32)))
        );
    }

    #[test]
    fn dynamic_bytes_are_lowercase_hex() {
        assert_eq!(
            value_to_json(&DynSolValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]), &[]),
            json!("0xdeadbeef")
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let value = DynSolValue::Array(vec![
            DynSolValue::Uint(U256::from(3u64), 256),
            DynSolValue::Uint(U256::from(1u64), 256),
            DynSolValue::Uint(U256::from(2u64), 256),
        ]);
        assert_eq!(value_to_json(&value, &[]), json!([3, 1, 2]));
    }

    #[test]
    fn tuples_become_nested_objects() -> anyhow::Result<()> {
        let abi = r#"[
            {
                "type": "event",
                "name": "OrderPlaced",
                "anonymous": false,
                "inputs": [
                    {"name": "id", "type": "uint64", "indexed": false},
                    {
                        "name": "order",
                        "type": "tuple",
                        "indexed": false,
                        "components": [
                            {"name": "maker", "type": "address"},
                            {"name": "amount", "type": "uint256"}
                        ]
                    }
                ]
            }
        ]"#;
        let decoder = EventDecoder::from_abi_json(abi)?;
        let topic = decoder.topic("OrderPlaced")?;
        assert_eq!(topic, keccak256("OrderPlaced(uint64,(address,uint256))"));

        let maker = address!("0x1234567890123456789012345678901234567890");
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(9u64).to_be_bytes::<32>());
        data.extend_from_slice(maker.into_word().as_slice());
        data.extend_from_slice(&U256::from(500u64).to_be_bytes::<32>());

        let log = Log {
            inner: alloy::primitives::Log {
                address: address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
                data: LogData::new_unchecked(vec![topic], Bytes::from(data)),
            },
            block_hash: Some(keccak256("block")),
            block_number: Some(100),
            block_timestamp: None,
            transaction_hash: Some(keccak256("tx")),
            transaction_index: Some(0),
            log_index: Some(0),
            removed: false,
        };

        let event = decoder.decode_log(&log)?.expect("OrderPlaced should match the ABI");
        assert_eq!(event.payload["id"], json!(9));
        let order = event.payload["order"].as_object().unwrap();
        assert_eq!(
            order["maker"].as_str().unwrap().to_lowercase(),
            "0x1234567890123456789012345678901234567890"
        );
        assert_eq!(order["amount"], json!(500));
        Ok(())
    }

    #[test]
    fn indexed_reference_types_surface_their_topic_hash() -> anyhow::Result<()> {
        // Indexed strings are stored as the keccak of their contents; the
        // original value is unrecoverable, so the 32-byte hash comes back.
        let abi = r#"[
            {
                "type": "event",
                "name": "Named",
                "anonymous": false,
                "inputs": [
                    {"name": "key", "type": "string", "indexed": true},
                    {"name": "count", "type": "uint32", "indexed": false}
                ]
            }
        ]"#;
        let decoder = EventDecoder::from_abi_json(abi)?;
        let topic = decoder.topic("Named")?;
        let key_hash = keccak256("hello");

        let log = Log {
            inner: alloy::primitives::Log {
                address: address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
                data: LogData::new_unchecked(
                    vec![topic, key_hash],
                    Bytes::from(U256::from(3u64).to_be_bytes::<32>()),
                ),
            },
            block_hash: Some(keccak256("block")),
            block_number: Some(100),
            block_timestamp: None,
            transaction_hash: Some(keccak256("tx")),
            transaction_index: Some(0),
            log_index: Some(0),
            removed: false,
        };

        let event = decoder.decode_log(&log)?.expect("Named should match the ABI");
        assert_eq!(
            event.payload["key"],
            json!(format!("0x{}", alloy::hex::encode(key_hash)))
        );
        assert_eq!(event.payload["count"], json!(3));
        Ok(())
    }

    #[test]
    fn serialization_is_stable_under_reencoding() -> anyhow::Result<()> {
        let value = DynSolValue::Uint(U256::from(1_000_000_000_000_000_000_u64), 256);
        let first = value_to_json(&value, &[]);
        let reencoded: Value = serde_json::from_str(&first.to_string())?;
        assert_eq!(first, reencoded);
        Ok(())
    }
}
