//! Versioned values
//!
//! A [`StoredValue`] is serialized as JSON. The store-assigned version is
//! carried next to the payload, never inside it: implementors mark their
//! version field `#[serde(skip)]` and the decode helpers fill it in from
//! the key's metadata.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::kv::KeyValue;

/// A value that remembers which store version it was read at
pub trait StoredValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Version the value was read at (0 for values never read from the store)
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);
}

pub(crate) fn encode<V: Serialize>(key: &str, value: &V) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })
}

/// Decode a stored key into a value, attaching the key's version
pub fn decode_kv<V: StoredValue>(kv: &KeyValue) -> Result<V, StorageError> {
    let mut value: V = serde_json::from_slice(&kv.value).map_err(|source| StorageError::Decode {
        key: kv.key.clone(),
        source,
    })?;
    value.set_version(kv.version);
    Ok(value)
}

pub fn decode_kvs<V: StoredValue>(kvs: &[KeyValue]) -> Result<Vec<V>, StorageError> {
    kvs.iter().map(decode_kv).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Item {
        name: String,
        #[serde(skip)]
        version: i64,
    }

    impl StoredValue for Item {
        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }
    }

    #[test]
    fn test_version_not_serialized() {
        let item = Item {
            name: "x".into(),
            version: 9,
        };
        let bytes = encode("/k", &item).unwrap();
        assert_eq!(bytes, br#"{"name":"x"}"#);
    }

    #[test]
    fn test_decode_sets_version() {
        let kv = KeyValue {
            key: "/k".into(),
            value: br#"{"name":"x"}"#.to_vec(),
            create_revision: 1,
            mod_revision: 3,
            version: 3,
            lease: None,
        };
        let item: Item = decode_kv(&kv).unwrap();
        assert_eq!(item.name, "x");
        assert_eq!(item.version(), 3);
    }

    #[test]
    fn test_decode_error_names_key() {
        let kv = KeyValue {
            key: "/broken".into(),
            value: b"not json".to_vec(),
            create_revision: 1,
            mod_revision: 1,
            version: 1,
            lease: None,
        };
        let err = decode_kv::<Item>(&kv).unwrap_err();
        assert!(err.to_string().contains("/broken"));
    }
}
