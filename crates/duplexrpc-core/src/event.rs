//! Event descriptors and their stable hash.
//!
//! Two descriptors that serialize to the same JSON bytes are the same logical
//! subscription. The hash is FNV-1a 64 over those bytes, so it is stable
//! across processes and runs.

use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::TransportError;
use crate::request::to_raw;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a 64-bit hash of `bytes`.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A (name, filter-parameters) pair identifying one server-side subscription.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    raw: Box<RawValue>,
    hash: u64,
}

impl EventDescriptor {
    /// Build a descriptor from any serializable value, commonly a bare event
    /// name such as `"new_block"`.
    pub fn new<E: Serialize + ?Sized>(event: &E) -> Result<Self, TransportError> {
        let raw = to_raw(event)?;
        let hash = fnv1a64(raw.get().as_bytes());
        Ok(Self { raw, hash })
    }

    /// Build `{ name: params }`, the shape used by events that take filters.
    pub fn with_params<P: Serialize + ?Sized>(
        name: &str,
        params: &P,
    ) -> Result<Self, TransportError> {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert(
            name.to_string(),
            serde_json::to_value(params).map_err(TransportError::Serialization)?,
        );
        Self::new(&wrapped)
    }

    /// Stable identity of this descriptor.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The serialized descriptor, as sent in `{"notify": ...}`.
    pub fn raw(&self) -> &RawValue {
        &self.raw
    }

    /// Params for the reserved `subscribe` / `unsubscribe` meta-methods.
    pub fn notify_params(&self) -> Result<Box<RawValue>, TransportError> {
        #[derive(Serialize)]
        struct Notify<'a> {
            notify: &'a RawValue,
        }
        to_raw(&Notify { notify: &self.raw })
    }
}

impl std::fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.raw.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn same_descriptor_same_hash() {
        let a = EventDescriptor::new("new_block").unwrap();
        let b = EventDescriptor::new("new_block").unwrap();
        let c = EventDescriptor::new("block_ordered").unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash(), fnv1a64(b"\"new_block\""));
    }

    #[test]
    fn filter_params_change_identity() {
        let a = EventDescriptor::with_params("invoke_contract", &serde_json::json!({"contract": "a"}))
            .unwrap();
        let b = EventDescriptor::with_params("invoke_contract", &serde_json::json!({"contract": "b"}))
            .unwrap();
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.to_string(), r#"{"invoke_contract":{"contract":"a"}}"#);
    }

    #[test]
    fn notify_wrapper() {
        let d = EventDescriptor::new("new_topo_height").unwrap();
        assert_eq!(
            d.notify_params().unwrap().get(),
            r#"{"notify":"new_topo_height"}"#
        );
    }
}
