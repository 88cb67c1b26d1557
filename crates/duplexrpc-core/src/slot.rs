//! Caller-supplied output slots for batch results.
//!
//! A batch mixes methods with unrelated result shapes, so each slot decodes
//! its own payload. `Option<T>` is the usual slot: it stays `None` unless the
//! matching response decoded successfully.

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

/// Somewhere to put one decoded batch result.
pub trait ResultSlot: Send {
    /// Decode `raw` into this slot.
    fn fill(&mut self, raw: &RawValue) -> Result<(), serde_json::Error>;
}

impl<T: DeserializeOwned + Send> ResultSlot for Option<T> {
    fn fill(&mut self, raw: &RawValue) -> Result<(), serde_json::Error> {
        *self = Some(serde_json::from_str(raw.get())?);
        Ok(())
    }
}
