//! The refcounted id ↔ value table behind every boxed ref.
//!
//! Ids below [`crate::refs::id::NEXT_ID`] belong to the predefined globals
//! and are never counted; everything else lives here. Dropping a refcount to
//! zero nils the slot and pools the id, but deliberately leaves the reverse
//! map entry behind until a new value claims the id: once a value has
//! deduplicated to an id, it keeps doing so until the id is recycled.

use std::collections::HashMap;

use crate::errors::GoJsError;
use crate::refs::id::NEXT_ID;
use crate::values::{InternKey, JsValue};

#[derive(Debug, Default)]
pub(crate) struct ValueTable {
    values: Vec<Option<JsValue>>,
    refcounts: Vec<u32>,
    pool: Vec<u32>,
    ids: HashMap<InternKey, u32>,
}

impl ValueTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Interns `value`, bumping the refcount of an existing id when the
    /// value deduplicates. Returns the absolute id.
    pub(crate) fn increment(&mut self, value: JsValue) -> u32 {
        let key = value.intern_key();
        let id = match key.as_ref().and_then(|k| self.ids.get(k)).copied() {
            Some(id) => id,
            None => {
                let id = match self.pool.pop() {
                    Some(id) => {
                        let index = (id - NEXT_ID) as usize;
                        self.values[index] = Some(value);
                        self.refcounts[index] = 0;
                        id
                    }
                    None => {
                        let id = NEXT_ID + self.values.len() as u32;
                        self.values.push(Some(value));
                        self.refcounts.push(0);
                        id
                    }
                };
                if let Some(key) = key {
                    self.ids.insert(key, id);
                }
                id
            }
        };
        let index = (id - NEXT_ID) as usize;
        self.refcounts[index] += 1;
        id
    }

    /// Releases one reference. A no-op for predefined ids.
    pub(crate) fn decrement(&mut self, id: u32) -> Result<(), GoJsError> {
        if id < NEXT_ID {
            return Ok(());
        }
        let index = (id - NEXT_ID) as usize;
        match self.refcounts.get_mut(index) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.values[index] = None;
                    self.pool.push(id);
                }
                Ok(())
            }
            _ => Err(GoJsError::InvalidRef(id)),
        }
    }

    /// Looks up a live value by absolute id.
    pub(crate) fn get(&self, id: u32) -> Result<JsValue, GoJsError> {
        if id < NEXT_ID {
            return Err(GoJsError::InvalidRef(id));
        }
        let index = (id - NEXT_ID) as usize;
        self.values
            .get(index)
            .and_then(|slot| slot.clone())
            .ok_or(GoJsError::InvalidRef(id))
    }

    /// Drops every live value; the table is unusable state shared with a
    /// guest that just exited.
    pub(crate) fn reset(&mut self) {
        self.values.clear();
        self.refcounts.clear();
        self.pool.clear();
        self.ids.clear();
    }

    #[cfg(test)]
    pub(crate) fn live_len(&self) -> usize {
        self.values.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::ObjectArray;
    use std::sync::Arc;

    #[test]
    fn round_trip() {
        let mut table = ValueTable::new();
        let v = JsValue::string("abc");
        let id = table.increment(v.clone());
        assert_eq!(table.get(id).unwrap(), v);
    }

    #[test]
    fn identical_strings_share_one_id() {
        let mut table = ValueTable::new();
        let a = table.increment(JsValue::string("x"));
        let b = table.increment(JsValue::string("x"));
        assert_eq!(a, b);
        assert_eq!(table.live_len(), 1);

        // Two drops are needed before the slot clears.
        table.decrement(a).unwrap();
        assert!(table.get(a).is_ok());
        table.decrement(a).unwrap();
        assert!(table.get(a).is_err());
    }

    #[test]
    fn freed_ids_are_reused_first() {
        let mut table = ValueTable::new();
        let a = table.increment(JsValue::string("a"));
        let b = table.increment(JsValue::string("b"));
        table.decrement(a).unwrap();

        let c = table.increment(JsValue::Array(Arc::new(ObjectArray::new(vec![]))));
        assert_eq!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn predefined_ids_are_not_counted() {
        let mut table = ValueTable::new();
        for id in 0..NEXT_ID {
            table.decrement(id).unwrap();
        }
        assert!(table.get(NEXT_ID).is_err());
    }

    #[test]
    fn reverse_map_entry_outlives_the_slot() {
        let mut table = ValueTable::new();
        let a = table.increment(JsValue::string("sticky"));
        table.decrement(a).unwrap();

        // The slot is gone but the intern entry is retained: re-interning the
        // same content claims the same id without repopulating the slot.
        let b = table.increment(JsValue::string("sticky"));
        assert_eq!(a, b);
        assert!(table.get(b).is_err());
    }

    #[test]
    fn distinct_value_overwrites_a_stale_reverse_entry() {
        let mut table = ValueTable::new();
        let a = table.increment(JsValue::string("old"));
        table.decrement(a).unwrap();

        let b = table.increment(JsValue::string("new"));
        assert_eq!(a, b);
        assert_eq!(table.get(b).unwrap(), JsValue::string("new"));
    }
}
