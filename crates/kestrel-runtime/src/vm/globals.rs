//! Global variable table shared by every task of a runtime
//!
//! Reads take the shared lock and writes the exclusive lock, each held for a
//! single slot access only.

use crate::value::Value;
use parking_lot::RwLock;
use std::sync::Arc;

/// Index-addressed global table, cheap to clone (shared by reference)
#[derive(Debug, Clone, Default)]
pub struct GlobalTable {
    slots: Arc<RwLock<Vec<Value>>>,
}

impl GlobalTable {
    /// Empty table with room for `capacity` slots before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Arc::new(RwLock::new(Vec::with_capacity(capacity))),
        }
    }

    /// Value of slot `index`; unset slots read as null
    pub fn get(&self, index: usize) -> Value {
        self.slots.read().get(index).cloned().unwrap_or(Value::Null)
    }

    /// Store into slot `index`, growing the table as needed
    pub fn set(&self, index: usize, value: Value) {
        let mut slots = self.slots.write();
        if index >= slots.len() {
            slots.resize(index + 1, Value::Null);
        }
        slots[index] = value;
    }

    /// Number of slots ever written (including gaps)
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same table
    pub fn ptr_eq(&self, other: &GlobalTable) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unset_reads_null() {
        let globals = GlobalTable::with_capacity(4);
        assert_eq!(globals.get(3), Value::Null);
        assert!(globals.is_empty());
    }

    #[test]
    fn test_set_grows() {
        let globals = GlobalTable::default();
        globals.set(5, Value::Integer(1));
        assert_eq!(globals.len(), 6);
        assert_eq!(globals.get(5), Value::Integer(1));
        assert_eq!(globals.get(2), Value::Null);
    }

    #[test]
    fn test_clones_share_storage() {
        let globals = GlobalTable::default();
        let shared = globals.clone();
        assert!(globals.ptr_eq(&shared));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || shared.set(i, Value::Integer(i as i64)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(globals.get(3), Value::Integer(3));
    }
}
