//! Key-value backend abstraction for the config store
//!
//! The store keeps its cache in RAM and only calls into the backend on boot,
//! on writes and on factory reset.

use crate::config::limits::{STORE_KEY_LEN, STORE_MAX_ENTRIES, STORE_STR_LEN};
use heapless::{String, Vec};

/// Config namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Wifi,
    Eth,
    System,
    Switcher,
    Lora,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Wifi,
        Namespace::Eth,
        Namespace::System,
        Namespace::Switcher,
        Namespace::Lora,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Wifi => "wifi",
            Namespace::Eth => "eth",
            Namespace::System => "system",
            Namespace::Switcher => "switcher",
            Namespace::Lora => "lora",
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Namespace::Wifi => 0,
            Namespace::Eth => 1,
            Namespace::System => 2,
            Namespace::Switcher => 3,
            Namespace::Lora => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// Stored value slot type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    U8,
    U16,
    U32,
    F32,
    Bool,
    Str,
}

/// A typed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    Bool(bool),
    Str(String<STORE_STR_LEN>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::U32(_) => ValueKind::U32,
            Value::F32(_) => ValueKind::F32,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
        }
    }

    /// Build a string value; `None` when `text` does not fit a slot
    pub fn str(text: &str) -> Option<Self> {
        let mut s = String::new();
        s.push_str(text).ok()?;
        Some(Value::Str(s))
    }
}

/// Backend failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Backing partition could not be read
    Unreadable,
    /// A write did not complete
    WriteFailed,
    /// No room for another entry
    Full,
}

/// Persistent key-value backend
pub trait KvBackend {
    /// Prepare the backend; called once before any load
    fn open(&mut self) -> Result<(), StoreError>;

    fn load(&mut self, namespace: Namespace, key: &str) -> Result<Option<Value>, StoreError>;

    fn store(&mut self, namespace: Namespace, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Remove every entry
    fn erase_all(&mut self) -> Result<(), StoreError>;
}

/// One persisted entry
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub namespace: Namespace,
    pub key: String<STORE_KEY_LEN>,
    pub value: Value,
}

/// Fixed-capacity entry table shared by the RAM and flash backends
#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    entries: Vec<Entry, STORE_MAX_ENTRIES>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.namespace == namespace && e.key.as_str() == key)
            .map(|e| &e.value)
    }

    /// Insert or replace; returns the value previously held under the key
    pub fn put(&mut self, namespace: Namespace, key: &str, value: Value) -> Result<Option<Value>, StoreError> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.namespace == namespace && e.key.as_str() == key)
        {
            return Ok(Some(core::mem::replace(&mut entry.value, value)));
        }
        let mut k = String::new();
        k.push_str(key).map_err(|_| StoreError::Full)?;
        self.entries
            .push(Entry {
                namespace,
                key: k,
                value,
            })
            .map_err(|_| StoreError::Full)?;
        Ok(None)
    }

    /// Undo a `put`: restore `previous`, or drop the key if it was new
    pub fn restore(&mut self, namespace: Namespace, key: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                let _ = self.put(namespace, key, value);
            }
            None => self
                .entries
                .retain(|e| !(e.namespace == namespace && e.key.as_str() == key)),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

/// RAM-only backend
///
/// Used on the host, and on the device as the fallback image when the flash
/// partition is unreadable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    table: EntryTable,
    fail_open: bool,
    fail_writes: bool,
    writes: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail, as an unreadable partition would
    pub fn set_fail_open(&mut self, fail: bool) {
        self.fail_open = fail;
    }

    /// Make every subsequent `store` fail
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn table(&self) -> &EntryTable {
        &self.table
    }
}

impl KvBackend for MemoryBackend {
    fn open(&mut self) -> Result<(), StoreError> {
        if self.fail_open {
            return Err(StoreError::Unreadable);
        }
        Ok(())
    }

    fn load(&mut self, namespace: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.table.get(namespace, key).cloned())
    }

    fn store(&mut self, namespace: Namespace, key: &str, value: &Value) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::WriteFailed);
        }
        self.table.put(namespace, key, value.clone())?;
        self.writes += 1;
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::WriteFailed);
        }
        self.table.clear();
        Ok(())
    }
}
