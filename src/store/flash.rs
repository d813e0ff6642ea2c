//! Flash-backed KV backend
//!
//! The whole store lives in one record image inside a single flash region.
//! A RAM mirror of the entry table serves loads; every store rewrites the
//! image.

use crate::config::store_defaults::FLASH_SIZE;
use crate::store::backend::{EntryTable, KvBackend, Namespace, StoreError, Value};
use crate::store::image::{self, ImageError};
use embedded_storage::{ReadStorage, Storage};

pub struct FlashBackend<S: Storage> {
    storage: S,
    offset: u32,
    mirror: EntryTable,
    scratch: [u8; FLASH_SIZE],
}

impl<S: Storage> FlashBackend<S> {
    /// Backend over `storage`, using `FLASH_SIZE` bytes starting at `offset`
    pub fn new(storage: S, offset: u32) -> Self {
        Self {
            storage,
            offset,
            mirror: EntryTable::new(),
            scratch: [0xFF; FLASH_SIZE],
        }
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let len = image::encode(&self.mirror, &mut self.scratch)?;
        self.storage
            .write(self.offset, &self.scratch[..len])
            .map_err(|_| StoreError::WriteFailed)
    }

    #[cfg(test)]
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: Storage> KvBackend for FlashBackend<S> {
    fn open(&mut self) -> Result<(), StoreError> {
        ReadStorage::read(&mut self.storage, self.offset, &mut self.scratch)
            .map_err(|_| StoreError::Unreadable)?;

        self.mirror = match image::decode(&self.scratch) {
            Ok(table) => {
                log::info!(target: "store", "loaded {} entries from flash", table.len());
                table
            }
            Err(ImageError::BadMagic) => {
                log::info!(target: "store", "no config image, starting from defaults");
                EntryTable::new()
            }
            Err(e) => {
                log::warn!(target: "store", "config image rejected ({:?}), starting from defaults", e);
                EntryTable::new()
            }
        };
        Ok(())
    }

    fn load(&mut self, namespace: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.mirror.get(namespace, key).cloned())
    }

    fn store(&mut self, namespace: Namespace, key: &str, value: &Value) -> Result<(), StoreError> {
        let previous = self.mirror.put(namespace, key, value.clone())?;
        if let Err(e) = self.flush() {
            self.mirror.restore(namespace, key, previous);
            return Err(e);
        }
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), StoreError> {
        self.mirror.clear();
        self.flush()
    }
}
