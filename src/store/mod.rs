//! Persistent namespaced configuration
//!
//! Reads are served from a RAM cache that always holds every catalog key.
//! Writes are validated, cached and persisted; a failed persist rolls the
//! cache back.

pub mod backend;
pub mod flash;
pub mod image;
pub mod schema;
pub mod settings;

pub use backend::{KvBackend, MemoryBackend, Namespace, StoreError, Value, ValueKind};
pub use flash::FlashBackend;
pub use schema::{keys, KeySpec, Rule};

use crate::config::limits::STORE_STR_LEN;
use crate::error::TallyError;
use backend::EntryTable;
use heapless::String;

/// Conversion out of a stored value
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for u8 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::U8(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for u16 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::U16(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for String<STORE_STR_LEN> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Conversion for `ConfigStore::set`; fails when a slot cannot hold it
pub trait IntoValue {
    fn into_value(self) -> Option<Value>;
}

impl IntoValue for u8 {
    fn into_value(self) -> Option<Value> {
        Some(Value::U8(self))
    }
}

impl IntoValue for u16 {
    fn into_value(self) -> Option<Value> {
        Some(Value::U16(self))
    }
}

impl IntoValue for u32 {
    fn into_value(self) -> Option<Value> {
        Some(Value::U32(self))
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Option<Value> {
        Some(Value::F32(self))
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Option<Value> {
        Some(Value::Bool(self))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Option<Value> {
        Value::str(self)
    }
}

impl From<StoreError> for TallyError {
    fn from(_: StoreError) -> Self {
        TallyError::Persistence
    }
}

/// Frequency band of the detected radio chip, in MHz
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub min_mhz: f32,
    pub max_mhz: f32,
    pub default_mhz: f32,
}

impl FrequencyBand {
    pub fn contains(&self, mhz: f32) -> bool {
        mhz >= self.min_mhz && mhz <= self.max_mhz
    }

    pub fn clamp(&self, mhz: f32) -> f32 {
        mhz.clamp(self.min_mhz, self.max_mhz)
    }
}

/// Config store over a persistent backend
pub struct ConfigStore<B: KvBackend> {
    backend: B,
    cache: EntryTable,
    band: Option<FrequencyBand>,
}

impl<B: KvBackend> ConfigStore<B> {
    pub fn new(backend: B) -> Self {
        let mut store = Self {
            backend,
            cache: EntryTable::new(),
            band: None,
        };
        store.install_defaults();
        store
    }

    fn install_defaults(&mut self) {
        self.cache.clear();
        for spec in schema::CATALOG.iter() {
            let _ = self.cache.put(spec.namespace, spec.key, spec.default.to_value());
        }
    }

    /// Load every catalog key from the backend
    ///
    /// Missing, mistyped or out-of-range stored values fall back to their
    /// defaults. An unreadable backend leaves the default image in place and
    /// reports `Persistence`.
    pub fn init(&mut self) -> Result<(), TallyError> {
        self.install_defaults();

        if let Err(e) = self.backend.open() {
            log::warn!(target: "store", "backend unreadable ({:?}), using defaults", e);
            return Err(TallyError::Persistence);
        }

        let mut loaded = 0usize;
        for spec in schema::CATALOG.iter() {
            match self.backend.load(spec.namespace, spec.key) {
                Ok(Some(value)) if value.kind() == spec.default.kind() && spec.rule.accepts(&value) => {
                    let _ = self.cache.put(spec.namespace, spec.key, value);
                    loaded += 1;
                }
                Ok(Some(_)) => {
                    log::warn!(
                        target: "store",
                        "{}/{}: stored value invalid, using default",
                        spec.namespace.as_str(),
                        spec.key
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        target: "store",
                        "{}/{}: load failed ({:?}), using default",
                        spec.namespace.as_str(),
                        spec.key,
                        e
                    );
                }
            }
        }
        log::info!(target: "store", "{} stored values, {} defaults", loaded, schema::CATALOG.len() - loaded);
        Ok(())
    }

    /// Read a cached value
    ///
    /// Fails with `InvalidArgument` only for unknown keys or a type that
    /// does not match the catalog.
    pub fn get<T: FromValue>(&self, namespace: Namespace, key: &str) -> Result<T, TallyError> {
        self.cache
            .get(namespace, key)
            .and_then(T::from_value)
            .ok_or(TallyError::InvalidArgument)
    }

    /// Validate, cache and persist a value
    ///
    /// Strings longer than `STORE_STR_LEN` bytes are rejected, never cut.
    pub fn set<V: IntoValue>(&mut self, namespace: Namespace, key: &str, value: V) -> Result<(), TallyError> {
        let spec = schema::lookup(namespace, key).ok_or(TallyError::InvalidArgument)?;
        let Some(mut value) = value.into_value() else {
            log::warn!(target: "store", "{}/{}: rejected, over {} bytes", namespace.as_str(), key, STORE_STR_LEN);
            return Err(TallyError::InvalidArgument);
        };

        if value.kind() != spec.default.kind() || !spec.rule.accepts(&value) {
            log::warn!(target: "store", "{}/{}: rejected {:?}", namespace.as_str(), key, value);
            return Err(TallyError::InvalidArgument);
        }

        if spec.rule == Rule::LoraFrequency {
            value = self.clamp_frequency(value)?;
        }

        let previous = self.cache.put(namespace, key, value.clone())?;
        if let Err(e) = self.backend.store(namespace, key, &value) {
            log::error!(target: "store", "{}/{}: persist failed ({:?})", namespace.as_str(), key, e);
            self.cache.restore(namespace, key, previous);
            return Err(TallyError::Persistence);
        }
        Ok(())
    }

    fn clamp_frequency(&self, value: Value) -> Result<Value, TallyError> {
        let Value::F32(mhz) = value else {
            return Err(TallyError::InvalidArgument);
        };
        if !mhz.is_finite() || mhz <= 0.0 {
            return Err(TallyError::InvalidArgument);
        }
        match self.band {
            Some(band) if !band.contains(mhz) => {
                let clamped = band.clamp(mhz);
                log::warn!(target: "store", "frequency {} MHz outside chip band, clamped to {}", mhz, clamped);
                Ok(Value::F32(clamped))
            }
            _ => Ok(value),
        }
    }

    /// Erase the backend and return to defaults
    pub fn factory_reset(&mut self) -> Result<(), TallyError> {
        self.install_defaults();
        self.backend.erase_all().map_err(|e| {
            log::error!(target: "store", "factory reset failed ({:?})", e);
            TallyError::Persistence
        })?;
        log::info!(target: "store", "factory reset complete");
        Ok(())
    }

    /// Record the detected chip band
    ///
    /// A stored frequency outside the band is replaced by the chip default
    /// and written back.
    pub fn set_lora_band(&mut self, band: FrequencyBand) -> Result<(), TallyError> {
        self.band = Some(band);
        let current: f32 = self.get(Namespace::Lora, keys::FREQUENCY)?;
        if band.contains(current) {
            return Ok(());
        }
        log::warn!(
            target: "store",
            "stored frequency {} MHz not supported by chip, using {} MHz",
            current,
            band.default_mhz
        );
        self.set(Namespace::Lora, keys::FREQUENCY, band.default_mhz)
    }

    pub fn band(&self) -> Option<FrequencyBand> {
        self.band
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SX1268: FrequencyBand = FrequencyBand {
        min_mhz: 410.0,
        max_mhz: 493.0,
        default_mhz: 433.0,
    };

    fn store() -> ConfigStore<MemoryBackend> {
        let mut store = ConfigStore::new(MemoryBackend::new());
        store.init().unwrap();
        store
    }

    #[test]
    fn test_defaults_present() {
        let store = store();
        assert_eq!(store.get::<u8>(Namespace::System, keys::CAMERA_ID), Ok(1));
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(868.0));
        assert_eq!(store.get::<u8>(Namespace::Lora, keys::SYNC_WORD), Ok(0x12));
        assert_eq!(store.get::<bool>(Namespace::System, keys::DUAL_MODE), Ok(false));
        assert_eq!(store.get::<u8>(Namespace::Switcher, keys::SWITCHER[1].offset), Ok(4));
        let ssid: String<STORE_STR_LEN> = store.get(Namespace::Wifi, keys::AP_SSID).unwrap();
        assert_eq!(ssid.as_str(), "ESP32_CONFIG");
    }

    #[test]
    fn test_get_wrong_type_or_key() {
        let store = store();
        assert_eq!(
            store.get::<u16>(Namespace::System, keys::CAMERA_ID),
            Err(TallyError::InvalidArgument)
        );
        assert_eq!(store.get::<u8>(Namespace::System, "nope"), Err(TallyError::InvalidArgument));
    }

    #[test]
    fn test_set_persists() {
        let mut store = store();
        store.set(Namespace::System, keys::CAMERA_ID, 5u8).unwrap();
        assert_eq!(store.get::<u8>(Namespace::System, keys::CAMERA_ID), Ok(5));
        assert_eq!(store.backend().write_count(), 1);

        // A fresh store over the same backend sees the value
        let mut reloaded = ConfigStore::new(core::mem::take(store.backend_mut()));
        reloaded.init().unwrap();
        assert_eq!(reloaded.get::<u8>(Namespace::System, keys::CAMERA_ID), Ok(5));
    }

    #[test]
    fn test_validation() {
        let mut store = store();
        assert_eq!(
            store.set(Namespace::Wifi, keys::AP_PASSWORD, "short"),
            Err(TallyError::InvalidArgument)
        );
        assert_eq!(
            store.set(Namespace::Switcher, keys::SWITCHER[0].offset, 20u8),
            Err(TallyError::InvalidArgument)
        );
        assert_eq!(
            store.set(Namespace::Switcher, keys::SWITCHER[0].limit, 21u8),
            Err(TallyError::InvalidArgument)
        );
        assert_eq!(
            store.set(Namespace::System, keys::CAMERA_ID, 5u16),
            Err(TallyError::InvalidArgument)
        );
        assert!(store.set(Namespace::Switcher, keys::SWITCHER[0].offset, 19u8).is_ok());
        assert!(store.set(Namespace::Switcher, keys::SWITCHER[0].limit, 20u8).is_ok());
        assert!(store.set(Namespace::Wifi, keys::AP_PASSWORD, "12345678").is_ok());
        assert_eq!(store.backend().write_count(), 3);
    }

    #[test]
    fn test_oversized_string_rejected() {
        let mut store = store();
        let too_long = "s".repeat(STORE_STR_LEN + 6);
        assert_eq!(
            store.set(Namespace::Wifi, keys::STA_SSID, too_long.as_str()),
            Err(TallyError::InvalidArgument)
        );
        let ssid: String<STORE_STR_LEN> = store.get(Namespace::Wifi, keys::STA_SSID).unwrap();
        assert_eq!(ssid.as_str(), crate::config::store_defaults::WIFI_STA_SSID);
        assert_eq!(store.backend().write_count(), 0);

        let exact = "s".repeat(STORE_STR_LEN);
        store.set(Namespace::Wifi, keys::STA_SSID, exact.as_str()).unwrap();
        let ssid: String<STORE_STR_LEN> = store.get(Namespace::Wifi, keys::STA_SSID).unwrap();
        assert_eq!(ssid.as_str(), exact);
    }

    #[test]
    fn test_persist_failure_rolls_back() {
        let mut store = store();
        store.backend_mut().set_fail_writes(true);
        assert_eq!(
            store.set(Namespace::Lora, keys::SYNC_WORD, 0x34u8),
            Err(TallyError::Persistence)
        );
        assert_eq!(store.get::<u8>(Namespace::Lora, keys::SYNC_WORD), Ok(0x12));
    }

    #[test]
    fn test_unreadable_backend_uses_defaults() {
        let mut backend = MemoryBackend::new();
        backend.set_fail_open(true);
        let mut store = ConfigStore::new(backend);
        assert_eq!(store.init(), Err(TallyError::Persistence));
        assert_eq!(store.get::<u8>(Namespace::System, keys::MAX_CAMERA_NUM), Ok(20));
    }

    #[test]
    fn test_invalid_stored_value_ignored() {
        let mut backend = MemoryBackend::new();
        backend
            .store(Namespace::System, keys::CAMERA_ID, &Value::U8(99))
            .unwrap();
        backend
            .store(Namespace::System, keys::UDP_PORT, &Value::U8(1))
            .unwrap();
        let mut store = ConfigStore::new(backend);
        store.init().unwrap();
        assert_eq!(store.get::<u8>(Namespace::System, keys::CAMERA_ID), Ok(1));
        assert_eq!(store.get::<u16>(Namespace::System, keys::UDP_PORT), Ok(8888));
    }

    #[test]
    fn test_factory_reset() {
        let mut store = store();
        store.set(Namespace::System, keys::DUAL_MODE, true).unwrap();
        store.factory_reset().unwrap();
        assert_eq!(store.get::<bool>(Namespace::System, keys::DUAL_MODE), Ok(false));
        assert!(store.backend().table().is_empty());
    }

    #[test]
    fn test_band_replaces_foreign_frequency() {
        let mut store = store();
        store.set_lora_band(SX1268).unwrap();
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(433.0));
        assert_eq!(store.backend().write_count(), 1);
    }

    #[test]
    fn test_band_clamps_out_of_range_set() {
        let mut store = store();
        store.set_lora_band(SX1268).unwrap();
        store.set(Namespace::Lora, keys::FREQUENCY, 500.0f32).unwrap();
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(493.0));
        store.set(Namespace::Lora, keys::FREQUENCY, 434.5f32).unwrap();
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(434.5));
        assert_eq!(
            store.set(Namespace::Lora, keys::FREQUENCY, -1.0f32),
            Err(TallyError::InvalidArgument)
        );
    }

    #[test]
    fn test_band_keeps_supported_frequency() {
        let mut store = store();
        store
            .set_lora_band(FrequencyBand {
                min_mhz: 850.0,
                max_mhz: 930.0,
                default_mhz: 868.0,
            })
            .unwrap();
        assert_eq!(store.backend().write_count(), 0);
    }
}
