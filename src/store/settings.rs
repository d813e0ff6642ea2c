//! Typed views over the config store

use super::keys::{self, SWITCHER};
use super::{ConfigStore, KvBackend, Namespace};
use crate::config::limits::{MAX_CHANNELS, STORE_STR_LEN};
use crate::config::store_defaults as d;
use crate::error::TallyError;
use core::net::{Ipv4Addr, SocketAddrV4};
use heapless::String;

type Text = String<STORE_STR_LEN>;

fn text<B: KvBackend>(store: &ConfigStore<B>, namespace: Namespace, key: &str, default: &str) -> Text {
    store.get(namespace, key).unwrap_or_else(|_| {
        let mut s = Text::new();
        let _ = s.push_str(default);
        s
    })
}

/// Switcher family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherKind {
    Atem,
    Vmix,
    Obs,
}

impl SwitcherKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SwitcherKind::Atem),
            1 => Some(SwitcherKind::Vmix),
            2 => Some(SwitcherKind::Obs),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SwitcherKind::Atem => 0,
            SwitcherKind::Vmix => 1,
            SwitcherKind::Obs => 2,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            SwitcherKind::Atem => 9910,
            SwitcherKind::Vmix => 8099,
            SwitcherKind::Obs => 4455,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SwitcherKind::Atem => "ATEM",
            SwitcherKind::Vmix => "vMix",
            SwitcherKind::Obs => "OBS",
        }
    }
}

/// Network a switcher is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetInterface {
    WifiSta,
    Ethernet,
}

impl NetInterface {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(NetInterface::WifiSta),
            2 => Some(NetInterface::Ethernet),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            NetInterface::WifiSta => 1,
            NetInterface::Ethernet => 2,
        }
    }
}

/// One switcher slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitcherSettings {
    pub kind: SwitcherKind,
    pub interface: NetInterface,
    pub ip: Text,
    /// 0 selects the protocol default
    pub port: u16,
    pub password: Text,
    pub camera_offset: u8,
    /// 0 means no limit
    pub camera_limit: u8,
}

impl SwitcherSettings {
    pub fn load<B: KvBackend>(store: &ConfigStore<B>, slot: usize) -> Result<Self, TallyError> {
        let names = SWITCHER.get(slot).ok_or(TallyError::InvalidArgument)?;
        let ns = Namespace::Switcher;
        let default_ip = if slot == 0 { d::SW0_IP } else { d::SW1_IP };
        Ok(Self {
            kind: SwitcherKind::from_u8(store.get(ns, names.kind)?).unwrap_or(SwitcherKind::Atem),
            interface: NetInterface::from_u8(store.get(ns, names.interface)?)
                .unwrap_or(NetInterface::WifiSta),
            ip: text(store, ns, names.ip, default_ip),
            port: store.get(ns, names.port)?,
            password: text(store, ns, names.password, ""),
            camera_offset: store.get(ns, names.offset)?,
            camera_limit: store.get(ns, names.limit)?,
        })
    }

    pub fn save<B: KvBackend>(&self, store: &mut ConfigStore<B>, slot: usize) -> Result<(), TallyError> {
        let names = SWITCHER.get(slot).ok_or(TallyError::InvalidArgument)?;
        let ns = Namespace::Switcher;
        store.set(ns, names.kind, self.kind.as_u8())?;
        store.set(ns, names.interface, self.interface.as_u8())?;
        store.set(ns, names.ip, self.ip.as_str())?;
        store.set(ns, names.port, self.port)?;
        store.set(ns, names.password, self.password.as_str())?;
        store.set(ns, names.offset, self.camera_offset)?;
        store.set(ns, names.limit, self.camera_limit)
    }

    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.kind.default_port()
        } else {
            self.port
        }
    }

    /// Parsed switcher endpoint, `None` if the IP string is not an address
    pub fn endpoint(&self) -> Option<SocketAddrV4> {
        let ip: Ipv4Addr = self.ip.parse().ok()?;
        Some(SocketAddrV4::new(ip, self.effective_port()))
    }

    /// Channel limit applied to tally data, `MAX_CHANNELS` when unlimited
    pub fn effective_limit(&self) -> u8 {
        if self.camera_limit == 0 {
            MAX_CHANNELS
        } else {
            self.camera_limit.min(MAX_CHANNELS)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraSettings {
    pub frequency_mhz: f32,
    pub sync_word: u8,
}

impl LoraSettings {
    pub fn load<B: KvBackend>(store: &ConfigStore<B>) -> Result<Self, TallyError> {
        Ok(Self {
            frequency_mhz: store.get(Namespace::Lora, keys::FREQUENCY)?,
            sync_word: store.get(Namespace::Lora, keys::SYNC_WORD)?,
        })
    }

    pub fn save<B: KvBackend>(&self, store: &mut ConfigStore<B>) -> Result<(), TallyError> {
        store.set(Namespace::Lora, keys::FREQUENCY, self.frequency_mhz)?;
        store.set(Namespace::Lora, keys::SYNC_WORD, self.sync_word)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSettings {
    pub device_name: Text,
    pub udp_port: u16,
    pub web_port: u16,
    pub dual_mode: bool,
    pub led_brightness: u8,
    pub camera_id: u8,
    pub max_camera_num: u8,
}

impl SystemSettings {
    pub fn load<B: KvBackend>(store: &ConfigStore<B>) -> Result<Self, TallyError> {
        let ns = Namespace::System;
        Ok(Self {
            device_name: text(store, ns, keys::DEVICE_NAME, d::DEVICE_NAME),
            udp_port: store.get(ns, keys::UDP_PORT)?,
            web_port: store.get(ns, keys::WEB_PORT)?,
            dual_mode: store.get(ns, keys::DUAL_MODE)?,
            led_brightness: store.get(ns, keys::LED_BRIGHTNESS)?,
            camera_id: store.get(ns, keys::CAMERA_ID)?,
            max_camera_num: store.get(ns, keys::MAX_CAMERA_NUM)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSettings {
    pub sta_ssid: Text,
    pub sta_password: Text,
    pub ap_ssid: Text,
    pub ap_password: Text,
}

impl WifiSettings {
    pub fn load<B: KvBackend>(store: &ConfigStore<B>) -> Self {
        let ns = Namespace::Wifi;
        Self {
            sta_ssid: text(store, ns, keys::STA_SSID, d::WIFI_STA_SSID),
            sta_password: text(store, ns, keys::STA_PASSWORD, d::WIFI_STA_PASSWORD),
            ap_ssid: text(store, ns, keys::AP_SSID, d::WIFI_AP_SSID),
            ap_password: text(store, ns, keys::AP_PASSWORD, d::WIFI_AP_PASSWORD),
        }
    }

    pub fn save<B: KvBackend>(&self, store: &mut ConfigStore<B>) -> Result<(), TallyError> {
        let ns = Namespace::Wifi;
        store.set(ns, keys::STA_SSID, self.sta_ssid.as_str())?;
        store.set(ns, keys::STA_PASSWORD, self.sta_password.as_str())?;
        store.set(ns, keys::AP_SSID, self.ap_ssid.as_str())?;
        store.set(ns, keys::AP_PASSWORD, self.ap_password.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetSettings {
    pub dhcp_enabled: bool,
    pub static_ip: Text,
    pub static_netmask: Text,
    pub static_gateway: Text,
}

impl EthernetSettings {
    pub fn load<B: KvBackend>(store: &ConfigStore<B>) -> Self {
        let ns = Namespace::Eth;
        Self {
            dhcp_enabled: store.get(ns, keys::DHCP_ENABLED).unwrap_or(d::ETH_DHCP),
            static_ip: text(store, ns, keys::STATIC_IP, d::ETH_STATIC_IP),
            static_netmask: text(store, ns, keys::STATIC_NETMASK, d::ETH_NETMASK),
            static_gateway: text(store, ns, keys::STATIC_GATEWAY, d::ETH_GATEWAY),
        }
    }
}

/// Log the boot configuration summary
pub fn log_summary<B: KvBackend>(store: &ConfigStore<B>) {
    if let Ok(system) = SystemSettings::load(store) {
        log::info!(
            target: "store",
            "device '{}' camera {} of {} dual_mode={}",
            system.device_name,
            system.camera_id,
            system.max_camera_num,
            system.dual_mode
        );
    }
    if let Ok(lora) = LoraSettings::load(store) {
        log::info!(
            target: "store",
            "lora {} MHz sync 0x{:02X}",
            lora.frequency_mhz,
            lora.sync_word
        );
    }
    for slot in 0..SWITCHER.len() {
        if let Ok(sw) = SwitcherSettings::load(store, slot) {
            log::info!(
                target: "store",
                "switcher {}: {} {}:{} offset {} limit {}",
                slot,
                sw.kind.name(),
                sw.ip,
                sw.effective_port(),
                sw.camera_offset,
                sw.camera_limit
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    fn store() -> ConfigStore<MemoryBackend> {
        let mut store = ConfigStore::new(MemoryBackend::new());
        store.init().unwrap();
        store
    }

    #[test]
    fn test_switcher_defaults() {
        let store = store();
        let primary = SwitcherSettings::load(&store, 0).unwrap();
        assert_eq!(primary.kind, SwitcherKind::Atem);
        assert_eq!(primary.interface, NetInterface::WifiSta);
        assert_eq!(primary.camera_offset, 0);
        assert_eq!(
            primary.endpoint(),
            Some(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 240), 9910))
        );

        let secondary = SwitcherSettings::load(&store, 1).unwrap();
        assert_eq!(secondary.interface, NetInterface::Ethernet);
        assert_eq!(secondary.camera_offset, 4);
        assert_eq!(secondary.effective_limit(), 20);

        assert_eq!(SwitcherSettings::load(&store, 2), Err(TallyError::InvalidArgument));
    }

    #[test]
    fn test_switcher_save_load() {
        let mut store = store();
        let mut sw = SwitcherSettings::load(&store, 1).unwrap();
        sw.kind = SwitcherKind::Vmix;
        sw.camera_limit = 4;
        sw.save(&mut store, 1).unwrap();

        let loaded = SwitcherSettings::load(&store, 1).unwrap();
        assert_eq!(loaded.kind, SwitcherKind::Vmix);
        assert_eq!(loaded.effective_port(), 8099);
        assert_eq!(loaded.effective_limit(), 4);
    }

    #[test]
    fn test_endpoint_rejects_out_of_range_ip() {
        let mut store = store();
        store
            .set(Namespace::Switcher, SWITCHER[0].ip, "300.1.1.1")
            .unwrap();
        let sw = SwitcherSettings::load(&store, 0).unwrap();
        assert_eq!(sw.endpoint(), None);
    }

    #[test]
    fn test_explicit_port() {
        let mut store = store();
        store.set(Namespace::Switcher, SWITCHER[0].port, 9999u16).unwrap();
        let sw = SwitcherSettings::load(&store, 0).unwrap();
        assert_eq!(sw.effective_port(), 9999);
    }

    #[test]
    fn test_lora_and_system_views() {
        let mut store = store();
        let mut lora = LoraSettings::load(&store).unwrap();
        assert_eq!(lora.frequency_mhz, 868.0);
        lora.sync_word = 0x34;
        lora.save(&mut store).unwrap();
        assert_eq!(LoraSettings::load(&store).unwrap().sync_word, 0x34);

        let system = SystemSettings::load(&store).unwrap();
        assert_eq!(system.device_name.as_str(), "EoRa-S3");
        assert_eq!(system.led_brightness, 255);
        assert_eq!(system.udp_port, 8888);
    }

    #[test]
    fn test_wifi_and_ethernet_views() {
        let mut store = store();
        let mut wifi = WifiSettings::load(&store);
        assert_eq!(wifi.sta_ssid.as_str(), "HOME WIFI");
        wifi.ap_password = Text::try_from("abc").unwrap();
        assert_eq!(wifi.save(&mut store), Err(TallyError::InvalidArgument));

        let eth = EthernetSettings::load(&store);
        assert!(eth.dhcp_enabled);
        assert_eq!(eth.static_gateway.as_str(), "192.168.0.1");
    }
}
