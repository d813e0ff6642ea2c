//! Key catalog: every persisted key with its type, default and validation rule

use crate::config::store_defaults as d;
use crate::store::backend::{Namespace, Value, ValueKind};

/// Compiled-in default of a key
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    U8(u8),
    U16(u16),
    F32(f32),
    Bool(bool),
    Str(&'static str),
}

impl DefaultValue {
    pub fn kind(self) -> ValueKind {
        match self {
            DefaultValue::U8(_) => ValueKind::U8,
            DefaultValue::U16(_) => ValueKind::U16,
            DefaultValue::F32(_) => ValueKind::F32,
            DefaultValue::Bool(_) => ValueKind::Bool,
            DefaultValue::Str(_) => ValueKind::Str,
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            DefaultValue::U8(v) => Value::U8(v),
            DefaultValue::U16(v) => Value::U16(v),
            DefaultValue::F32(v) => Value::F32(v),
            DefaultValue::Bool(v) => Value::Bool(v),
            DefaultValue::Str(s) => Value::str(s).unwrap_or(Value::Str(Default::default())),
        }
    }
}

/// Validation applied on `set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Any,
    /// Inclusive numeric range
    Range { min: u32, max: u32 },
    /// Minimum string length in characters
    MinLen(usize),
    /// Four dot-separated decimal groups
    DottedQuad,
    /// Clamped into the detected chip band
    LoraFrequency,
}

impl Rule {
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Rule::Any, _) | (Rule::LoraFrequency, _) => true,
            (Rule::Range { min, max }, v) => match numeric(v) {
                Some(n) => n >= min && n <= max,
                None => false,
            },
            (Rule::MinLen(min), Value::Str(s)) => s.chars().count() >= min,
            (Rule::DottedQuad, Value::Str(s)) => is_dotted_quad(s),
            _ => false,
        }
    }
}

fn numeric(value: &Value) -> Option<u32> {
    match value {
        Value::U8(v) => Some(*v as u32),
        Value::U16(v) => Some(*v as u32),
        Value::U32(v) => Some(*v),
        _ => None,
    }
}

/// Shape check only; group values are not range-checked
fn is_dotted_quad(text: &str) -> bool {
    let mut groups = 0;
    for group in text.split('.') {
        if group.is_empty() || group.len() > 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        groups += 1;
    }
    groups == 4
}

/// One catalog entry
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub namespace: Namespace,
    pub key: &'static str,
    pub default: DefaultValue,
    pub rule: Rule,
}

const fn spec(namespace: Namespace, key: &'static str, default: DefaultValue, rule: Rule) -> KeySpec {
    KeySpec {
        namespace,
        key,
        default,
        rule,
    }
}

/// Key names
pub mod keys {
    pub const STA_SSID: &str = "sta_ssid";
    pub const STA_PASSWORD: &str = "sta_password";
    pub const AP_SSID: &str = "ap_ssid";
    pub const AP_PASSWORD: &str = "ap_password";

    pub const DHCP_ENABLED: &str = "dhcp_enabled";
    pub const STATIC_IP: &str = "static_ip";
    pub const STATIC_NETMASK: &str = "static_netmask";
    pub const STATIC_GATEWAY: &str = "static_gateway";

    pub const DEVICE_NAME: &str = "device_name";
    pub const UDP_PORT: &str = "udp_port";
    pub const WEB_PORT: &str = "web_port";
    pub const DUAL_MODE: &str = "dual_mode";
    pub const LED_BRIGHTNESS: &str = "led_brightness";
    pub const CAMERA_ID: &str = "camera_id";
    pub const MAX_CAMERA_NUM: &str = "max_camera_num";

    pub const FREQUENCY: &str = "frequency";
    pub const SYNC_WORD: &str = "sync_word";

    /// Per-slot switcher key names
    #[derive(Debug, Clone, Copy)]
    pub struct SwitcherKeys {
        pub kind: &'static str,
        pub interface: &'static str,
        pub ip: &'static str,
        pub port: &'static str,
        pub password: &'static str,
        pub offset: &'static str,
        pub limit: &'static str,
    }

    pub const SWITCHER: [SwitcherKeys; 2] = [
        SwitcherKeys {
            kind: "sw0_type",
            interface: "sw0_if",
            ip: "sw0_ip",
            port: "sw0_port",
            password: "sw0_password",
            offset: "sw0_offset",
            limit: "sw0_limit",
        },
        SwitcherKeys {
            kind: "sw1_type",
            interface: "sw1_if",
            ip: "sw1_ip",
            port: "sw1_port",
            password: "sw1_password",
            offset: "sw1_offset",
            limit: "sw1_limit",
        },
    ];
}

use keys::SWITCHER;
use DefaultValue as V;
use Namespace as N;

const SWITCHER_KIND: Rule = Rule::Range { min: 0, max: 2 };
const SWITCHER_IF: Rule = Rule::Range { min: 1, max: 2 };
const OFFSET: Rule = Rule::Range { min: 0, max: 19 };
const LIMIT: Rule = Rule::Range { min: 0, max: 20 };
const CHANNEL: Rule = Rule::Range { min: 1, max: 20 };
const PORT: Rule = Rule::Range { min: 1, max: 65535 };

/// Every key the store knows about
pub static CATALOG: [KeySpec; 31] = [
    spec(N::Wifi, keys::STA_SSID, V::Str(d::WIFI_STA_SSID), Rule::Any),
    spec(N::Wifi, keys::STA_PASSWORD, V::Str(d::WIFI_STA_PASSWORD), Rule::Any),
    spec(N::Wifi, keys::AP_SSID, V::Str(d::WIFI_AP_SSID), Rule::Any),
    spec(N::Wifi, keys::AP_PASSWORD, V::Str(d::WIFI_AP_PASSWORD), Rule::MinLen(d::AP_PASSWORD_MIN)),
    spec(N::Eth, keys::DHCP_ENABLED, V::Bool(d::ETH_DHCP), Rule::Any),
    spec(N::Eth, keys::STATIC_IP, V::Str(d::ETH_STATIC_IP), Rule::DottedQuad),
    spec(N::Eth, keys::STATIC_NETMASK, V::Str(d::ETH_NETMASK), Rule::DottedQuad),
    spec(N::Eth, keys::STATIC_GATEWAY, V::Str(d::ETH_GATEWAY), Rule::DottedQuad),
    spec(N::System, keys::DEVICE_NAME, V::Str(d::DEVICE_NAME), Rule::MinLen(1)),
    spec(N::System, keys::UDP_PORT, V::U16(d::UDP_PORT), PORT),
    spec(N::System, keys::WEB_PORT, V::U16(d::WEB_PORT), PORT),
    spec(N::System, keys::DUAL_MODE, V::Bool(d::DUAL_MODE), Rule::Any),
    spec(N::System, keys::LED_BRIGHTNESS, V::U8(d::LED_BRIGHTNESS), Rule::Range { min: 1, max: 255 }),
    spec(N::System, keys::CAMERA_ID, V::U8(d::CAMERA_ID), CHANNEL),
    spec(N::System, keys::MAX_CAMERA_NUM, V::U8(d::MAX_CAMERA_NUM), CHANNEL),
    spec(N::Switcher, SWITCHER[0].kind, V::U8(0), SWITCHER_KIND),
    spec(N::Switcher, SWITCHER[0].interface, V::U8(1), SWITCHER_IF),
    spec(N::Switcher, SWITCHER[0].ip, V::Str(d::SW0_IP), Rule::DottedQuad),
    spec(N::Switcher, SWITCHER[0].port, V::U16(0), Rule::Any),
    spec(N::Switcher, SWITCHER[0].password, V::Str(""), Rule::Any),
    spec(N::Switcher, SWITCHER[0].offset, V::U8(d::SW0_OFFSET), OFFSET),
    spec(N::Switcher, SWITCHER[0].limit, V::U8(0), LIMIT),
    spec(N::Switcher, SWITCHER[1].kind, V::U8(0), SWITCHER_KIND),
    spec(N::Switcher, SWITCHER[1].interface, V::U8(2), SWITCHER_IF),
    spec(N::Switcher, SWITCHER[1].ip, V::Str(d::SW1_IP), Rule::DottedQuad),
    spec(N::Switcher, SWITCHER[1].port, V::U16(0), Rule::Any),
    spec(N::Switcher, SWITCHER[1].password, V::Str(""), Rule::Any),
    spec(N::Switcher, SWITCHER[1].offset, V::U8(d::SW1_OFFSET), OFFSET),
    spec(N::Switcher, SWITCHER[1].limit, V::U8(0), LIMIT),
    spec(N::Lora, keys::FREQUENCY, V::F32(d::LORA_FREQUENCY_MHZ), Rule::LoraFrequency),
    spec(N::Lora, keys::SYNC_WORD, V::U8(d::LORA_SYNC_WORD), Rule::Any),
];

pub fn lookup(namespace: Namespace, key: &str) -> Option<&'static KeySpec> {
    CATALOG
        .iter()
        .find(|spec| spec.namespace == namespace && spec.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_defaults_pass_their_rules() {
        for spec in CATALOG.iter() {
            assert!(
                spec.rule.accepts(&spec.default.to_value()),
                "default of {}/{} rejected",
                spec.namespace.as_str(),
                spec.key
            );
        }
    }

    #[test]
    fn test_string_defaults_fit_a_slot() {
        for spec in CATALOG.iter() {
            if let DefaultValue::Str(text) = spec.default {
                assert!(Value::str(text).is_some(), "default of {} too long", spec.key);
            }
        }
    }

    #[test]
    fn test_catalog_keys_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in CATALOG.iter().skip(i + 1) {
                assert!(!(a.namespace == b.namespace && a.key == b.key), "duplicate {}", a.key);
            }
        }
    }

    #[test]
    fn test_range_rule() {
        assert!(OFFSET.accepts(&Value::U8(19)));
        assert!(!OFFSET.accepts(&Value::U8(20)));
        assert!(LIMIT.accepts(&Value::U8(20)));
        assert!(!LIMIT.accepts(&Value::U8(21)));
        assert!(!OFFSET.accepts(&Value::Bool(true)));
    }

    #[test]
    fn test_ap_password_length() {
        let rule = lookup(Namespace::Wifi, keys::AP_PASSWORD).unwrap().rule;
        assert!(!rule.accepts(&Value::str("short").unwrap()));
        assert!(rule.accepts(&Value::str("longenough").unwrap()));
    }

    #[test]
    fn test_dotted_quad_shape() {
        assert!(is_dotted_quad("192.168.0.240"));
        // Shape only
        assert!(is_dotted_quad("999.1.1.1"));
        assert!(!is_dotted_quad("192.168.0"));
        assert!(!is_dotted_quad("192.168..1"));
        assert!(!is_dotted_quad("a.b.c.d"));
    }
}
