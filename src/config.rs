//! Hardware and protocol constants for the ESP32-S3 tally node (EoRa-S3 board)

/// Tally indicator pins (active high)
pub mod pins {
    pub const LED_BOARD: u8 = 37;
    pub const LED_PROGRAM: u8 = 38;
    pub const LED_PREVIEW: u8 = 39;

    /// SPI pins for the LoRa module
    pub const SCLK: u8 = 5;
    pub const MISO: u8 = 3;
    pub const MOSI: u8 = 6;

    /// LoRa control pins
    pub const NSS: u8 = 7;
    pub const DIO1: u8 = 33;
    pub const NRST: u8 = 8;
    pub const BUSY: u8 = 34;
}

/// TCXO configuration
pub mod tcxo {
    /// TCXO voltage code for the SX126x register
    /// 0x02 = 1.8V
    pub const VOLTAGE_CODE: u8 = 0x02;
}

/// Default LoRa modulation
pub mod lora_defaults {
    pub const SPREADING_FACTOR: u8 = 7;
    pub const BANDWIDTH_KHZ: u32 = 125;
    /// Coding rate 4/7
    pub const CODING_RATE: u8 = 7;
    pub const TX_POWER_DBM: i8 = 22;
    pub const PREAMBLE_LENGTH: u16 = 8;
    pub const SYNC_WORD: u8 = 0x12;

    /// Frequencies used for chip detection, in MHz
    pub const SX1262_DETECT_MHZ: f32 = 868.0;
    pub const SX1268_DETECT_MHZ: f32 = 433.0;
}

/// Timing constants, all in milliseconds
pub mod timing {
    /// Radio task wake-up when no interrupt arrives
    pub const RADIO_TICK_MS: u64 = 100;
    /// Main loop period on the TX node
    pub const MAIN_LOOP_MS: u64 = 10;

    /// Live-apply: spacing between config-change frames and the final re-tune wait
    pub const CONFIG_CHANGE_INTERVAL_MS: u32 = 1000;
    pub const CONFIG_CHANGE_REPEATS: u8 = 3;

    /// Channel scan timing
    pub const SCAN_SETTLE_MS: u32 = 20;
    pub const SCAN_SAMPLE_INTERVAL_MS: u32 = 10;
    pub const SCAN_SAMPLES: u8 = 3;

    /// TX heartbeat and RX receive watchdog
    pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
    pub const RX_WATCHDOG_MS: u64 = 45_000;

    /// Supervisor
    pub const RECONNECT_INTERVAL_MS: u64 = 5_000;
    pub const CONNECT_TIMEOUT_MS: u64 = 30_000;
    pub const TCP_CONNECT_TIMEOUT_MS: u32 = 5_000;
    pub const STALE_TALLY_MS: u64 = 60 * 60 * 1000;
    pub const NETWORK_RESTART_COOLDOWN_MS: u64 = 30_000;

    /// ATEM session
    pub const ATEM_KEEPALIVE_MS: u64 = 500;
    pub const ATEM_SILENCE_TIMEOUT_MS: u64 = 5_000;

    /// vMix session
    pub const VMIX_KEEPALIVE_MS: u64 = 10_000;
    pub const VMIX_SILENCE_TIMEOUT_MS: u64 = 30_000;

    /// Protocol errors tolerated inside one window before the link is dropped
    pub const PROTOCOL_ERROR_WINDOW_MS: u64 = 1_000;
    pub const PROTOCOL_ERROR_LIMIT: u8 = 3;

    /// Console wait for the radio task; covers a full live-apply
    pub const CONSOLE_REPLY_TIMEOUT_MS: u64 = 10_000;
}

/// Size limits
pub mod limits {
    /// Highest channel count carried on air
    pub const MAX_CHANNELS: u8 = 20;

    /// Maximum payload size for LoRa
    pub const MAX_LORA_PAYLOAD: usize = 255;

    /// Outbound radio queue depth
    pub const TX_QUEUE_DEPTH: usize = 5;

    /// Largest frame the LoRa codec produces
    pub const MAX_FRAME_SIZE: usize = 16;

    /// Switcher datagram and line buffers
    pub const ATEM_MAX_PACKET: usize = 1500;
    pub const ATEM_MAX_OUT_PACKET: usize = 64;
    pub const VMIX_LINE_MAX: usize = 1100;
    pub const VMIX_MAX_OUT_LINE: usize = 96;

    /// Product name and string slot capacities
    pub const PRODUCT_NAME_LEN: usize = 44;
    pub const STORE_STR_LEN: usize = 64;
    pub const STORE_KEY_LEN: usize = 16;
    pub const STORE_MAX_ENTRIES: usize = 48;

    /// Number of switcher slots
    pub const SWITCHER_SLOTS: usize = 2;

    /// Console input line and rendered reply
    pub const CONSOLE_LINE_MAX: usize = 64;
    pub const CONSOLE_OUT_MAX: usize = 2048;
}

/// Compiled-in defaults for the persistent store
pub mod store_defaults {
    pub const DEVICE_NAME: &str = "EoRa-S3";

    pub const WIFI_STA_SSID: &str = "HOME WIFI";
    pub const WIFI_STA_PASSWORD: &str = "33333333";
    pub const WIFI_AP_SSID: &str = "ESP32_CONFIG";
    pub const WIFI_AP_PASSWORD: &str = "12345678";

    pub const ETH_DHCP: bool = true;
    pub const ETH_STATIC_IP: &str = "192.168.0.251";
    pub const ETH_NETMASK: &str = "255.255.255.0";
    pub const ETH_GATEWAY: &str = "192.168.0.1";

    pub const UDP_PORT: u16 = 8888;
    pub const WEB_PORT: u16 = 80;
    pub const DUAL_MODE: bool = false;

    pub const LED_BRIGHTNESS: u8 = 255;
    pub const CAMERA_ID: u8 = 1;
    pub const MAX_CAMERA_NUM: u8 = 20;

    pub const SW0_IP: &str = "192.168.0.240";
    pub const SW0_OFFSET: u8 = 0;
    pub const SW1_IP: &str = "192.168.0.241";
    pub const SW1_OFFSET: u8 = 4;

    pub const LORA_FREQUENCY_MHZ: f32 = 868.0;
    pub const LORA_SYNC_WORD: u8 = 0x12;

    /// Minimum Wi-Fi AP password length
    pub const AP_PASSWORD_MIN: usize = 8;

    /// Flash region holding the config image
    pub const FLASH_OFFSET: u32 = 0x9000;
    pub const FLASH_SIZE: usize = 0x1000;
}

/// Firmware version
pub mod version {
    pub const VERSION_MAJOR: u8 = 0;
    pub const VERSION_MINOR: u8 = 1;
    pub const VERSION_PATCH: u8 = 0;
}
