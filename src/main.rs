#![no_std]
#![no_main]

extern crate alloc;

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use embassy_executor::Spawner;
use esp_backtrace as _;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode as SpiMode;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::usb_serial_jtag::{UsbSerialJtag, UsbSerialJtagRx, UsbSerialJtagTx};
use esp_hal::Async;
use esp_storage::FlashStorage;
use static_cell::StaticCell;

use tally_link_firmware::codec::DeviceId;
use tally_link_firmware::config::{store_defaults, version};
use tally_link_firmware::lora::{LoraConfig, LoraLink, Sx126xDriver, Sx126xPins};
use tally_link_firmware::store::settings::{self, LoraSettings};
use tally_link_firmware::store::{ConfigStore, FlashBackend};
use tally_link_firmware::tasks::{self, SharedStore};

type Radio = Sx126xDriver<Spi<'static, Async>, Output<'static>, Input<'static>, Output<'static>, Input<'static>>;
type Backend = FlashBackend<FlashStorage<'static>>;

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

/// Config store shared by the radio and switcher tasks
static STORE: StaticCell<SharedStore<Backend>> = StaticCell::new();

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();

    // Wi-Fi buffers and the SSID strings live on the heap
    esp_alloc::heap_allocator!(size: 72 * 1024);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    log::info!(
        "tally-link {}.{}.{} ({})",
        version::VERSION_MAJOR,
        version::VERSION_MINOR,
        version::VERSION_PATCH,
        if cfg!(feature = "role-rx") { "receiver" } else { "transmitter" }
    );

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut store = ConfigStore::new(FlashBackend::new(
        FlashStorage::new(peripherals.FLASH),
        store_defaults::FLASH_OFFSET,
    ));
    if let Err(e) = store.init() {
        log::error!(target: "store", "config image unusable, running on defaults: {}", e);
    }
    settings::log_summary(&store);

    // LoRa SPI, pin numbers as in config::pins
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(1))
            .with_mode(SpiMode::_0),
    )
    .expect("SPI config rejected")
    .with_sck(peripherals.GPIO5)
    .with_miso(peripherals.GPIO3)
    .with_mosi(peripherals.GPIO6)
    .into_async();

    let lora_pins = Sx126xPins {
        nss: Output::new(peripherals.GPIO7, Level::High, OutputConfig::default()),
        dio1: Input::new(peripherals.GPIO33, InputConfig::default().with_pull(Pull::Down)),
        nrst: Output::new(peripherals.GPIO8, Level::High, OutputConfig::default()),
        busy: Input::new(peripherals.GPIO34, InputConfig::default().with_pull(Pull::Down)),
    };
    let link = LoraLink::new(Sx126xDriver::new(spi, lora_pins));

    let mac = esp_hal::efuse::Efuse::read_base_mac_address();
    let device_id = DeviceId::from_mac(&mac);

    // Console lines in, replies out; esp-println shares the port for logs
    let (console_rx, console_tx) = UsbSerialJtag::new(peripherals.USB_DEVICE).into_async().split();

    let board_led = Output::new(peripherals.GPIO37, Level::Low, OutputConfig::default());

    #[cfg(feature = "role-rx")]
    let role = rx::Parts {
        indicator: tasks::IndicatorPins {
            board: board_led,
            program: Output::new(peripherals.GPIO38, Level::Low, OutputConfig::default()),
            preview: Output::new(peripherals.GPIO39, Level::Low, OutputConfig::default()),
        },
        device_id,
    };

    #[cfg(not(feature = "role-rx"))]
    let role = {
        let _ = (board_led, device_id);
        let radio = tx::RADIO_CONTROLLER.init(esp_radio::init().expect("Failed to initialize esp-radio"));
        let (controller, interfaces) =
            esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()).expect("Failed to initialize Wi-Fi");
        let seed = {
            let rng = esp_hal::rng::Rng::new();
            (u64::from(rng.random()) << 32) | u64::from(rng.random())
        };
        tx::Parts {
            controller,
            device: interfaces.sta,
            seed,
        }
    };

    let store = STORE.init(SharedStore::new(store));

    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(console_task(console_rx, console_tx, store));
        spawner.must_spawn(async_main(spawner, link, store, role));
    })
}

#[embassy_executor::task]
async fn console_task(
    rx: UsbSerialJtagRx<'static, Async>,
    tx: UsbSerialJtagTx<'static, Async>,
    store: &'static SharedStore<Backend>,
) {
    tasks::console_task(rx, tx, store).await
}

#[embassy_executor::task]
async fn async_main(
    spawner: Spawner,
    mut link: LoraLink<Radio>,
    store: &'static SharedStore<Backend>,
    role: Role,
) {
    {
        let mut store = store.lock().await;
        let saved = LoraSettings::load(&*store).unwrap_or(LoraSettings {
            frequency_mhz: store_defaults::LORA_FREQUENCY_MHZ,
            sync_word: store_defaults::LORA_SYNC_WORD,
        });
        let config = LoraConfig {
            frequency_mhz: saved.frequency_mhz,
            sync_word: saved.sync_word,
            ..LoraConfig::default()
        };
        match link.init(config).await {
            Ok(chip) => {
                if let Err(e) = store.set_lora_band(chip.band()) {
                    log::error!(target: "store", "cannot record {} band: {}", chip.name(), e);
                }
            }
            Err(e) => log::error!(target: "lora", "radio init failed: {}", e),
        }
    }

    role.start(spawner, link, store).await;
}

#[cfg(feature = "role-rx")]
type Role = rx::Parts;
#[cfg(not(feature = "role-rx"))]
type Role = tx::Parts;

#[cfg(feature = "role-rx")]
mod rx {
    use super::{Backend, Radio};
    use embassy_executor::Spawner;
    use embassy_time::Instant;
    use tally_link_firmware::codec::DeviceId;
    use tally_link_firmware::dispatcher::RxDispatcher;
    use tally_link_firmware::lora::LoraLink;
    use tally_link_firmware::store::settings::SystemSettings;
    use tally_link_firmware::tasks::{self, BusDisplay, BusIndicator, IndicatorPins, SharedStore};

    pub struct Parts {
        pub indicator: IndicatorPins,
        pub device_id: DeviceId,
    }

    impl Parts {
        pub async fn start(self, spawner: Spawner, link: LoraLink<Radio>, store: &'static SharedStore<Backend>) {
            let system = {
                let store = store.lock().await;
                match SystemSettings::load(&*store) {
                    Ok(system) => system,
                    Err(e) => {
                        log::error!(target: "store", "system settings unreadable: {}", e);
                        return;
                    }
                }
            };
            log::info!(target: "dispatch", "node {} as camera {}", self.device_id, system.camera_id);

            let dispatcher = RxDispatcher::new(
                BusIndicator::new(),
                BusDisplay::new(),
                self.device_id,
                &system,
                Instant::now().as_millis(),
            );
            spawner.must_spawn(indicator_task(self.indicator));
            spawner.must_spawn(radio_task(link, store, dispatcher));
        }
    }

    #[embassy_executor::task]
    async fn indicator_task(pins: IndicatorPins) {
        tasks::indicator_task(pins).await
    }

    #[embassy_executor::task]
    async fn radio_task(
        link: LoraLink<Radio>,
        store: &'static SharedStore<Backend>,
        dispatcher: RxDispatcher<BusIndicator, BusDisplay>,
    ) {
        tasks::rx_radio_task(link, store, dispatcher).await
    }
}

#[cfg(not(feature = "role-rx"))]
mod tx {
    use super::{Backend, Radio};
    use embassy_executor::Spawner;
    use embassy_net::{Runner, Stack, StackResources};
    use esp_radio::wifi::{WifiController, WifiDevice};
    use static_cell::StaticCell;
    use tally_link_firmware::lora::LoraLink;
    use tally_link_firmware::store::settings::{EthernetSettings, NetInterface, SwitcherSettings, WifiSettings};
    use tally_link_firmware::switcher::{LinkInfo, SwitcherSupervisor};
    use tally_link_firmware::tasks::{self, NetDatagram, NetStream, SharedStore, TcpBuffers, UdpBuffers};

    /// DHCP plus one UDP and one TCP socket per switcher slot
    const SOCKETS: usize = 6;

    /// Static cell for esp-radio controller (needed for 'static lifetime)
    pub static RADIO_CONTROLLER: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    static RESOURCES: StaticCell<StackResources<SOCKETS>> = StaticCell::new();
    static UDP_PRIMARY: StaticCell<UdpBuffers> = StaticCell::new();
    static UDP_SECONDARY: StaticCell<UdpBuffers> = StaticCell::new();
    static TCP_PRIMARY: StaticCell<TcpBuffers> = StaticCell::new();
    static TCP_SECONDARY: StaticCell<TcpBuffers> = StaticCell::new();

    type Supervisor = SwitcherSupervisor<NetDatagram, NetStream>;

    pub struct Parts {
        pub controller: WifiController<'static>,
        pub device: WifiDevice<'static>,
        pub seed: u64,
    }

    fn on_connected(slot: usize, info: &LinkInfo) {
        log::info!(
            target: "supervisor",
            "switcher {} ready: {} with {} cameras",
            slot,
            info.kind.name(),
            info.camera_count
        );
    }

    impl Parts {
        pub async fn start(self, spawner: Spawner, link: LoraLink<Radio>, store: &'static SharedStore<Backend>) {
            let (wifi, eth) = {
                let store = store.lock().await;
                for slot in 0..2 {
                    if let Ok(settings) = SwitcherSettings::load(&*store, slot) {
                        if settings.interface == NetInterface::Ethernet {
                            log::warn!(target: "supervisor", "switcher {}: no Ethernet port, using Wi-Fi", slot);
                        }
                    }
                }
                (WifiSettings::load(&*store), EthernetSettings::load(&*store))
            };

            let (stack, runner) = embassy_net::new(
                self.device,
                tasks::stack_config(&eth),
                RESOURCES.init(StackResources::new()),
                self.seed,
            );

            let mut supervisor = SwitcherSupervisor::new(
                (
                    NetDatagram::new(stack, UDP_PRIMARY.init(UdpBuffers::new())),
                    NetStream::new(stack, TCP_PRIMARY.init(TcpBuffers::new())),
                ),
                (
                    NetDatagram::new(stack, UDP_SECONDARY.init(UdpBuffers::new())),
                    NetStream::new(stack, TCP_SECONDARY.init(TcpBuffers::new())),
                ),
            );
            supervisor.set_on_connected(on_connected);

            spawner.must_spawn(net_task(runner));
            spawner.must_spawn(wifi_task(self.controller, wifi));
            spawner.must_spawn(radio_task(link, store));
            spawner.must_spawn(switcher_task(supervisor, store, stack));
        }
    }

    #[embassy_executor::task]
    async fn net_task(runner: Runner<'static, WifiDevice<'static>>) {
        tasks::net_task(runner).await
    }

    #[embassy_executor::task]
    async fn wifi_task(controller: WifiController<'static>, wifi: WifiSettings) {
        tasks::wifi_task(controller, wifi).await
    }

    #[embassy_executor::task]
    async fn radio_task(link: LoraLink<Radio>, store: &'static SharedStore<Backend>) {
        tasks::tx_radio_task(link, store).await
    }

    #[embassy_executor::task]
    async fn switcher_task(supervisor: Supervisor, store: &'static SharedStore<Backend>, stack: Stack<'static>) {
        tasks::switcher_task(supervisor, store, stack).await
    }
}
