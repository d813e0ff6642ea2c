//! SX1262 / SX1268 driver
//!
//! Talks to the SX126x command interface over SPI with manual NSS control.
//! Transmit and receive are started here and finished through `poll_event`,
//! so the radio task never blocks on the air time of a packet.

use crate::config::limits::MAX_LORA_PAYLOAD;
use crate::config::tcxo;
use crate::lora::params::{frequency_word, image_calibration, modulation_params, sync_word_bytes};
use crate::lora::traits::{ChipType, LoraConfig, LoraError, LoraRadio, RadioEvent, RxPacket};
use embassy_time::Timer;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::SpiBus;
use heapless::Vec;

/// SX126x command opcodes (datasheet section 13)
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Op {
    ClearDeviceErrors = 0x07,
    ClearIrqStatus = 0x02,
    SetDioIrqParams = 0x08,
    WriteRegister = 0x0D,
    WriteBuffer = 0x0E,
    GetIrqStatus = 0x12,
    GetRxBufferStatus = 0x13,
    GetPacketStatus = 0x14,
    GetRssiInst = 0x15,
    GetDeviceErrors = 0x17,
    ReadRegister = 0x1D,
    ReadBuffer = 0x1E,
    SetStandby = 0x80,
    SetRx = 0x82,
    SetTx = 0x83,
    SetSleep = 0x84,
    SetRfFrequency = 0x86,
    SetPacketType = 0x8A,
    SetModulationParams = 0x8B,
    SetPacketParams = 0x8C,
    SetTxParams = 0x8E,
    SetBufferBaseAddress = 0x8F,
    SetPaConfig = 0x95,
    SetDio3AsTcxoCtrl = 0x97,
    CalibrateImage = 0x98,
    SetDio2AsRfSwitchCtrl = 0x9D,
}

/// Register addresses
const REG_OCP: u16 = 0x08E7;
const REG_SYNC_WORD: u16 = 0x0740;
/// ASCII version string, e.g. "SX1261 V2D 2D02"
const REG_VERSION: u16 = 0x0320;

const IRQ_TX_DONE: u16 = 0x0001;
const IRQ_RX_DONE: u16 = 0x0002;
const IRQ_CRC_ERR: u16 = 0x0040;
const IRQ_TIMEOUT: u16 = 0x0200;
const IRQ_ALL: u16 = 0xFFFF;

/// IMG_CALIB_ERR | PLL_LOCK_ERR: the band is unusable
const CALIBRATION_ERRORS: u16 = 0x0010 | 0x0040;

/// Longest command frame apart from buffer access
const CMD_FRAME: usize = 20;
/// Buffer access: opcode, offset, status, payload
const BUF_FRAME: usize = 3 + MAX_LORA_PAYLOAD;

/// Busy line poll budget, 100 us apart
const BUSY_POLLS: u32 = 1000;

/// Control pins for SX126x
pub struct Sx126xPins<Nss, Dio1, Nrst, Busy> {
    pub nss: Nss,
    pub dio1: Dio1,
    pub nrst: Nrst,
    pub busy: Busy,
}

/// SX126x LoRa driver
///
/// Generic over the SPI bus and GPIO pins, so the same code runs against
/// the esp-hal peripherals and any other embedded-hal implementation.
pub struct Sx126xDriver<Spi, Nss, Dio1, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin + Wait,
    Nrst: OutputPin,
    Busy: InputPin,
{
    spi: Spi,
    nss: Nss,
    dio1: Dio1,
    nrst: Nrst,
    busy: Busy,
    preamble_length: u16,
    ready: bool,
}

impl<Spi, Nss, Dio1, Nrst, Busy> Sx126xDriver<Spi, Nss, Dio1, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin + Wait,
    Nrst: OutputPin,
    Busy: InputPin,
{
    pub fn new(spi: Spi, pins: Sx126xPins<Nss, Dio1, Nrst, Busy>) -> Self {
        Self {
            spi,
            nss: pins.nss,
            dio1: pins.dio1,
            nrst: pins.nrst,
            busy: pins.busy,
            preamble_length: LoraConfig::default().preamble_length,
            ready: false,
        }
    }

    async fn hard_reset(&mut self) {
        let _ = self.nrst.set_low();
        Timer::after_millis(10).await;
        let _ = self.nrst.set_high();
        Timer::after_millis(20).await;
    }

    async fn wait_ready(&mut self) -> Result<(), LoraError> {
        for _ in 0..BUSY_POLLS {
            if matches!(self.busy.is_low(), Ok(true)) {
                return Ok(());
            }
            Timer::after_micros(100).await;
        }
        Err(LoraError::BusyTimeout)
    }

    /// One NSS-framed SPI exchange; `frame` is sent and overwritten with
    /// what the chip clocked back
    async fn exchange(&mut self, frame: &mut [u8]) -> Result<(), LoraError> {
        self.wait_ready().await?;
        let _ = self.nss.set_low();
        let result = self.spi.transfer_in_place(frame).await;
        let _ = self.nss.set_high();
        result.map_err(|_| LoraError::SpiError)
    }

    async fn command(&mut self, op: Op, args: &[u8]) -> Result<(), LoraError> {
        let mut frame = [0u8; CMD_FRAME];
        let len = 1 + args.len().min(CMD_FRAME - 1);
        frame[0] = op as u8;
        frame[1..len].copy_from_slice(&args[..len - 1]);
        self.exchange(&mut frame[..len]).await
    }

    /// Issue `op` and return the `N` bytes following the status byte
    async fn query<const N: usize>(&mut self, op: Op) -> Result<[u8; N], LoraError> {
        let mut frame = [0u8; CMD_FRAME];
        frame[0] = op as u8;
        self.exchange(&mut frame[..2 + N]).await?;
        let mut out = [0u8; N];
        out.copy_from_slice(&frame[2..2 + N]);
        Ok(out)
    }

    async fn write_register(&mut self, addr: u16, values: &[u8]) -> Result<(), LoraError> {
        let mut args = [0u8; CMD_FRAME - 1];
        let len = values.len().min(args.len() - 2);
        args[..2].copy_from_slice(&addr.to_be_bytes());
        args[2..2 + len].copy_from_slice(&values[..len]);
        self.command(Op::WriteRegister, &args[..2 + len]).await
    }

    async fn read_register(&mut self, addr: u16, out: &mut [u8]) -> Result<(), LoraError> {
        // Opcode, address, status, then data
        let mut frame = [0u8; CMD_FRAME];
        let len = out.len().min(CMD_FRAME - 4);
        frame[0] = Op::ReadRegister as u8;
        frame[1..3].copy_from_slice(&addr.to_be_bytes());
        self.exchange(&mut frame[..4 + len]).await?;
        out[..len].copy_from_slice(&frame[4..4 + len]);
        Ok(())
    }

    async fn standby(&mut self) -> Result<(), LoraError> {
        // STDBY_RC
        self.command(Op::SetStandby, &[0x00]).await
    }

    async fn tune(&mut self, mhz: f32) -> Result<(), LoraError> {
        self.command(Op::CalibrateImage, &image_calibration(mhz)).await?;
        self.command(Op::SetRfFrequency, &frequency_word(mhz)).await
    }

    async fn set_payload_length(&mut self, payload_len: u8) -> Result<(), LoraError> {
        let [pre_hi, pre_lo] = self.preamble_length.to_be_bytes();
        // Explicit header, CRC on, standard IQ
        self.command(Op::SetPacketParams, &[pre_hi, pre_lo, 0x00, payload_len, 0x01, 0x00])
            .await
    }

    async fn set_power(&mut self, power_dbm: i8) -> Result<(), LoraError> {
        // High power PA: duty cycle 4, hpMax 7, SX1262 select, paLut 1
        self.command(Op::SetPaConfig, &[0x04, 0x07, 0x00, 0x01]).await?;
        // 200 us ramp
        self.command(Op::SetTxParams, &[power_dbm as u8, 0x04]).await
    }

    /// Route `mask` to the IRQ register and DIO1, then clear stale flags
    async fn arm_irq(&mut self, mask: u16) -> Result<(), LoraError> {
        let [hi, lo] = mask.to_be_bytes();
        self.command(Op::SetDioIrqParams, &[hi, lo, hi, lo, 0, 0, 0, 0]).await?;
        self.command(Op::ClearIrqStatus, &IRQ_ALL.to_be_bytes()).await
    }

    async fn take_irq(&mut self) -> Result<u16, LoraError> {
        let status = u16::from_be_bytes(self.query::<2>(Op::GetIrqStatus).await?);
        if status != 0 {
            self.command(Op::ClearIrqStatus, &IRQ_ALL.to_be_bytes()).await?;
        }
        Ok(status)
    }

    async fn load_payload(&mut self, data: &[u8]) -> Result<(), LoraError> {
        let mut frame = [0u8; BUF_FRAME];
        let len = data.len().min(MAX_LORA_PAYLOAD);
        frame[0] = Op::WriteBuffer as u8;
        frame[2..2 + len].copy_from_slice(&data[..len]);
        self.exchange(&mut frame[..2 + len]).await
    }

    async fn fetch_packet(&mut self) -> Result<RxPacket, LoraError> {
        let [len, start] = self.query::<2>(Op::GetRxBufferStatus).await?;
        if len == 0 {
            return Err(LoraError::ReceiveFailed);
        }
        let len = (len as usize).min(MAX_LORA_PAYLOAD);

        let mut frame = [0u8; BUF_FRAME];
        frame[0] = Op::ReadBuffer as u8;
        frame[1] = start;
        self.exchange(&mut frame[..3 + len]).await?;
        let data = Vec::from_slice(&frame[3..3 + len]).map_err(|_| LoraError::ReceiveFailed)?;

        let [rssi_raw, snr_raw, _] = self.query::<3>(Op::GetPacketStatus).await?;
        Ok(RxPacket {
            data,
            rssi: -(rssi_raw as i16) / 2,
            snr: (snr_raw as i8) / 4,
        })
    }

    fn check_ready(&self) -> Result<(), LoraError> {
        if self.ready {
            Ok(())
        } else {
            Err(LoraError::NotInitialised)
        }
    }
}

impl<Spi, Nss, Dio1, Nrst, Busy> LoraRadio for Sx126xDriver<Spi, Nss, Dio1, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin + Wait,
    Nrst: OutputPin,
    Busy: InputPin,
{
    async fn detect(&mut self, chip: ChipType, config: &LoraConfig) -> Result<(), LoraError> {
        self.ready = false;
        self.hard_reset().await;
        self.standby().await?;

        let mut version = [0u8; 16];
        self.read_register(REG_VERSION, &mut version).await?;
        if !version.starts_with(b"SX126") {
            return Err(LoraError::ChipNotFound);
        }

        // TCXO on DIO3, ~5 ms startup
        let [_, t2, t1, t0] = 0x0000_0140u32.to_be_bytes();
        self.command(Op::SetDio3AsTcxoCtrl, &[tcxo::VOLTAGE_CODE, t2, t1, t0]).await?;
        Timer::after_millis(10).await;
        self.command(Op::SetDio2AsRfSwitchCtrl, &[0x01]).await?;
        // 140 mA current limit, 2.5 mA steps
        self.write_register(REG_OCP, &[56]).await?;
        self.command(Op::SetPacketType, &[0x01]).await?;
        self.command(Op::SetBufferBaseAddress, &[0x00, 0x00]).await?;

        self.command(Op::ClearDeviceErrors, &[0x00, 0x00]).await?;
        self.tune(config.frequency_mhz).await?;
        let errors = u16::from_be_bytes(self.query::<2>(Op::GetDeviceErrors).await?);
        if errors & CALIBRATION_ERRORS != 0 {
            log::debug!(target: "lora", "{} calibration failed at {} MHz", chip.name(), config.frequency_mhz);
            return Err(LoraError::ChipNotFound);
        }

        self.preamble_length = config.preamble_length;
        self.command(Op::SetModulationParams, &modulation_params(config)).await?;
        self.set_power(config.tx_power_dbm).await?;
        self.write_register(REG_SYNC_WORD, &sync_word_bytes(config.sync_word)).await?;

        self.ready = true;
        Ok(())
    }

    async fn set_frequency(&mut self, mhz: f32) -> Result<(), LoraError> {
        self.check_ready()?;
        self.standby().await?;
        self.tune(mhz).await
    }

    async fn set_sync_word(&mut self, sync_word: u8) -> Result<(), LoraError> {
        self.check_ready()?;
        self.write_register(REG_SYNC_WORD, &sync_word_bytes(sync_word)).await
    }

    async fn start_transmit(&mut self, data: &[u8]) -> Result<(), LoraError> {
        self.check_ready()?;
        if data.is_empty() || data.len() > MAX_LORA_PAYLOAD {
            return Err(LoraError::InvalidConfig);
        }

        self.standby().await?;
        self.set_payload_length(data.len() as u8).await?;
        self.load_payload(data).await?;
        self.arm_irq(IRQ_TX_DONE | IRQ_TIMEOUT).await?;
        // Timeout 0: no TX timeout
        self.command(Op::SetTx, &[0x00, 0x00, 0x00]).await
    }

    async fn start_receive(&mut self) -> Result<(), LoraError> {
        self.check_ready()?;
        self.standby().await?;
        self.set_payload_length(MAX_LORA_PAYLOAD as u8).await?;
        self.arm_irq(IRQ_RX_DONE | IRQ_TIMEOUT | IRQ_CRC_ERR).await?;
        // Timeout 0xFFFFFF: continuous
        self.command(Op::SetRx, &[0xFF, 0xFF, 0xFF]).await
    }

    async fn poll_event(&mut self) -> Result<RadioEvent, LoraError> {
        self.check_ready()?;
        let status = self.take_irq().await?;

        if status & IRQ_TX_DONE != 0 {
            Ok(RadioEvent::TxDone)
        } else if status & IRQ_CRC_ERR != 0 {
            Ok(RadioEvent::CrcError)
        } else if status & IRQ_RX_DONE != 0 {
            match self.fetch_packet().await {
                Ok(packet) => Ok(RadioEvent::RxDone(packet)),
                Err(LoraError::ReceiveFailed) => Ok(RadioEvent::CrcError),
                Err(e) => Err(e),
            }
        } else if status & IRQ_TIMEOUT != 0 {
            Ok(RadioEvent::Timeout)
        } else {
            Ok(RadioEvent::Idle)
        }
    }

    async fn wait_irq(&mut self) {
        let _ = self.dio1.wait_for_high().await;
    }

    async fn rssi(&mut self) -> Result<i16, LoraError> {
        self.check_ready()?;
        let [raw] = self.query::<1>(Op::GetRssiInst).await?;
        Ok(-(raw as i16) / 2)
    }

    async fn sleep(&mut self) -> Result<(), LoraError> {
        self.check_ready()?;
        // Warm start, configuration retained
        self.command(Op::SetSleep, &[0x04]).await
    }
}
