//! UART transport for ESP32 using esp-idf-svc

use crate::transport::RfidTransport;
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::gpio::{self, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::sys::EspError;
use std::time::Duration;

/// Readers emit a boot banner on power-up; give it time to pass before flushing.
const SETTLE: Duration = Duration::from_millis(100);

/// Nation reader on an ESP32 UART, either plain two-wire or RS-485.
pub struct UartTransport<'a> {
    uart: UartDriver<'a>,
}

impl<'a> UartTransport<'a> {
    /// Two-wire 8N1 link.
    pub fn new(
        uart: impl Peripheral<P = impl uart::Uart> + 'a,
        tx: impl Peripheral<P = impl OutputPin> + 'a,
        rx: impl Peripheral<P = impl InputPin> + 'a,
        baud_rate: u32,
    ) -> Result<Self, EspError> {
        let config = uart::config::Config::default().baudrate(baud_rate.into());
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<gpio::Gpio0>::None,
            Option::<gpio::Gpio0>::None,
            &config,
        )?;
        Self::settle(uart)
    }

    /// Half-duplex RS-485 link; the driver toggles `direction` (wired to
    /// the transceiver's DE/RE) around each transmission.
    ///
    /// Pair with [`ReaderConfig::rs485_address`](crate::ReaderConfig) so
    /// frames carry the station address.
    pub fn new_rs485(
        uart: impl Peripheral<P = impl uart::Uart> + 'a,
        tx: impl Peripheral<P = impl OutputPin> + 'a,
        rx: impl Peripheral<P = impl InputPin> + 'a,
        direction: impl Peripheral<P = impl OutputPin> + 'a,
        baud_rate: u32,
    ) -> Result<Self, EspError> {
        let config = uart::config::Config::default()
            .baudrate(baud_rate.into())
            .mode(uart::config::Mode::RS485HalfDuplex);
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<gpio::Gpio0>::None,
            Some(direction),
            &config,
        )?;
        Self::settle(uart)
    }

    fn settle(uart: UartDriver<'a>) -> Result<Self, EspError> {
        std::thread::sleep(SETTLE);
        uart.clear_rx()?;
        Ok(Self { uart })
    }
}

impl RfidTransport for UartTransport<'_> {
    type Error = EspError;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.uart.write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        // The driver waits in RTOS ticks and reports a quiet line as zero bytes.
        let ticks = TickType::new_millis(timeout_ms as u64).ticks();
        self.uart.read(buf, ticks)
    }

    fn flush_input(&mut self) -> Result<(), Self::Error> {
        self.uart.clear_rx()
    }
}
