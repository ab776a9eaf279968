//! Raspberry Pi adapters: relay/valve on GPIO, flow sensor on an MCP3208
//! 12-bit ADC over SPI (the controller head unit has no on-board ADC).

use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::error::HwError;
use flowdose_traits::{Actuator, FlowSensor};

pub struct GpioActuator {
    pin: OutputPin,
    name: &'static str,
}

impl GpioActuator {
    /// Claims the pin and drives it low immediately.
    pub fn new(pin: u8, name: &'static str) -> Result<Self, HwError> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?
            .into_output_low();
        Ok(Self { pin, name })
    }
}

impl Actuator for GpioActuator {
    fn set_active(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        tracing::trace!(actuator = self.name, on, "gpio output written");
        Ok(())
    }
}

const SPI_CLOCK_HZ: u32 = 1_000_000;

pub struct SpiAdcFlowSensor {
    spi: Spi,
    channel: u8,
}

impl SpiAdcFlowSensor {
    pub fn new(channel: u8) -> Result<Self, HwError> {
        if channel > 7 {
            return Err(HwError::Spi(format!("adc channel {channel} out of range")));
        }
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        Ok(Self { spi, channel })
    }
}

impl FlowSensor for SpiAdcFlowSensor {
    fn read(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        // MCP3208 single-ended conversion: start bit, SGL, channel.
        let tx = [
            0x06 | (self.channel >> 2),
            (self.channel & 0x03) << 6,
            0x00,
        ];
        let mut rx = [0u8; 3];
        self.spi.transfer(&mut rx, &tx).map_err(|e| {
            Box::new(HwError::Spi(e.to_string())) as Box<dyn std::error::Error + Send + Sync>
        })?;
        let raw = (i32::from(rx[1] & 0x0F) << 8) | i32::from(rx[2]);
        Ok(raw)
    }
}
