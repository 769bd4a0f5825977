//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{Port, SerialConfig},
    },
    log::debug,
    serialport::{DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud (timeout {:?})",
            config.port_name, config.baud_rate, config.timeout
        );

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        Ok(Self {
            port,
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
        })
    }

    /// Open a serial port with the bootloader's default settings.
    pub fn open_simple(port_name: &str) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name, crate::port::DEFAULT_BAUD))
    }
}

impl Port for NativePort {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}
