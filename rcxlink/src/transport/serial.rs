//! Serial tower pipe using the `serialport` crate.
//!
//! The serial IR tower runs at 2400 baud, 8 data bits, odd parity, one
//! stop bit. Fast mode doubles the rate to 4800 baud and keeps the
//! parity, so the odd-parity bootstrap is the one to upload first.

use crate::error::{Error, Result};
use crate::transport::pipe::Pipe;
use log::trace;
use serialport::ClearBuffer;
use std::io::{Read, Write};
use std::time::Duration;

/// Line rate of the serial tower.
pub const SERIAL_BAUD: u32 = 2400;

/// Line rate in fast mode.
pub const SERIAL_FAST_BAUD: u32 = 4800;

#[cfg(unix)]
const DEFAULT_DEVICE: &str = "/dev/ttyS0";
#[cfg(windows)]
const DEFAULT_DEVICE: &str = "COM1";

/// Serial tower pipe.
pub struct SerialPipe {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl SerialPipe {
    /// Create an unopened serial pipe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: None,
            name: String::new(),
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial pipe is closed",
            ))
        })
    }
}

impl Default for SerialPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipe for SerialPipe {
    fn open(&mut self, device: &str) -> Result<()> {
        let port = serialport::new(device, SERIAL_BAUD)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::Odd)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        self.port = Some(port);
        self.name = device.to_string();
        Ok(())
    }

    fn close(&mut self) {
        self.port.take();
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn drain(&mut self) {
        if let Some(ref mut port) = self.port {
            let _ = port.clear(ClearBuffer::Input);
        }
    }

    fn default_device(&self) -> &str {
        DEFAULT_DEVICE
    }

    fn supports_fast_mode(&self) -> bool {
        true
    }

    fn fast_mode_odd_parity(&self) -> bool {
        true
    }

    fn set_fast_mode(&mut self, fast: bool) -> Result<()> {
        let baud = if fast { SERIAL_FAST_BAUD } else { SERIAL_BAUD };
        trace!("serial pipe {}: switching to {baud} baud", self.name);
        self.port_mut()?.set_baud_rate(baud)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let pipe = SerialPipe::new();
        assert!(pipe.supports_fast_mode());
        assert!(pipe.fast_mode_odd_parity());
        assert!(!pipe.default_device().is_empty());
    }

    #[test]
    fn test_closed_pipe_rejects_io() {
        let mut pipe = SerialPipe::new();
        assert!(pipe.write_bytes(&[0x10]).is_err());
        let mut buf = [0u8; 4];
        assert!(pipe
            .read_bytes(&mut buf, Duration::from_millis(10))
            .is_err());
        // Close and drain on a closed pipe are no-ops.
        pipe.close();
        pipe.drain();
    }
}
