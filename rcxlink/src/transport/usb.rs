//! USB tower pipe.
//!
//! On Linux the IR tower registers as a character device through the
//! `legousbtower` driver; reads and writes on the node move raw link
//! bytes. The driver enforces its own receive timeout, so a blocking read
//! returns once data arrives or the driver gives up.
//!
//! On platforms without the tower driver the constructor yields nothing
//! and selection of a `usb:` device URL fails with `UsbUnsupported`.

#[cfg(target_os = "linux")]
pub use imp::UsbTowerPipe;

#[cfg(target_os = "linux")]
mod imp {
    use crate::error::{Error, Result};
    use crate::transport::pipe::Pipe;
    use log::trace;
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Write};
    use std::time::Duration;

    const DEFAULT_DEVICE: &str = "/dev/usb/legousbtower0";

    /// USB tower pipe over the kernel tower device node.
    pub struct UsbTowerPipe {
        dev: Option<File>,
        path: String,
    }

    impl UsbTowerPipe {
        /// Create an unopened tower pipe, if the platform has the driver.
        #[must_use]
        pub fn probe() -> Option<Self> {
            Some(Self {
                dev: None,
                path: String::new(),
            })
        }

        fn dev_mut(&mut self) -> Result<&mut File> {
            self.dev.as_mut().ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "tower pipe is closed",
                ))
            })
        }
    }

    impl Pipe for UsbTowerPipe {
        fn open(&mut self, device: &str) -> Result<()> {
            let dev = OpenOptions::new().read(true).write(true).open(device)?;
            trace!("tower node {device} opened");
            self.dev = Some(dev);
            self.path = device.to_string();
            Ok(())
        }

        fn close(&mut self) {
            self.dev.take();
        }

        fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
            let dev = self.dev_mut()?;
            dev.write_all(data)?;
            dev.flush()?;
            Ok(())
        }

        fn read_bytes(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            // The tower driver applies its own receive timeout and ends the
            // read with whatever arrived, possibly nothing.
            let dev = self.dev_mut()?;
            match dev.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(Error::Io(e)),
            }
        }

        fn drain(&mut self) {
            if let Ok(dev) = self.dev_mut() {
                let mut sink = [0u8; 64];
                while matches!(dev.read(&mut sink), Ok(n) if n > 0) {}
            }
        }

        fn default_device(&self) -> &str {
            DEFAULT_DEVICE
        }
    }

}

/// Probe for tower support, yielding a ready-to-open pipe when the
/// platform has the driver.
#[cfg(target_os = "linux")]
#[must_use]
pub fn probe() -> Option<Box<dyn crate::transport::Pipe>> {
    UsbTowerPipe::probe().map(|p| Box::new(p) as Box<dyn crate::transport::Pipe>)
}

/// Probe for tower support. Always `None` on this platform.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn probe() -> Option<Box<dyn crate::transport::Pipe>> {
    None
}
