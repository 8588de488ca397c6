//! Firmware transfer.
//!
//! A transfer wipes the resident firmware, announces the start address and
//! checksum, streams the body in large chunks, and finishes with an unlock
//! exchange. In fast mode the link first plants a small bootstrap in RAM,
//! doubles the line rate for the body, and accepts that the concluding
//! unlock reply is lost while the target switches speeds back.

use super::{Link, FIRMWARE_CHECKSUM_WINDOW};
use crate::cmd::{sum16, Cmd};
use crate::error::{Error, Result};
use crate::nub;
use crate::transport::Transport;
use log::{debug, info};

impl<T: Transport> Link<T> {
    /// Download firmware to the target.
    ///
    /// `start` is the load address. With `fast` set, the transport's
    /// doubled line rate is used for the body after the parity-matched
    /// bootstrap is planted at its fixed RAM address.
    pub fn download_firmware<F>(
        &mut self,
        data: &[u8],
        start: u16,
        fast: bool,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        if fast {
            if !self.transport.fast_mode_supported() {
                return Err(Error::PipeMode);
            }

            let stub: &[u8] = if self.transport.fast_mode_odd_parity() {
                &nub::NUB_ODD
            } else {
                &nub::NUB_EVEN
            };
            debug!("planting {}-byte fast-mode bootstrap", stub.len());
            self.transfer_firmware(stub, nub::NUB_START, false, progress)?;

            self.transport.set_fast_mode(true)?;
            let result = self.transfer_firmware(data, start, true, progress);
            self.transport.set_fast_mode(false)?;
            result
        } else {
            self.transfer_firmware(data, start, true, progress)
        }
    }

    /// One complete firmware transfer at the current line rate.
    fn transfer_firmware<F>(
        &mut self,
        data: &[u8],
        start: u16,
        show_progress: bool,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        info!(
            "transferring {} bytes of firmware to 0x{start:04x}",
            data.len()
        );

        self.sync()?;
        self.send(&Cmd::delete_firmware())?;

        let window = data.len().min(FIRMWARE_CHECKSUM_WINDOW);
        let check = sum16(&data[..window]);
        self.send(&Cmd::begin_firmware(start, check))?;

        self.begin_progress(if show_progress { data.len() } else { 0 });
        let chunk = self.firmware_chunk;
        self.download_stream(data, chunk, progress)?;

        // The target now verifies and burns; grant the reply the longest
        // wait the transport has, and never resend the unlock over it.
        let result = self.send_with(&Cmd::unlock(), false, self.transport.max_timeout());
        if self.transport.fast_mode() {
            // The reply is legitimately lost mid speed-switch.
            return Ok(());
        }
        result.map(|_| ())
    }
}
