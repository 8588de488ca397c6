//! Link session: one logical connection to one brick.
//!
//! A [`Link`] owns its transport for its whole lifetime. All exchanges are
//! strictly sequential: every command completes with a reply or an error
//! before the next one starts, and none of the operations are re-entrant.
//! Serializing calls across threads is the caller's business.
//!
//! Opening resolves the device URL (`usb:`, `tcp:`, or `serial:` prefix;
//! then the `RCX_PORT` environment variable, the per-user and system
//! `device.conf` files, and finally the compiled-in default device) and
//! binds the matching pipe transport.

mod download;
mod firmware;

use crate::cmd::{Cmd, RcxValue};
use crate::error::{Error, Result};
use crate::opcode::expected_reply_length;
use crate::shaper::{Shaper, MAX_ZEROS_SERIAL, MAX_ZEROS_USB};
use crate::target::Target;
use crate::transport::pipe::Pipe;
use crate::transport::serial::SerialPipe;
use crate::transport::{check_prefix, resolve_device_url, usb, PipeTransport, Transport};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, trace};
use std::time::Duration;

/// Longest command body the link will hand to a transport.
const MAX_CMD_LEN: usize = 256;

/// Reply buffer capacity; also the longest reply the link will await.
const MAX_REPLY_LEN: usize = 1024;

/// Body chunk size for task and subroutine downloads.
const PROGRAM_CHUNK: usize = 20;

/// Body chunk size for firmware downloads.
const FIRMWARE_CHUNK: usize = 200;

/// Spybotics body chunk size over serial.
const SPYBOTICS_CHUNK: usize = 16;

/// Spybotics body chunk size over USB.
const SPYBOTICS_SMALL_CHUNK: usize = 2;

/// Load address of a linked Spybotics body.
const SPYBOTICS_START: u16 = 0x0100;

/// The firmware checksum covers at most this many leading bytes.
const FIRMWARE_CHECKSUM_WINDOW: usize = 0x4c00;

/// Per-frame reply wait during chunked downloads.
const DOWNLOAD_WAIT: Duration = Duration::from_millis(300);

/// Default reply wait for plain exchanges.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300);

/// Spybotics register bank holding the periodic-ping control.
const SPYBOT_PING_CTRL: u8 = 0x23;

/// Scout register poked by the second unlock step.
const SCOUT_UNLOCK_SET: u8 = 0x47;

/// Scout battery poll address; one raw unit is 109 millivolts.
const SCOUT_BATTERY_ADDR: u16 = 0x013a;
const SCOUT_BATTERY_UNIT_MV: u16 = 109;

/// Options for [`Link::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Skip the done-sound after a program download.
    pub quiet: bool,
    /// Ask the transport to omit its sync preamble.
    pub omit_header: bool,
}

impl LinkOptions {
    /// Skip the done-sound after a program download.
    #[must_use]
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Ask the transport to omit its sync preamble.
    #[must_use]
    pub fn with_omit_header(mut self, omit: bool) -> Self {
        self.omit_header = omit;
        self
    }
}

/// One logical session to one brick.
///
/// Generic over the transport, which the session owns; dropping the link
/// closes it. [`Link::open`] builds the usual pipe-backed transport from a
/// device URL, while [`Link::new`] accepts any [`Transport`].
pub struct Link<T: Transport = PipeTransport> {
    target: Target,
    transport: T,
    synced: bool,
    quiet: bool,
    program_mode: bool,
    usb: bool,
    program_chunk: usize,
    firmware_chunk: usize,
    download_wait: Duration,
    shaper: Shaper,
    reply: [u8; MAX_REPLY_LEN],
    reply_len: usize,
    download_total: usize,
    download_so_far: usize,
}

impl Link<PipeTransport> {
    /// Open a session on a device URL.
    ///
    /// With `device` absent the URL comes from `RCX_PORT`, then the
    /// per-user and system `device.conf` files, then the compiled-in
    /// default serial device.
    pub fn open(target: Target, device: Option<&str>, options: LinkOptions) -> Result<Self> {
        let url = resolve_device_url(device).unwrap_or_default();

        let (pipe, dev, usb): (Box<dyn Pipe>, &str, bool) =
            if let Some(rest) = check_prefix(&url, "usb") {
                (usb::probe().ok_or(Error::UsbUnsupported)?, rest, true)
            } else if let Some(rest) = check_prefix(&url, "tcp") {
                (crate::transport::tcp_pipe()?, rest, false)
            } else {
                let rest = check_prefix(&url, "serial").unwrap_or(url.as_str());
                (Box::new(SerialPipe::new()), rest, false)
            };

        let mut transport = PipeTransport::new(pipe);
        transport.set_omit_header(options.omit_header);
        transport.open(target, dev)?;

        let mut link = Link::new(target, transport);
        link.quiet = options.quiet;
        link.usb = usb;
        link.shaper.max_zeros = if usb { MAX_ZEROS_USB } else { MAX_ZEROS_SERIAL };
        link.apply_open_tweaks()?;
        Ok(link)
    }
}

impl<T: Transport> Link<T> {
    /// Wrap an already-open transport in a session.
    pub fn new(target: Target, transport: T) -> Self {
        Self {
            target,
            transport,
            synced: false,
            quiet: false,
            program_mode: false,
            usb: false,
            program_chunk: PROGRAM_CHUNK,
            firmware_chunk: FIRMWARE_CHUNK,
            download_wait: DOWNLOAD_WAIT,
            shaper: Shaper::default(),
            reply: [0; MAX_REPLY_LEN],
            reply_len: 0,
            download_total: 0,
            download_so_far: 0,
        }
    }

    /// Target-specific adjustments right after the transport opens.
    pub(crate) fn apply_open_tweaks(&mut self) -> Result<()> {
        if self.target == Target::Spybotics {
            // A Spybotics brick pings its surroundings periodically, which
            // tramples replies; turn that off for the session.
            self.send(&Cmd::set(
                RcxValue::new(SPYBOT_PING_CTRL, 1),
                RcxValue::new(2, 0),
            ))?;
        }
        Ok(())
    }

    /// The session's target kind.
    #[must_use]
    pub fn target(&self) -> Target {
        self.target
    }

    /// Whether the target is believed awake and unlocked.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close the session. Idempotent; dropping the link closes too.
    pub fn close(&mut self) {
        self.transport.close();
        self.synced = false;
    }

    /// Set the per-frame reply wait for chunked downloads.
    pub fn set_download_wait(&mut self, wait: Duration) {
        self.download_wait = wait;
    }

    /// Set the body chunk size for program downloads.
    pub fn set_program_chunk_size(&mut self, size: usize) {
        self.program_chunk = size;
    }

    /// Set the body chunk size for firmware downloads.
    pub fn set_firmware_chunk_size(&mut self, size: usize) {
        self.firmware_chunk = size;
    }

    /// Skip or restore the done-sound after program downloads.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Tune the outgoing payload shaping thresholds.
    pub fn shaper_mut(&mut self) -> &mut Shaper {
        &mut self.shaper
    }

    /// Send a command with retries and the default reply wait.
    pub fn send(&mut self, cmd: &Cmd) -> Result<usize> {
        self.send_with(cmd, true, DEFAULT_TIMEOUT)
    }

    /// Send a command. Returns the reply payload length (the echoed
    /// opcode complement is not counted) and caches the reply bytes for
    /// [`Link::reply_bytes`].
    pub fn send_with(&mut self, cmd: &Cmd, retry: bool, timeout: Duration) -> Result<usize> {
        let expected = expected_reply_length(cmd.body(), self.target);
        if cmd.len() > MAX_CMD_LEN || expected > MAX_REPLY_LEN {
            return Err(Error::Request(format!(
                "command of {} bytes expecting {expected} reply bytes",
                cmd.len()
            )));
        }

        trace!(
            "sending opcode 0x{:02x}, {} bytes, expecting {expected}",
            cmd.opcode(),
            cmd.len()
        );
        match self
            .transport
            .send(cmd.body(), &mut self.reply, expected, retry, timeout)
        {
            Ok(n) => {
                self.reply_len = n;
                Ok(n)
            }
            Err(e) => {
                self.reply_len = 0;
                Err(e)
            }
        }
    }

    /// Payload bytes of the last successful reply.
    #[must_use]
    pub fn reply_bytes(&self) -> &[u8] {
        &self.reply[1..1 + self.reply_len]
    }

    /// One payload byte of the last successful reply.
    ///
    /// The caller must keep `index` below the length the send returned.
    #[must_use]
    pub fn reply_byte(&self, index: usize) -> u8 {
        debug_assert!(index < self.reply_len);
        self.reply[index + 1]
    }

    /// Wake the target and run its unlock sequence once.
    ///
    /// Cached: after a success, later calls return immediately until the
    /// session closes. A stale cache is harmless since a sleeping target
    /// surfaces as an error on the next exchange.
    pub fn sync(&mut self) -> Result<()> {
        if self.synced {
            return Ok(());
        }

        self.send(&Cmd::ping())?;

        match self.target {
            Target::CyberMaster => {
                self.send(&Cmd::unlock_cm())?;
            }
            Target::Scout => {
                self.send(&Cmd::unlock())?;
                // The Scout wants this register poke after the keyphrase
                // before it accepts downloads.
                self.send(&Cmd::new(SCOUT_UNLOCK_SET, &[0x80]))?;
            }
            _ => {}
        }

        debug!("{} synced", self.target);
        self.synced = true;
        Ok(())
    }

    /// Whether the last failure looks like a brick running only its ROM.
    ///
    /// True only for targets that need firmware, on a synced link, when a
    /// patient version query reports an all-zero RAM version.
    pub fn was_error_from_missing_firmware(&mut self) -> bool {
        if !self.target.requires_firmware() {
            return false;
        }
        if !self.synced {
            return false;
        }

        // Speed is irrelevant here; wait as long as the transport allows.
        let timeout = self.transport.max_timeout();
        match self.send_with(&Cmd::versions(), true, timeout) {
            Ok(8) => (4..8).all(|i| self.reply_byte(i) == 0),
            _ => false,
        }
    }

    /// Query the ROM and firmware version numbers.
    pub fn version(&mut self) -> Result<(u32, u32)> {
        self.sync()?;
        let n = self.send(&Cmd::versions())?;
        if n != 8 {
            return Err(Error::Reply(format!("version reply of {n} bytes")));
        }

        let payload = self.reply_bytes();
        let rom = BigEndian::read_u32(&payload[0..4]);
        let ram = BigEndian::read_u32(&payload[4..8]);
        Ok((rom, ram))
    }

    /// Read a typed value from the target.
    pub fn value(&mut self, value: RcxValue) -> Result<i16> {
        self.sync()?;
        let n = self.send(&Cmd::read(value))?;
        if n != 2 {
            return Err(Error::Reply(format!("read reply of {n} bytes")));
        }
        Ok(LittleEndian::read_i16(self.reply_bytes()))
    }

    /// Query the battery level in millivolts.
    pub fn battery_level(&mut self) -> Result<u16> {
        self.sync()?;

        if self.target == Target::Scout {
            // The Scout has no battery opcode; poll the raw cell reading.
            let n = self.send(&Cmd::poll_memory(SCOUT_BATTERY_ADDR, 1))?;
            if n != 1 {
                return Err(Error::Reply(format!("battery poll reply of {n} bytes")));
            }
            Ok(u16::from(self.reply_byte(0)) * SCOUT_BATTERY_UNIT_MV)
        } else {
            let n = self.send(&Cmd::battery_level())?;
            if n != 2 {
                return Err(Error::Reply(format!("battery reply of {n} bytes")));
            }
            Ok(LittleEndian::read_u16(self.reply_bytes()))
        }
    }

    /// Reset the progress counters for a transfer of `total` bytes.
    /// A total of 0 suppresses progress reporting entirely.
    pub(crate) fn begin_progress(&mut self, total: usize) {
        self.download_total = total;
        self.download_so_far = 0;
    }

    /// Advance progress and consult the caller. Returns false when the
    /// caller wants the transfer stopped.
    pub(crate) fn increment_progress<F>(&mut self, delta: usize, progress: &mut F) -> bool
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        self.download_so_far += delta;
        if self.download_total == 0 {
            return true;
        }
        progress(self.download_so_far, self.download_total, delta)
    }
}

impl<T: Transport> Drop for Link<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode;
    use crate::transport::mock::MockTransport;

    fn link(target: Target) -> Link<MockTransport> {
        Link::new(target, MockTransport::new())
    }

    #[test]
    fn test_sync_pings_once() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.sync().unwrap();
        assert_eq!(link.transport().opcodes(), [opcode::PING]);
        assert!(link.is_synced());
    }

    #[test]
    fn test_sync_scout_unlock_sequence() {
        let mut link = link(Target::Scout);
        link.sync().unwrap();
        assert_eq!(
            link.transport().opcodes(),
            [opcode::PING, opcode::UNLOCK, SCOUT_UNLOCK_SET]
        );
        assert_eq!(link.transport().sent[2], [SCOUT_UNLOCK_SET, 0x80]);
    }

    #[test]
    fn test_sync_cybermaster_unlock() {
        let mut link = link(Target::CyberMaster);
        link.sync().unwrap();
        assert_eq!(link.transport().opcodes(), [opcode::PING, opcode::UNLOCK_CM]);
    }

    #[test]
    fn test_failed_ping_leaves_unsynced() {
        let mut link = link(Target::Rcx2);
        link.transport_mut().fail_on.push(0);
        assert!(link.sync().is_err());
        assert!(!link.is_synced());
    }

    #[test]
    fn test_close_clears_sync() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.close();
        assert!(!link.is_synced());
        assert!(!link.transport().is_open());
        // Idempotent.
        link.close();
    }

    #[test]
    fn test_request_error_on_oversized_command() {
        let mut link = link(Target::Rcx2);
        let big = vec![0u8; 255];
        let err = link.send(&Cmd::download(1, &big)).unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn test_request_error_on_oversized_reply() {
        let mut link = link(Target::Rcx2);
        // 512 datalog entries would need 1537 reply bytes.
        let err = link.send(&Cmd::upload_datalog(0, 512)).unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn test_version_decodes_big_endian_pairs() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.transport_mut()
            .push_reply(&[0x00, 0x03, 0x00, 0x01, 0x00, 0x03, 0x03, 0x02]);
        let (rom, ram) = link.version().unwrap();
        assert_eq!(rom, 0x0003_0001);
        assert_eq!(ram, 0x0003_0302);
    }

    #[test]
    fn test_version_rejects_short_reply() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.transport_mut()
            .push_reply(&[0x00, 0x03, 0x00, 0x01, 0x00, 0x03, 0x03]);
        assert!(matches!(link.version(), Err(Error::Reply(_))));
    }

    #[test]
    fn test_value_decodes_little_endian() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.transport_mut().push_reply(&[0x2c, 0x01]);
        let v = link.value(RcxValue::new(0, 7)).unwrap();
        assert_eq!(v, 300);
    }

    #[test]
    fn test_battery_level_plain() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.transport_mut().push_reply(&[0x84, 0x1d]);
        assert_eq!(link.battery_level().unwrap(), 7556);
        assert_eq!(
            link.transport().opcodes(),
            [opcode::PING, opcode::BATTERY_LEVEL]
        );
    }

    #[test]
    fn test_battery_level_scout_scales_units() {
        let mut link = link(Target::Scout);
        link.sync().unwrap();
        link.transport_mut().push_reply(&[75]);
        assert_eq!(link.battery_level().unwrap(), 75 * 109);
        let poll = link.transport().sent.last().unwrap().clone();
        assert_eq!(poll, [opcode::POLL_MEMORY, 0x3a, 0x01, 0x01]);
    }

    #[test]
    fn test_missing_firmware_signature() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.transport_mut()
            .push_reply(&[0x00, 0x03, 0x00, 0x01, 0, 0, 0, 0]);
        assert!(link.was_error_from_missing_firmware());
        // The probe used the transport's most patient timeout.
        let (retry, timeout) = *link.transport().meta.last().unwrap();
        assert!(retry);
        assert_eq!(timeout, link.transport().max_timeout());
    }

    #[test]
    fn test_missing_firmware_false_when_ram_firmware_reports() {
        let mut link = link(Target::Rcx2);
        link.sync().unwrap();
        link.transport_mut()
            .push_reply(&[0x00, 0x03, 0x00, 0x01, 0x00, 0x03, 0x03, 0x02]);
        assert!(!link.was_error_from_missing_firmware());
    }

    #[test]
    fn test_missing_firmware_false_for_rom_targets() {
        let mut scout = link(Target::Scout);
        scout.sync().unwrap();
        assert!(!scout.was_error_from_missing_firmware());
    }

    #[test]
    fn test_missing_firmware_false_when_never_synced() {
        let mut rcx = link(Target::Rcx2);
        assert!(!rcx.was_error_from_missing_firmware());
        // No probe was even sent.
        assert!(rcx.transport().sent.is_empty());
    }

    #[test]
    fn test_spybotics_open_tweak_disables_ping() {
        let mut link = link(Target::Spybotics);
        link.apply_open_tweaks().unwrap();
        assert_eq!(
            link.transport().sent[0],
            [opcode::SET_SOURCE_VALUE, SPYBOT_PING_CTRL, 1, 2, 0]
        );
    }

    #[test]
    fn test_reply_accessors_track_last_send() {
        let mut link = link(Target::Rcx2);
        link.transport_mut().push_reply(&[0x11, 0x22]);
        let n = link.send(&Cmd::battery_level()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(link.reply_bytes(), [0x11, 0x22]);
        assert_eq!(link.reply_byte(1), 0x22);
    }
}
