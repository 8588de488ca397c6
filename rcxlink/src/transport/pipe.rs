//! Pipe-backed transport.
//!
//! A [`Pipe`] is a raw byte conduit (serial port, tower device node, TCP
//! socket). [`PipeTransport`] layers the exchange discipline on top: write
//! the command, collect the expected reply against a deadline, verify the
//! opcode echo, and retry a bounded number of times.

use crate::error::{Error, Result};
use crate::target::Target;
use crate::transport::Transport;
use log::{trace, warn};
use std::time::{Duration, Instant};

/// Sync preamble written ahead of each command unless omitted.
const SYNC_PREAMBLE: [u8; 3] = [0x55, 0xff, 0x00];

/// Attempts per send when retrying is allowed.
const SEND_ATTEMPTS: usize = 3;

/// The longest timeout the pipe transports honor.
pub const MAX_TIMEOUT: Duration = Duration::from_millis(3000);

/// Log a hex dump of wire traffic at trace level.
fn dump(direction: &str, bytes: &[u8]) {
    if log::log_enabled!(log::Level::Trace) {
        let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
        trace!("{direction} [{}]", hex.join(" "));
    }
}

/// Raw byte conduit under a [`PipeTransport`].
pub trait Pipe: Send {
    /// Open the named device. Empty name selects [`Pipe::default_device`].
    fn open(&mut self, device: &str) -> Result<()>;

    /// Close the device. Idempotent.
    fn close(&mut self);

    /// Write all of `data`.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    /// Returns 0 when the timeout expires with nothing received.
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Discard any pending input.
    fn drain(&mut self);

    /// Compiled-in default device name.
    fn default_device(&self) -> &str;

    /// Whether the pipe can double its line rate.
    fn supports_fast_mode(&self) -> bool {
        false
    }

    /// Whether the doubled rate keeps odd line parity.
    fn fast_mode_odd_parity(&self) -> bool {
        false
    }

    /// Switch the line rate.
    fn set_fast_mode(&mut self, _fast: bool) -> Result<()> {
        Ok(())
    }
}

/// [`Transport`] implementation over a boxed [`Pipe`].
pub struct PipeTransport {
    pipe: Box<dyn Pipe>,
    omit_header: bool,
    fast: bool,
}

impl PipeTransport {
    /// Wrap a pipe.
    pub fn new(pipe: Box<dyn Pipe>) -> Self {
        Self {
            pipe,
            omit_header: false,
            fast: false,
        }
    }

    /// Collect up to `expected` bytes into `reply` against a deadline and
    /// strip the opcode echo from the count.
    fn receive(
        &mut self,
        opcode: u8,
        reply: &mut [u8],
        expected: usize,
        timeout: Duration,
    ) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut got = 0;

        while got < expected {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let n = self
                .pipe
                .read_bytes(&mut reply[got..expected], deadline - now)?;
            if n == 0 {
                break;
            }
            got += n;
        }

        if got == 0 {
            return Err(Error::Timeout(format!(
                "no reply to opcode 0x{opcode:02x}"
            )));
        }
        if reply[0] != !opcode {
            return Err(Error::Reply(format!(
                "bad opcode echo 0x{:02x} for 0x{opcode:02x}",
                reply[0]
            )));
        }

        dump("rx", &reply[..got]);
        Ok(got - 1)
    }
}

impl Transport for PipeTransport {
    fn open(&mut self, target: Target, device: &str) -> Result<()> {
        let device = if device.is_empty() {
            self.pipe.default_device().to_string()
        } else {
            device.to_string()
        };
        trace!("opening {device} for {target}");
        self.pipe.open(&device)
    }

    fn close(&mut self) {
        self.pipe.close();
    }

    fn set_omit_header(&mut self, omit: bool) {
        self.omit_header = omit;
    }

    fn send(
        &mut self,
        cmd: &[u8],
        reply: &mut [u8],
        expected: usize,
        retry: bool,
        timeout: Duration,
    ) -> Result<usize> {
        let attempts = if retry { SEND_ATTEMPTS } else { 1 };
        let mut last = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                warn!("resending opcode 0x{:02x} (attempt {attempt}/{attempts})", cmd[0]);
                self.pipe.drain();
            }

            if !self.omit_header {
                self.pipe.write_bytes(&SYNC_PREAMBLE)?;
            }
            dump("tx", cmd);
            self.pipe.write_bytes(cmd)?;

            if expected == 0 {
                return Ok(0);
            }

            match self.receive(cmd[0], reply, expected, timeout) {
                Ok(n) => return Ok(n),
                Err(e) => last = Some(e),
            }
        }

        Err(last.unwrap_or_else(|| Error::Timeout("send: no attempts".into())))
    }

    fn fast_mode_supported(&self) -> bool {
        self.pipe.supports_fast_mode()
    }

    fn fast_mode_odd_parity(&self) -> bool {
        self.pipe.fast_mode_odd_parity()
    }

    fn set_fast_mode(&mut self, fast: bool) -> Result<()> {
        self.pipe.set_fast_mode(fast)?;
        self.fast = fast;
        Ok(())
    }

    fn fast_mode(&self) -> bool {
        self.fast
    }

    fn complement_data(&self) -> bool {
        // Complement stuffing self-clocks the receiver at the normal rate;
        // fast mode drops it to halve the traffic.
        !self.fast
    }

    fn max_timeout(&self) -> Duration {
        MAX_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use std::sync::{Arc, Mutex};

    /// In-memory pipe: records writes, serves scripted reads.
    struct LoopbackPipe {
        written: Arc<Mutex<Vec<u8>>>,
        reads: VecDeque<Vec<u8>>,
    }

    impl LoopbackPipe {
        fn new() -> Self {
            Self {
                written: Arc::new(Mutex::new(Vec::new())),
                reads: VecDeque::new(),
            }
        }
    }

    impl Pipe for LoopbackPipe {
        fn open(&mut self, _device: &str) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn read_bytes(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            match self.reads.pop_front() {
                Some(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn drain(&mut self) {}

        fn default_device(&self) -> &str {
            "loopback0"
        }
    }

    fn transport_with(reads: &[&[u8]]) -> PipeTransport {
        let mut pipe = LoopbackPipe::new();
        for r in reads {
            pipe.reads.push_back(r.to_vec());
        }
        PipeTransport::new(Box::new(pipe))
    }

    #[test]
    fn test_send_prepends_preamble() {
        let mut pipe = LoopbackPipe::new();
        pipe.reads.push_back(vec![!0x10u8]);
        let written = Arc::clone(&pipe.written);

        let mut t = PipeTransport::new(Box::new(pipe));
        let mut reply = [0u8; 8];
        let n = t
            .send(&[0x10], &mut reply, 1, false, Duration::from_millis(50))
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(*written.lock().unwrap(), [0x55, 0xff, 0x00, 0x10]);
    }

    #[test]
    fn test_omit_header_drops_preamble() {
        let mut pipe = LoopbackPipe::new();
        pipe.reads.push_back(vec![!0x10u8]);
        let written = Arc::clone(&pipe.written);

        let mut t = PipeTransport::new(Box::new(pipe));
        t.set_omit_header(true);
        let mut reply = [0u8; 8];
        t.send(&[0x10], &mut reply, 1, false, Duration::from_millis(50))
            .unwrap();
        assert_eq!(*written.lock().unwrap(), [0x10]);
    }

    #[test]
    fn test_reply_split_across_reads() {
        let mut t = transport_with(&[&[!0x15u8, 1, 2], &[3, 4, 5, 6, 7, 8]]);
        let mut reply = [0u8; 16];
        let n = t
            .send(
                &[0x15, 1, 3, 5, 7, 0x0b],
                &mut reply,
                9,
                false,
                Duration::from_millis(50),
            )
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(&reply[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_partial_reply_is_reported_short() {
        let mut t = transport_with(&[&[!0x15u8, 1, 2, 3]]);
        let mut reply = [0u8; 16];
        let n = t
            .send(
                &[0x15, 1, 3, 5, 7, 0x0b],
                &mut reply,
                9,
                false,
                Duration::from_millis(10),
            )
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn test_no_reply_times_out() {
        let mut t = transport_with(&[]);
        let mut reply = [0u8; 8];
        let err = t
            .send(&[0x10], &mut reply, 1, false, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_bad_echo_is_rejected() {
        let mut t = transport_with(&[&[0x42u8]]);
        let mut reply = [0u8; 8];
        let err = t
            .send(&[0x10], &mut reply, 1, false, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, Error::Reply(_)));
    }

    #[test]
    fn test_retry_consumes_later_scripted_reads() {
        // First attempt gets garbage, second a good echo.
        let mut t = transport_with(&[&[0x42u8], &[!0x10u8]]);
        let mut reply = [0u8; 8];
        let n = t
            .send(&[0x10], &mut reply, 1, true, Duration::from_millis(10))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_unawaited_reply_returns_immediately() {
        let mut t = transport_with(&[]);
        let mut reply = [0u8; 8];
        let n = t
            .send(
                &[0x63, 0x3a, 0x01],
                &mut reply,
                0,
                true,
                Duration::from_millis(10),
            )
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_fast_mode_disables_complement() {
        let mut t = transport_with(&[]);
        assert!(t.complement_data());
        t.set_fast_mode(true).unwrap();
        assert!(t.fast_mode());
        assert!(!t.complement_data());
        t.set_fast_mode(false).unwrap();
        assert!(t.complement_data());
    }
}
