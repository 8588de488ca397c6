//! Transport abstraction for the byte pipe under the link.
//!
//! The link layer is transport-agnostic: it hands a command to a
//! [`Transport`], tells it how many reply bytes to await, and gets back
//! the reply payload length. Three pipe-backed variants exist:
//!
//! - **Serial tower** via the `serialport` crate (the default),
//! - **USB tower** via the kernel tower device node,
//! - **TCP tunnel** for remoted towers (feature `tcp`).
//!
//! Selection is by device-URL prefix: `usb:`, `tcp:`, or `serial:`
//! (case-insensitive; no prefix means serial). An empty name after the
//! colon selects the pipe's compiled-in default device.

pub mod pipe;
pub mod serial;
#[cfg(feature = "tcp")]
pub mod tcp;
pub mod usb;

pub use pipe::{Pipe, PipeTransport};

use crate::error::Result;
use crate::target::Target;
use std::time::Duration;

/// Environment variable naming the default device URL.
pub const PORT_ENV: &str = "RCX_PORT";

/// Per-user device configuration file, relative to `$HOME`.
#[cfg(unix)]
const USER_CONF_FILE: &str = ".rcx/device.conf";

/// System-wide device configuration file.
#[cfg(unix)]
const ETC_CONF_FILE: &str = "/etc/rcx/device.conf";

/// Byte pipe under the link layer.
///
/// A transport owns one open device session. `send` is the only exchange
/// primitive: it writes a command and collects the expected reply within
/// the timeout, retrying internally when `retry` is set.
pub trait Transport {
    /// Open the device. An empty name selects the transport's default.
    fn open(&mut self, target: Target, device: &str) -> Result<()>;

    /// Close the device. Idempotent.
    fn close(&mut self);

    /// Suppress the sync preamble in front of each command.
    fn set_omit_header(&mut self, omit: bool);

    /// Send `cmd` and await `expected` reply bytes (echo included) into
    /// `reply`. Returns the reply payload length, which excludes the echo
    /// byte and may be 0. `expected == 0` means no reply is awaited.
    fn send(
        &mut self,
        cmd: &[u8],
        reply: &mut [u8],
        expected: usize,
        retry: bool,
        timeout: Duration,
    ) -> Result<usize>;

    /// Whether this transport can switch to fast mode.
    fn fast_mode_supported(&self) -> bool;

    /// Whether this transport's fast mode keeps odd line parity.
    fn fast_mode_odd_parity(&self) -> bool;

    /// Enter or leave fast mode.
    fn set_fast_mode(&mut self, fast: bool) -> Result<()>;

    /// Whether fast mode is currently active.
    fn fast_mode(&self) -> bool;

    /// Whether complement-byte stuffing is in effect. When it is, outgoing
    /// payloads need no shaping.
    fn complement_data(&self) -> bool;

    /// The longest timeout the transport honors; used for the final
    /// exchange of a firmware transfer.
    fn max_timeout(&self) -> Duration;
}

/// Match a case-insensitive `prefix` at the start of `s`, requiring it to
/// be terminated by `:` (consumed) or the end of the string. Returns the
/// remainder on a match.
pub(crate) fn check_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = s
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &s[prefix.len()..])?;
    match rest.as_bytes().first() {
        Some(b':') => Some(&rest[1..]),
        None => Some(rest),
        Some(_) => None,
    }
}

/// Construct the tunnel pipe, when compiled in.
#[cfg(feature = "tcp")]
pub(crate) fn tcp_pipe() -> Result<Box<dyn Pipe>> {
    Ok(Box::new(tcp::TcpPipe::new()))
}

/// Construct the tunnel pipe. This build has no tunnel support.
#[cfg(not(feature = "tcp"))]
pub(crate) fn tcp_pipe() -> Result<Box<dyn Pipe>> {
    Err(crate::error::Error::TcpUnsupported)
}

/// First whitespace-delimited token of a configuration file body.
fn first_token(contents: &str) -> Option<&str> {
    contents.split_whitespace().next()
}

/// Resolve the device URL: explicit name, then `RCX_PORT`, then the user
/// and system configuration files. `None` means "use the compiled-in
/// default device".
pub(crate) fn resolve_device_url(explicit: Option<&str>) -> Option<String> {
    if let Some(name) = explicit {
        return Some(name.to_string());
    }

    if let Ok(name) = std::env::var(PORT_ENV) {
        if !name.is_empty() {
            return Some(name);
        }
    }

    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            let path = std::path::Path::new(&home).join(USER_CONF_FILE);
            if let Ok(contents) = std::fs::read_to_string(path) {
                if let Some(token) = first_token(&contents) {
                    return Some(token.to_string());
                }
            }
        }

        if let Ok(contents) = std::fs::read_to_string(ETC_CONF_FILE) {
            if let Some(token) = first_token(&contents) {
                return Some(token.to_string());
            }
        }
    }

    None
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_prefix_matches_case_insensitively() {
        assert_eq!(check_prefix("usb:lego0", "usb"), Some("lego0"));
        assert_eq!(check_prefix("USB:lego0", "usb"), Some("lego0"));
        assert_eq!(check_prefix("Tcp:host:4000", "tcp"), Some("host:4000"));
    }

    #[test]
    fn test_check_prefix_allows_empty_device() {
        assert_eq!(check_prefix("usb:", "usb"), Some(""));
        assert_eq!(check_prefix("usb", "usb"), Some(""));
    }

    #[test]
    fn test_check_prefix_rejects_non_prefixes() {
        assert_eq!(check_prefix("/dev/ttyS0", "usb"), None);
        assert_eq!(check_prefix("usbextra:x", "usb"), None);
        assert_eq!(check_prefix("us", "usb"), None);
    }

    #[test]
    fn test_first_token() {
        assert_eq!(first_token("/dev/ttyUSB0\n"), Some("/dev/ttyUSB0"));
        assert_eq!(first_token("  usb:  trailing junk"), Some("usb:"));
        assert_eq!(first_token(" \n\t "), None);
    }

    #[test]
    fn test_explicit_name_wins() {
        assert_eq!(
            resolve_device_url(Some("tcp:somewhere")).as_deref(),
            Some("tcp:somewhere")
        );
    }
}
