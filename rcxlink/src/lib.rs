//! # rcxlink
//!
//! Host-side link driver for the LEGO programmable brick family: the
//! original RCX, RCX2, Scout, CyberMaster, Swan, and Spybotics.
//!
//! The crate implements the command/reply protocol that rides over the IR
//! tower transports (serial, USB, or a TCP tunnel), including:
//!
//! - Request framing with per-opcode expected-reply-length inference
//! - The per-target wake/unlock handshake
//! - Chunked program, Spybotics, and firmware downloads with progress
//!   reporting and abort
//! - Fast-mode firmware transfers bootstrapped by an embedded RAM stub
//! - Adaptive shortening of outgoing chunks that would otherwise
//!   desynchronize the IR line
//!
//! Program images are supplied by the caller; compiling and linking them
//! is a separate concern, as is the CLI.
//!
//! ## Device URLs
//!
//! A device is named by an optional case-insensitive transport prefix
//! (`usb:`, `tcp:`, `serial:`) and a device name; no prefix means serial
//! and an empty name selects the transport's default device. With no URL
//! at all, resolution falls back to the `RCX_PORT` environment variable,
//! then `$HOME/.rcx/device.conf`, then `/etc/rcx/device.conf`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rcxlink::{Link, LinkOptions, Target};
//!
//! fn main() -> rcxlink::Result<()> {
//!     let mut link = Link::open(Target::Rcx2, Some("usb:"), LinkOptions::default())?;
//!     let (rom, firmware) = link.version()?;
//!     println!("rom {rom:08x}, firmware {firmware:08x}");
//!
//!     let image = std::fs::read("firm0332.lgo")?;
//!     link.download_firmware(&image, 0x8000, false, &mut |so_far, total, _| {
//!         println!("{so_far}/{total}");
//!         true
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! A [`Link`] is not safe for concurrent use; all exchanges on it are
//! strictly sequential.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cmd;
pub mod error;
pub mod image;
pub mod link;
pub mod nub;
pub mod opcode;
pub mod shaper;
pub mod target;
pub mod transport;

pub use {
    cmd::{Cmd, RcxValue},
    error::{Error, Result},
    image::{Chunk, ChunkKind, Image},
    link::{Link, LinkOptions},
    shaper::Shaper,
    target::Target,
    transport::{Pipe, PipeTransport, Transport},
};
