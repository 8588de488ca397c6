//! Request construction.
//!
//! A [`Cmd`] is the byte body of one command: the opcode followed by its
//! parameters. The link layer only ever inspects the opcode (and, for a
//! couple of opcodes, a parameter byte or two) to size the reply; the rest
//! of the body is opaque to it.
//!
//! ## Download frame format
//!
//! ```text
//! +--------+---------+---------+--------------+------+
//! | 0x45   | seq     | length  |    data      | sum  |
//! +--------+---------+---------+--------------+------+
//! | 1      | 2 (LE)  | 2 (LE)  |   variable   | 1    |
//! +--------+---------+---------+--------------+------+
//! ```
//!
//! The trailing byte is the additive checksum of the data bytes. The final
//! frame of a transfer carries sequence 0.

use crate::image::ChunkKind;
use crate::opcode;
use byteorder::{LittleEndian, WriteBytesExt};

/// Keyphrase the firmware unlock command must carry.
const UNLOCK_KEYPHRASE: &[u8] = b"Do you byte, when I knock?";

/// Shibboleth parameter bytes for the destructive firmware commands and
/// the version query.
const KEY_BYTES: [u8; 5] = [1, 3, 5, 7, 0x0b];

/// A typed source/value pair, as used by read and set commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcxValue {
    /// Source type (variable, sensor, register bank, ...).
    pub kind: u8,
    /// Value or index within the source.
    pub data: i16,
}

impl RcxValue {
    /// Create a new typed value.
    #[must_use]
    pub fn new(kind: u8, data: i16) -> Self {
        Self { kind, data }
    }
}

/// One command body, ready for the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    body: Vec<u8>,
}

impl Cmd {
    /// Create a command from an opcode and its parameter bytes.
    pub fn new(op: u8, args: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + args.len());
        body.push(op);
        body.extend_from_slice(args);
        Self { body }
    }

    /// The raw command bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The opcode byte.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.body[0]
    }

    /// Command length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the command body is empty (never true for built commands).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Wake-up ping.
    pub fn ping() -> Self {
        Self::new(opcode::PING, &[])
    }

    /// Query ROM and firmware versions.
    pub fn versions() -> Self {
        Self::new(opcode::GET_VERSIONS, &KEY_BYTES)
    }

    /// Firmware unlock. The keyphrase is required verbatim.
    pub fn unlock() -> Self {
        Self::new(opcode::UNLOCK, UNLOCK_KEYPHRASE)
    }

    /// CyberMaster unlock.
    pub fn unlock_cm() -> Self {
        Self::new(opcode::UNLOCK_CM, &[])
    }

    /// Stop all running tasks.
    pub fn stop_all() -> Self {
        Self::new(opcode::STOP_ALL, &[])
    }

    /// Delete all tasks in the selected program slot.
    pub fn delete_tasks() -> Self {
        Self::new(opcode::DELETE_TASKS, &[])
    }

    /// Delete all subroutines in the selected program slot.
    pub fn delete_subs() -> Self {
        Self::new(opcode::DELETE_SUBS, &[])
    }

    /// Delete the resident firmware. The target only accepts the command
    /// with the shibboleth parameter bytes.
    pub fn delete_firmware() -> Self {
        Self::new(opcode::DELETE_FIRMWARE, &KEY_BYTES)
    }

    /// Select the active program slot (0-based on the wire).
    pub fn select_program(slot: u8) -> Self {
        Self::new(opcode::SELECT_PROGRAM, &[slot])
    }

    /// Play one of the built-in sounds.
    pub fn play_sound(sound: u8) -> Self {
        Self::new(opcode::PLAY_SOUND, &[sound])
    }

    /// Query the battery level.
    pub fn battery_level() -> Self {
        Self::new(opcode::BATTERY_LEVEL, &[])
    }

    /// Scout memory poll: `count` bytes starting at `address`.
    pub fn poll_memory(address: u16, count: u8) -> Self {
        let mut args = Vec::with_capacity(3);
        args.write_u16::<LittleEndian>(address)
            .expect("vec write");
        args.push(count);
        Self::new(opcode::POLL_MEMORY, &args)
    }

    /// Upload `count` datalog entries starting at `from`.
    pub fn upload_datalog(from: u16, count: u16) -> Self {
        let mut args = Vec::with_capacity(4);
        args.write_u16::<LittleEndian>(from).expect("vec write");
        args.write_u16::<LittleEndian>(count).expect("vec write");
        Self::new(opcode::UPLOAD_DATALOG, &args)
    }

    /// Read a typed value.
    pub fn read(value: RcxValue) -> Self {
        Self::new(opcode::READ, &[value.kind, value.data as u8])
    }

    /// Set a typed destination from a typed source.
    pub fn set(dst: RcxValue, src: RcxValue) -> Self {
        Self::new(
            opcode::SET_SOURCE_VALUE,
            &[dst.kind, dst.data as u8, src.kind, src.data as u8],
        )
    }

    /// Begin a task or subroutine chunk of `length` bytes.
    pub fn begin(kind: ChunkKind, number: u8, length: u16) -> Self {
        let mut args = Vec::with_capacity(5);
        args.push(0);
        args.push(number);
        args.push(0);
        args.write_u16::<LittleEndian>(length).expect("vec write");
        Self::new(kind.begin_opcode(), &args)
    }

    /// Begin a firmware download at `start` with the given 16-bit checksum.
    pub fn begin_firmware(start: u16, check: u16) -> Self {
        let mut args = Vec::with_capacity(5);
        args.write_u16::<LittleEndian>(start).expect("vec write");
        args.write_u16::<LittleEndian>(check).expect("vec write");
        args.push(0);
        Self::new(opcode::BEGIN_FIRMWARE, &args)
    }

    /// One sequenced download frame. The final frame of a transfer uses
    /// sequence 0.
    pub fn download(seq: u16, data: &[u8]) -> Self {
        let mut body = Vec::with_capacity(6 + data.len());
        body.push(opcode::DOWNLOAD);
        body.write_u16::<LittleEndian>(seq).expect("vec write");
        body.write_u16::<LittleEndian>(data.len() as u16)
            .expect("vec write");
        body.extend_from_slice(data);
        let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        body.push(sum);
        Self { body }
    }
}

/// Unsigned 16-bit additive checksum over a byte slice.
#[must_use]
pub fn sum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}
