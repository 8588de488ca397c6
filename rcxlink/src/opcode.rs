//! Opcode constants and the expected-reply-length table.
//!
//! Every request starts with an opcode byte. Bit 3 (`0x08`) of the opcode
//! is a sequence toggle the interpreter alternates between consecutive
//! commands; it never changes the command's meaning, so classification
//! masks it off first.
//!
//! The reply to a command always starts with the bitwise complement of the
//! opcode as sent, followed by the payload. [`expected_reply_length`]
//! returns the full byte count the transport must await, echo included.

use crate::target::Target;

/// Bit 3 is a toggle/sequence flag; mask it off before classifying.
pub const OPCODE_MASK: u8 = 0xf7;

/// Wake-up ping ("alive").
pub const PING: u8 = 0x10;
/// Read a typed source/value pair.
pub const READ: u8 = 0x12;
/// Query ROM and firmware version numbers.
pub const GET_VERSIONS: u8 = 0x15;
/// Upload the memory map.
pub const MEM_MAP: u8 = 0x20;
/// Begin a task chunk download.
pub const BEGIN_TASK: u8 = 0x25;
/// Query the battery level in millivolts.
pub const BATTERY_LEVEL: u8 = 0x30;
/// Begin a subroutine chunk download.
pub const BEGIN_SUB: u8 = 0x35;
/// Delete all tasks in the selected program slot.
pub const DELETE_TASKS: u8 = 0x40;
/// One sequenced frame of a chunked download.
pub const DOWNLOAD: u8 = 0x45;
/// Stop all running tasks.
pub const STOP_ALL: u8 = 0x50;
/// Play one of the built-in sounds.
pub const PLAY_SOUND: u8 = 0x51;
/// CyberMaster unlock.
pub const UNLOCK_CM: u8 = 0x5d;
/// Spybotics EEPROM upload.
pub const UPLOAD_EEPROM: u8 = 0x61;
/// Scout memory poll.
pub const POLL_MEMORY: u8 = 0x63;
/// Delete the resident firmware (requires the shibboleth payload).
pub const DELETE_FIRMWARE: u8 = 0x65;
/// Delete all subroutines in the selected program slot.
pub const DELETE_SUBS: u8 = 0x70;
/// Begin a firmware download (start address + checksum).
pub const BEGIN_FIRMWARE: u8 = 0x75;
/// Select the active program slot.
pub const SELECT_PROGRAM: u8 = 0x91;
/// Upload datalog entries.
pub const UPLOAD_DATALOG: u8 = 0xa4;
/// Firmware unlock (keyphrase payload).
pub const UNLOCK: u8 = 0xa5;
/// Set a typed destination from a typed source.
pub const SET_SOURCE_VALUE: u8 = 0x05;

/// Expected reply length for a command, in bytes, echo byte included.
///
/// Depends only on the masked opcode, the target, and (for
/// [`POLL_MEMORY`] / [`UPLOAD_DATALOG`]) the command length and one or two
/// parameter bytes. A return of 0 means no reply is awaited at all.
#[must_use]
pub fn expected_reply_length(cmd: &[u8], target: Target) -> usize {
    match cmd[0] & OPCODE_MASK {
        BEGIN_TASK | BEGIN_SUB | DOWNLOAD | BEGIN_FIRMWARE => 2,
        BATTERY_LEVEL | READ => 3,
        GET_VERSIONS => 9,
        UPLOAD_EEPROM => {
            if target == Target::CyberMaster {
                1
            } else {
                17
            }
        }
        UNLOCK => 26,
        MEM_MAP => {
            if target == Target::CyberMaster {
                21
            } else {
                189
            }
        }
        POLL_MEMORY => {
            if cmd.len() != 4 {
                return 0;
            }
            cmd[3] as usize + 1
        }
        UPLOAD_DATALOG => {
            if cmd.len() != 5 {
                return 0;
            }
            (cmd[3] as usize + ((cmd[4] as usize) << 8)) * 3 + 1
        }
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_classes() {
        let t = Target::Rcx2;
        assert_eq!(expected_reply_length(&[BEGIN_TASK], t), 2);
        assert_eq!(expected_reply_length(&[BEGIN_SUB], t), 2);
        assert_eq!(expected_reply_length(&[DOWNLOAD], t), 2);
        assert_eq!(expected_reply_length(&[BEGIN_FIRMWARE], t), 2);
        assert_eq!(expected_reply_length(&[BATTERY_LEVEL], t), 3);
        assert_eq!(expected_reply_length(&[READ], t), 3);
        assert_eq!(expected_reply_length(&[GET_VERSIONS], t), 9);
        assert_eq!(expected_reply_length(&[UNLOCK], t), 26);
    }

    #[test]
    fn test_default_class_is_one() {
        let t = Target::Rcx2;
        assert_eq!(expected_reply_length(&[PING], t), 1);
        assert_eq!(expected_reply_length(&[STOP_ALL], t), 1);
        assert_eq!(expected_reply_length(&[PLAY_SOUND, 5], t), 1);
        assert_eq!(expected_reply_length(&[SELECT_PROGRAM, 1], t), 1);
    }

    #[test]
    fn test_toggle_bit_is_masked() {
        let t = Target::Rcx2;
        for op in [BEGIN_TASK, DOWNLOAD, GET_VERSIONS, UNLOCK, BATTERY_LEVEL] {
            assert_eq!(
                expected_reply_length(&[op | 0x08], t),
                expected_reply_length(&[op], t),
                "toggle bit changed classification of 0x{op:02x}"
            );
        }
    }

    #[test]
    fn test_target_overrides() {
        assert_eq!(
            expected_reply_length(&[UPLOAD_EEPROM], Target::CyberMaster),
            1
        );
        assert_eq!(expected_reply_length(&[UPLOAD_EEPROM], Target::Spybotics), 17);
        assert_eq!(expected_reply_length(&[MEM_MAP], Target::CyberMaster), 21);
        assert_eq!(expected_reply_length(&[MEM_MAP], Target::Rcx), 189);
    }

    #[test]
    fn test_poll_memory_length_guard() {
        let t = Target::Scout;
        // Malformed poll: no reply awaited.
        assert_eq!(expected_reply_length(&[POLL_MEMORY, 0x3a, 0x01], t), 0);
        assert_eq!(expected_reply_length(&[POLL_MEMORY], t), 0);
        // Well-formed poll: count + echo.
        assert_eq!(
            expected_reply_length(&[POLL_MEMORY, 0x3a, 0x01, 0x01], t),
            2
        );
        assert_eq!(
            expected_reply_length(&[POLL_MEMORY, 0x00, 0x00, 0x10], t),
            17
        );
    }

    #[test]
    fn test_upload_datalog_entry_count() {
        let t = Target::Rcx2;
        assert_eq!(expected_reply_length(&[UPLOAD_DATALOG, 0, 0], t), 0);
        // 5 entries of 3 bytes each, plus the echo.
        assert_eq!(
            expected_reply_length(&[UPLOAD_DATALOG, 0, 0, 5, 0], t),
            16
        );
        // High count byte contributes << 8.
        assert_eq!(
            expected_reply_length(&[UPLOAD_DATALOG, 0, 0, 0, 1], t),
            256 * 3 + 1
        );
    }

    #[test]
    fn test_table_bounds() {
        // Every fixed class stays within the largest reply the protocol
        // defines (the 189-byte memory map).
        for op in 0u8..=255 {
            let n = expected_reply_length(&[op], Target::Rcx2);
            assert!(n <= 189, "opcode 0x{op:02x} expects {n}");
        }
    }
}
