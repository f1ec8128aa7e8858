//! Apple Enhanced Contactless Polling "home" broadcast frame (spec.md §4.3).
//!
//! Prepended to a 14443-A sense by the NFC polling loop (spec.md §4.4) to prompt
//! the device to present its HomeKey applet.

/// General ECP opcode.
const OPCODE: u8 = 0x6A;
/// HomeKey ECP subtype ("home").
const SUBTYPE_HOME: u8 = 0x02;
/// Bit 2 of the flags octet carries the caller-supplied `flag2` (the original's
/// "express"/`flag_2` setting).
const FLAG2_BIT: u8 = 0b0000_0100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EcpError {
    #[error("frame too short to be an ECP broadcast")]
    TooShort,
    #[error("unexpected opcode {0:#04x}")]
    WrongOpcode(u8),
    #[error("unexpected subtype {0:#04x}")]
    WrongSubtype(u8),
    #[error("length prefix {declared} does not match remaining payload of {actual} bytes")]
    LengthMismatch { declared: u8, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcpHomeFrame {
    pub group_id: [u8; 8],
    pub flag2: bool,
}

pub struct Ecp;

impl Ecp {
    /// Build the "home" broadcast: `[opcode, subtype, len, group_id(8), flags]`.
    pub fn home(group_id: [u8; 8], flag2: bool) -> Vec<u8> {
        let mut flags = 0u8;
        if flag2 {
            flags |= FLAG2_BIT;
        }

        let mut payload = Vec::with_capacity(9);
        payload.extend_from_slice(&group_id);
        payload.push(flags);

        let mut frame = vec![OPCODE, SUBTYPE_HOME, payload.len() as u8];
        frame.extend_from_slice(&payload);
        frame
    }

    /// Parse a frame built by [`Ecp::home`], recovering the group id and `flag2` bit.
    pub fn parse(frame: &[u8]) -> Result<EcpHomeFrame, EcpError> {
        if frame.len() < 3 {
            return Err(EcpError::TooShort);
        }
        if frame[0] != OPCODE {
            return Err(EcpError::WrongOpcode(frame[0]));
        }
        if frame[1] != SUBTYPE_HOME {
            return Err(EcpError::WrongSubtype(frame[1]));
        }

        let declared_len = frame[2];
        let payload = &frame[3..];
        if payload.len() != declared_len as usize {
            return Err(EcpError::LengthMismatch { declared: declared_len, actual: payload.len() });
        }
        if payload.len() < 9 {
            return Err(EcpError::TooShort);
        }

        let mut group_id = [0u8; 8];
        group_id.copy_from_slice(&payload[..8]);
        let flag2 = payload[8] & FLAG2_BIT != 0;

        Ok(EcpHomeFrame { group_id, flag2 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_group_id_and_flag() {
        let group_id = [0xAB; 8];
        for flag2 in [true, false] {
            let frame = Ecp::home(group_id, flag2);
            let parsed = Ecp::parse(&frame).unwrap();
            assert_eq!(parsed.group_id, group_id);
            assert_eq!(parsed.flag2, flag2);
        }
    }

    #[test]
    fn rejects_truncated_frame() {
        assert_eq!(Ecp::parse(&[OPCODE, SUBTYPE_HOME]), Err(EcpError::TooShort));
    }

    #[test]
    fn rejects_wrong_opcode() {
        let mut frame = Ecp::home([0; 8], false);
        frame[0] = 0x00;
        assert_eq!(Ecp::parse(&frame), Err(EcpError::WrongOpcode(0x00)));
    }
}
