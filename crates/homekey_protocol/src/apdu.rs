//! Command/response APDU framing over an activated ISO-DEP (14443-4) tag
//! (spec.md §4.2).

use async_trait::async_trait;

/// A contactless front-end that has activated a target into ISO-DEP and can carry
/// application APDUs over it. Radio-level sensing and activation (spec.md §4.4)
/// live one level up, in `homekey_nfc`; this trait is the minimal surface the
/// HomeKey engine needs.
#[async_trait]
pub trait IsoDepTag: Send + Sync {
    async fn transceive(&self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error communicating with the contactless front-end: {0}")]
    Io(String),
    #[error("operation timed out")]
    Timeout,
    #[error("tag left the field")]
    TagLost,
}

/// Status word appended to every APDU response; `0x9000` is success.
pub const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// `Le`, the expected response length. `0x00` requests "as much as available"
    /// under the extended-length convention this protocol uses throughout.
    pub le: u8,
}

impl CommandApdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        CommandApdu { cla, ins, p1, p2, data, le: 0x00 }
    }

    /// Encode as `CLA INS P1 P2 Lc <data> Le`, omitting `Lc`/data when empty.
    /// `Lc`/`Le` are extended (3-octet, `00 xx xx`) whenever the payload or the
    /// expected response would not fit in one octet, preserving the
    /// Le/extended-length semantics the HomeKey protocol requires (spec.md §4.2).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.cla, self.ins, self.p1, self.p2];
        let extended = self.data.len() > 255;

        if !self.data.is_empty() {
            if extended {
                out.push(0x00);
                out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
            } else {
                out.push(self.data.len() as u8);
            }
            out.extend_from_slice(&self.data);
        }

        if extended {
            out.extend_from_slice(&[0x00, 0x00]);
        } else {
            out.push(self.le);
        }

        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ResponseApdu {
    pub fn parse(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < 2 {
            return Err(TransportError::Io("response shorter than status word".into()));
        }
        let (data, sw) = bytes.split_at(bytes.len() - 2);
        Ok(ResponseApdu { data: data.to_vec(), sw1: sw[0], sw2: sw[1] })
    }

    pub fn is_success(&self) -> bool {
        [self.sw1, self.sw2] == SW_SUCCESS
    }
}

/// Send a command and require a `0x9000` status, returning the response data.
pub async fn transceive_ok(tag: &dyn IsoDepTag, command: &CommandApdu) -> Result<Vec<u8>, TransportError> {
    let raw = tag.transceive(&command.encode()).await?;
    let response = ResponseApdu::parse(&raw)?;
    if !response.is_success() {
        return Err(TransportError::Io(format!("unexpected status word {:02X}{:02X}", response.sw1, response.sw2)));
    }
    Ok(response.data)
}
