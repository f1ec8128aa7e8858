pub mod apdu;
pub mod control_point;
pub mod crypto;
pub mod ecp;
pub mod engine;
pub mod finish;

pub use apdu::{CommandApdu, IsoDepTag, ResponseApdu, TransportError};
pub use control_point::{
    DeviceCredentialRequest, DeviceCredentialResponse, Operation, OperationStatus, ReaderKeyRequest, ReaderKeyResponse,
    TlvError,
};
pub use ecp::{Ecp, EcpError, EcpHomeFrame};
pub use engine::{Engine, EphemeralKeySource, ProtocolError, TransactionFlow, TransactionResult};
pub use finish::{HardwareFinishResponse, SupportedConfigurationResponse};
