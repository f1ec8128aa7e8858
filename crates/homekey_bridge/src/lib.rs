mod bridge;
mod client;
mod error;
mod manager;
mod oracle;
mod registry;

pub use bridge::BridgeError;
pub use bridge::LockActivationBridge;
pub use client::BleSession;
pub use error::BleError;
pub use manager::SessionManager;
pub use oracle::BleInstruction;
pub use oracle::BluetoothConnectionRequest;
pub use oracle::OracleClient;
pub use oracle::OracleError;
pub use registry::DeviceRegistry;
