#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("lock with serial {0} could not be found")]
    NotFound(u32),
    #[error("required GATT characteristic not found: {0}")]
    CharacteristicMissing(&'static str),
    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}
