use thiserror::Error;

/// Errors raised while translating a CPU-visible address into a backing
/// store slot. These never abort emulation by themselves; callers turn
/// them into a `StopReason::Fault` so that a single bad access doesn't
/// take down a `run()` loop that a fuzzer is driving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {address:#06x} is outside of {space}")]
    InvalidAddress { space: &'static str, address: u32 },
}

/// Errors surfaced by the emulator facade itself, as opposed to faults
/// that occur mid-instruction (those become `StopReason::Fault`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("firmware image is {len} bytes, which does not fit in a {capacity}-byte CODE space")]
    FirmwareTooLarge { len: usize, capacity: usize },
    #[error("firmware image is empty")]
    FirmwareTooSmall,
    #[error("emulator has not been initialized with load_firmware()")]
    NotInitialized,
    #[error("memory access fault: {0}")]
    Memory(#[from] MemoryError),
}
