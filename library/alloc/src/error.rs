/// Raised when no free block in the pool can satisfy a request
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot service request of size {requested} with {used} bytes allocated")]
pub struct MemoryError {
    /// The size of the failed request in bytes, after alignment
    pub requested: usize,
    /// The number of bytes in use at the time of the request
    pub used: usize,
}
