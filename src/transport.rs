/// Trait for reader communication backends.
/// Implement this trait for different transports (UART, serial port, etc.)
///
/// Opening the port is the job of each implementation's constructor, and
/// dropping it closes the port. Transports must be `Send` because the
/// inventory worker reads from its own thread.
pub trait RfidTransport: Send {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Write data to the transport, returning how many bytes were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read data from the transport with a timeout in milliseconds.
    ///
    /// Returns `Ok(0)` when nothing arrived before the timeout.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Discard anything waiting in the input buffer
    fn flush_input(&mut self) -> Result<(), Self::Error>;
}
