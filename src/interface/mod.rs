pub mod i2c;
pub use self::i2c::I2cInterface;

/// A method of communicating with the device
///
/// Every call is one complete bus transaction; the driver never
/// interleaves other traffic inside a single register access.
pub trait SensorInterface {
    /// Interface associated error type
    type InterfaceError;

    /// Read a block from a specific register
    /// `reg`: The register address to read from
    /// `auto_increment`: Whether the device should advance its internal
    /// register pointer after each byte. Must be disabled for single
    /// status/response reads and enabled for multi-byte output reads.
    /// `recv_buf`: The buffer to receive into
    fn read_block(
        &mut self,
        reg: u8,
        auto_increment: bool,
        recv_buf: &mut [u8],
    ) -> Result<(), Self::InterfaceError>;

    /// Write a value to a register
    fn write_reg(&mut self, reg: u8, val: u8) -> Result<(), Self::InterfaceError>;
}
