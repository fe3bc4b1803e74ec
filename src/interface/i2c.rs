use crate::interface::SensorInterface;
use crate::Error;
use embedded_hal as hal;

/// Default 7-bit device address (AD pin low)
pub const DEFAULT_I2C_ADDRESS: u8 = 0x55;

/// Setting this bit in the register address byte stops the device from
/// advancing its internal register pointer between bytes. The register
/// map tops out well below it, so the bit is never part of an address.
const NO_AUTO_INCREMENT: u8 = 0x40;

pub struct I2cInterface<I2C> {
    i2c_port: I2C,
    address: u8,
}

impl<I2C> I2cInterface<I2C> {
    pub fn new(i2c_port: I2C, address: u8) -> Self {
        Self { i2c_port, address }
    }
}

impl<I2C, CommE> SensorInterface for I2cInterface<I2C>
where
    I2C: hal::blocking::i2c::Write<Error = CommE>
        + hal::blocking::i2c::Read<Error = CommE>
        + hal::blocking::i2c::WriteRead<Error = CommE>,
    CommE: core::fmt::Debug,
{
    type InterfaceError = crate::Error<CommE>;

    fn write_reg(
        &mut self,
        reg: u8,
        val: u8,
    ) -> Result<(), Self::InterfaceError> {
        let write_buf = [reg, val];
        self.i2c_port
            .write(self.address, &write_buf)
            .map_err(Error::Comm)?;
        Ok(())
    }

    fn read_block(
        &mut self,
        reg: u8,
        auto_increment: bool,
        recv_buf: &mut [u8],
    ) -> Result<(), Self::InterfaceError> {
        let cmd_buf = if auto_increment {
            [reg]
        } else {
            [reg | NO_AUTO_INCREMENT]
        };
        self.i2c_port
            .write_read(self.address, &cmd_buf, recv_buf)
            .map_err(Error::Comm)?;
        Ok(())
    }
}
