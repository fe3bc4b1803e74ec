/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

#![cfg_attr(not(test), no_std)]

use defmt::{debug, Format};
use embedded_hal::blocking::delay::DelayMs;

pub mod interface;
pub mod param;

use crate::interface::SensorInterface;
use crate::param::{
    decode_response, output_layout, CommandError, PARAM_ADCCONFIG0, PARAM_ADCPOST0,
    PARAM_ADCSENS0, PARAM_ADDR_MAX, PARAM_BURST, PARAM_CHANNEL_STRIDE, PARAM_CHAN_LIST,
    PARAM_MEASCONFIG0, PARAM_MEASCOUNT0, PARAM_MEASRATE_H, PARAM_MEASRATE_L,
    PARAM_THRESHOLD0_H,
};
pub use crate::param::ChannelShadow;

/// Number of independently configurable measurement channels
pub const NUM_CHANNELS: usize = 6;

/// Errors in this crate
#[derive(Debug, PartialEq, Format)]
pub enum Error<CommE> {
    /// Sensor communication error
    Comm(CommE),

    /// Parameter address outside the virtual table
    AddressOutOfRange,

    /// Request rejected locally (bad channel index or field value)
    InvalidParameterRequest,

    /// Device did not recognize the command
    CommandRejected,

    /// Parameter access hit an invalid table location
    InvalidTableLocation,

    /// ADC accumulation saturated during the measurement
    AccumulatorOverflow,

    /// Sample did not fit the output register block
    OutputBufferOverflow,

    /// Device lost its state and reinitialized itself
    DeviceReset,

    /// Device did not complete the request within the poll bound
    PollTimeout,

    /// Unrecognized chip ID
    UnknownChipId,
}

impl<CommE> From<CommandError> for Error<CommE> {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Rejected => Error::CommandRejected,
            CommandError::InvalidLocation => Error::InvalidTableLocation,
            CommandError::AccumulatorOverflow => Error::AccumulatorOverflow,
            CommandError::OutputBufferOverflow => Error::OutputBufferOverflow,
            CommandError::DeviceReset => Error::DeviceReset,
        }
    }
}

/// Photodiode selection for a channel's ADC input
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpticalFunction {
    SmallIr = 0x00,
    MediumIr = 0x01,
    LargeIr = 0x02,
    White = 0x0B,
    LargeWhite = 0x0D,
    Uv = 0x18,
    /// Deep-UV diode, for UV monitoring degradation checks
    UvDeep = 0x19,
}

/// ADC integration time in device clocks
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum DecimationRate {
    Clocks1024 = 0b00,
    Clocks2048 = 0b01,
    Clocks4096 = 0b10,
    Clocks512 = 0b11,
}

/// Output word size of a measurement channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitWidth {
    Bits16,
    Bits24,
}

impl BitWidth {
    /// Bytes one sample occupies in the output register block
    pub fn bytes(self) -> u8 {
        match self {
            BitWidth::Bits16 => 2,
            BitWidth::Bits24 => 3,
        }
    }
}

/// One of the three measurement-rate counters
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum MeasurementCounter {
    Counter0 = 0b01,
    Counter1 = 0b10,
    Counter2 = 0b11,
}

/// One of the three interrupt threshold registers
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum ThresholdSelect {
    Threshold0 = 0b01,
    Threshold1 = 0b10,
    Threshold2 = 0b11,
}

#[derive(Debug)]
pub struct Si1133<SI> {
    si: SI,
    shadow: ChannelShadow,
}

impl<SI, CommE> Si1133<SI>
where
    SI: SensorInterface<InterfaceError = Error<CommE>>,
    CommE: core::fmt::Debug,
{
    pub fn new(si: SI) -> Self {
        Self {
            si,
            shadow: ChannelShadow::default(),
        }
    }

    /// Give the bus interface back
    pub fn release(self) -> SI {
        self.si
    }

    pub fn init(
        &mut self,
        delay_source: &mut impl DelayMs<u8>,
    ) -> Result<(), Error<CommE>> {
        self.reset(delay_source)
    }

    fn reset(
        &mut self,
        delay_source: &mut impl DelayMs<u8>,
    ) -> Result<(), Error<CommE>> {
        self.si.write_reg(REG_COMMAND, CMD_RESET_SW)?;
        delay_source.delay_ms(STARTUP_DELAY_MS);

        //compare product ID against known product ID
        let part_id = self.read_reg(REG_PART_ID)?;
        if part_id != EXPECTED_PART_ID {
            debug!("part id bad: expected {} got {}", EXPECTED_PART_ID, part_id);
            return Err(Error::UnknownChipId);
        }

        // the reset returned the device to its parameter defaults
        self.shadow = ChannelShadow::default();
        Ok(())
    }

    /// Cached per-channel configuration, as last acknowledged by the device
    pub fn channel_config(&self) -> &ChannelShadow {
        &self.shadow
    }

    /// Write one byte into the virtual parameter table.
    ///
    /// Prefer the typed setters for parameters the driver mirrors locally;
    /// writes issued through here leave the channel cache alone.
    pub fn write_parameter(&mut self, address: u8, value: u8) -> Result<(), Error<CommE>> {
        if address > PARAM_ADDR_MAX {
            return Err(Error::AddressOutOfRange);
        }
        let ctr = self.read_response_counter()?;
        self.si.write_reg(REG_HOSTIN0, value)?;
        self.si.write_reg(REG_COMMAND, CMD_PARAM_SET | address)?;
        self.wait_command_complete(ctr)?;
        Ok(())
    }

    /// Read one byte back from the virtual parameter table
    pub fn read_parameter(&mut self, address: u8) -> Result<u8, Error<CommE>> {
        if address > PARAM_ADDR_MAX {
            return Err(Error::AddressOutOfRange);
        }
        let ctr = self.read_response_counter()?;
        self.si.write_reg(REG_COMMAND, CMD_PARAM_QUERY | address)?;
        self.wait_command_complete(ctr)?;
        self.read_reg(REG_RESPONSE1)
    }

    /// Current completion counter, failing fast on an error already
    /// latched in the response register
    fn read_response_counter(&mut self) -> Result<u8, Error<CommE>> {
        let resp = self.read_reg(REG_RESPONSE0)?;
        Ok(decode_response(resp)?)
    }

    /// Poll the response register until the completion counter moves on
    /// from `prev_ctr` or the device reports an error
    fn wait_command_complete(&mut self, prev_ctr: u8) -> Result<u8, Error<CommE>> {
        for _ in 0..POLL_RETRY_LIMIT {
            let resp = self.read_reg(REG_RESPONSE0)?;
            let ctr = decode_response(resp)?;
            if ctr != prev_ctr {
                return Ok(ctr);
            }
        }
        Err(Error::PollTimeout)
    }

    /// Select which channels participate in measurements
    pub fn enable_channels(&mut self, chan_list: u8) -> Result<(), Error<CommE>> {
        if chan_list & !CHAN_LIST_MASK != 0 {
            return Err(Error::InvalidParameterRequest);
        }
        self.write_parameter(PARAM_CHAN_LIST, chan_list)?;
        self.shadow.set_channel_list(chan_list);
        Ok(())
    }

    /// Route a channel's ADC input and set its integration time
    pub fn set_channel_function(
        &mut self,
        channel: usize,
        decim: DecimationRate,
        function: OpticalFunction,
    ) -> Result<(), Error<CommE>> {
        let addr = Self::channel_param(channel, PARAM_ADCCONFIG0)?;
        let config = ((decim as u8) << 5) | function as u8;
        self.write_parameter(addr, config)?;
        self.shadow.set_function(channel, function);
        Ok(())
    }

    /// Set a channel's analog range and software/hardware gain
    pub fn set_channel_sensitivity(
        &mut self,
        channel: usize,
        high_signal: bool,
        sw_gain: u8,
        hw_gain: u8,
    ) -> Result<(), Error<CommE>> {
        let addr = Self::channel_param(channel, PARAM_ADCSENS0)?;
        if sw_gain > MAX_SW_GAIN || hw_gain > MAX_HW_GAIN {
            return Err(Error::InvalidParameterRequest);
        }
        let sens = (if high_signal { 1 << 7 } else { 0 }) | (sw_gain << 4) | hw_gain;
        self.write_parameter(addr, sens)
    }

    /// Configure a channel's output word size, post-shift, and
    /// threshold gating
    pub fn set_channel_output(
        &mut self,
        channel: usize,
        width: BitWidth,
        postshift: u8,
        threshold: Option<ThresholdSelect>,
    ) -> Result<(), Error<CommE>> {
        let addr = Self::channel_param(channel, PARAM_ADCPOST0)?;
        if postshift > MAX_POSTSHIFT {
            return Err(Error::InvalidParameterRequest);
        }
        let mut post = (postshift << 3) | threshold.map_or(0, |t| t as u8);
        if let BitWidth::Bits24 = width {
            post |= ADCPOST_24BIT_OUT;
        }
        self.write_parameter(addr, post)?;
        self.shadow.set_bit_width(channel, width);
        Ok(())
    }

    /// Bind a channel to one of the measurement counters, or to forced
    /// measurements only
    pub fn set_channel_counter(
        &mut self,
        channel: usize,
        counter: Option<MeasurementCounter>,
    ) -> Result<(), Error<CommE>> {
        let addr = Self::channel_param(channel, PARAM_MEASCONFIG0)?;
        let config = counter.map_or(0, |c| (c as u8) << 6);
        self.write_parameter(addr, config)
    }

    /// Global measurement rate for autonomous operation
    pub fn set_measurement_rate(&mut self, rate: u16) -> Result<(), Error<CommE>> {
        self.write_parameter(PARAM_MEASRATE_H, (rate >> 8) as u8)?;
        self.write_parameter(PARAM_MEASRATE_L, rate as u8)
    }

    /// Rate divider for one of the measurement counters
    pub fn set_measurement_count(
        &mut self,
        counter: MeasurementCounter,
        count: u8,
    ) -> Result<(), Error<CommE>> {
        self.write_parameter(PARAM_MEASCOUNT0 + (counter as u8 - 1), count)
    }

    /// Set one of the three 16-bit interrupt thresholds
    pub fn set_threshold(
        &mut self,
        threshold: ThresholdSelect,
        value: u16,
    ) -> Result<(), Error<CommE>> {
        let addr = PARAM_THRESHOLD0_H + 2 * (threshold as u8 - 1);
        self.write_parameter(addr, (value >> 8) as u8)?;
        self.write_parameter(addr + 1, value as u8)
    }

    /// Burst-mode enable/count byte
    pub fn set_burst(&mut self, burst: u8) -> Result<(), Error<CommE>> {
        self.write_parameter(PARAM_BURST, burst)
    }

    /// Clear the command counter and any latched command error
    pub fn reset_command_counter(&mut self) -> Result<(), Error<CommE>> {
        self.si.write_reg(REG_COMMAND, CMD_RESET_CMD_CTR)
    }

    /// Start autonomous measurements of the enabled channels
    pub fn start_measurement(&mut self) -> Result<(), Error<CommE>> {
        self.si.write_reg(REG_COMMAND, CMD_START)
    }

    /// Suspend autonomous measurements
    pub fn pause_measurement(&mut self) -> Result<(), Error<CommE>> {
        self.si.write_reg(REG_COMMAND, CMD_PAUSE)
    }

    /// Trigger a single measurement of the enabled channels
    pub fn force_measurement(&mut self) -> Result<(), Error<CommE>> {
        self.si.write_reg(REG_COMMAND, CMD_FORCE)
    }

    /// Run one acquisition cycle over the enabled channels.
    ///
    /// Starts conversions, waits for the device to flag data ready,
    /// pauses, and extracts a raw sample for every channel whose ready
    /// bit is set. Entries for channels without fresh data are left
    /// untouched; the returned bitmap tells the caller which entries
    /// were written this cycle.
    pub fn read_measurements(
        &mut self,
        readings: &mut [u32; NUM_CHANNELS],
    ) -> Result<u8, Error<CommE>> {
        let chan_list = self.shadow.channel_list();
        // interrupt enables must mirror the channel list; push on drift only
        if chan_list != self.shadow.irq_mirror() {
            self.si.write_reg(REG_IRQ_ENABLE, chan_list)?;
            self.shadow.set_irq_mirror(chan_list);
        }

        self.start_measurement()?;
        let status = self.wait_data_ready()?;
        self.pause_measurement()?;

        let layout = output_layout(chan_list, self.shadow.widths());
        for (ch, slot) in layout.iter().enumerate() {
            if status & (1 << ch) == 0 {
                continue;
            }
            if let Some(slot) = slot {
                let mut buf = [0u8; 3];
                let buf = &mut buf[..slot.len as usize];
                self.si.read_block(slot.addr, true, buf)?;
                readings[ch] = Self::assemble_reading(buf);
            }
        }
        Ok(status)
    }

    /// Poll the interrupt-status register until any enabled channel
    /// reports data ready
    fn wait_data_ready(&mut self) -> Result<u8, Error<CommE>> {
        for _ in 0..POLL_RETRY_LIMIT {
            let status = self.read_reg(REG_IRQ_STATUS)?;
            if status != 0 {
                return Ok(status);
            }
        }
        Err(Error::PollTimeout)
    }

    /// Combine big-endian sample bytes into one accumulator value
    fn assemble_reading(buf: &[u8]) -> u32 {
        let mut val: u32 = 0;
        for &byte in buf {
            val = (val << 8) | u32::from(byte);
        }
        val
    }

    fn channel_param(channel: usize, base: u8) -> Result<u8, Error<CommE>> {
        if channel >= NUM_CHANNELS {
            return Err(Error::InvalidParameterRequest);
        }
        Ok(base + channel as u8 * PARAM_CHANNEL_STRIDE)
    }

    /// Read a single register
    fn read_reg(&mut self, reg: u8) -> Result<u8, Error<CommE>> {
        let mut buf = [0u8; 1];
        self.si.read_block(reg, false, &mut buf)?;
        Ok(buf[0])
    }
}

/// Part identity register, reads 0x33
const REG_PART_ID: u8 = 0x00;
// Hardware revision
// const REG_HW_ID: u8 = 0x01;
// Firmware revision
// const REG_REV_ID: u8 = 0x02;

/// Input staging byte for parameter writes
const REG_HOSTIN0: u8 = 0x0A;
/// Command trigger
const REG_COMMAND: u8 = 0x0B;
/// Per-channel interrupt enable bitmap
const REG_IRQ_ENABLE: u8 = 0x0F;
/// Parameter readback byte
const REG_RESPONSE1: u8 = 0x10;
/// Completion counter and command error flags
const REG_RESPONSE0: u8 = 0x11;
/// Per-channel data-ready bitmap
const REG_IRQ_STATUS: u8 = 0x12;
/// First register of the contiguous output block
pub(crate) const REG_HOSTOUT0: u8 = 0x13;

const EXPECTED_PART_ID: u8 = 0x33;

/// Clear the command counter and latched command errors
const CMD_RESET_CMD_CTR: u8 = 0x00;
/// Software reset
const CMD_RESET_SW: u8 = 0x01;
/// Force a single measurement
const CMD_FORCE: u8 = 0x11;
/// Suspend autonomous measurements
const CMD_PAUSE: u8 = 0x12;
/// Start autonomous measurements
const CMD_START: u8 = 0x13;
/// Indirect parameter read request, combined with a table address
const CMD_PARAM_QUERY: u8 = 0x40;
/// Indirect parameter write request, combined with a table address
const CMD_PARAM_SET: u8 = 0x80;

/// 24-bit output select in a channel's post-processing parameter
const ADCPOST_24BIT_OUT: u8 = 0x40;

const CHAN_LIST_MASK: u8 = 0x3F;
const MAX_POSTSHIFT: u8 = 0x07;
const MAX_SW_GAIN: u8 = 0x07;
const MAX_HW_GAIN: u8 = 0x0B;

/// Device start-up time after reset
const STARTUP_DELAY_MS: u8 = 25;

/// Upper bound on completion and data-ready polling, so that a dead
/// device surfaces as PollTimeout instead of hanging the caller
const POLL_RETRY_LIMIT: u32 = 10_000;
