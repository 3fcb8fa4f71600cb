//! Modbus RTU protocol constants

/// Lowest addressable slave id (0 is broadcast, never answered)
pub const MIN_SLAVE_ID: u8 = 1;
/// Highest addressable slave id
pub const MAX_SLAVE_ID: u8 = 247;

/// FC01/FC02 bit count limit per request
pub const MAX_READ_BITS: u16 = 2000;
/// FC15 bit count limit per request
pub const MAX_WRITE_BITS: u16 = 1968;

/// FC05 wire value for ON
pub const COIL_ON: u16 = 0xFF00;
/// FC05 wire value for OFF
pub const COIL_OFF: u16 = 0x0000;

/// Set in the function byte of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// slave + function + crc
pub const MIN_FRAME_LEN: usize = 4;
/// slave + function + exception code + crc
pub const EXCEPTION_FRAME_LEN: usize = 5;
/// FC05/FC15 echo: slave + function + 4 bytes + crc
pub const WRITE_ACK_FRAME_LEN: usize = 8;
/// Largest RTU ADU
pub const MAX_RTU_FRAME_LEN: usize = 256;
