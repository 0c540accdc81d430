//! consts and structs for the IO-Link protocol vocabulary: master commands, direct parameter page addresses, ISDU service codes and the startup derivation tables. This should be used instead of any hardcoded command or address value.

use crate::error::{IoLinkError, IoLinkResult};
use bilge::prelude::*;

/// bit flagging valid process data in the device status octet
pub const PD_VALID_BIT: u8 = 0x40;

/// master commands, sent as the MC octet of an M-sequence
pub mod mc {
    /// device is waiting, nothing requested
    pub const IDLE: u8 = 0xF1;
    pub const PD_READ: u8 = 0x80;
    pub const PD_WRITE: u8 = 0x00;
    pub const PAGE_READ: u8 = 0xA0;
    pub const PAGE_WRITE: u8 = 0x20;
    pub const OD_WRITE: u8 = 0x70;
    pub const OD_READ: u8 = 0xF0;
    /// base of the ISDU flow-control commands; the first flow-control command is `0x61`, there is no `0x60` on the wire
    pub const OD_FLOWCTRL_BASE: u8 = 0x60;
    /// base of the ISDU response segment commands; segment `i` is requested with `0xE1 + i`
    pub const OD_RESPONSE_BASE: u8 = 0xE0;

    pub const DEV_FALLBACK: u8 = 0x5A;
    pub const MAS_IDENT: u8 = 0x95;
    pub const DEV_IDENT: u8 = 0x96;
    pub const DEV_STARTUP: u8 = 0x97;
    /// notifies the device that the PD-out bytes of the current M-sequence are valid
    pub const PDOUT_VALID: u8 = 0x98;
    pub const DEV_OPERATE: u8 = 0x99;
    pub const DEV_PREOPERATE: u8 = 0x9A;
}

/// direct parameter page 1 addresses (IO-Link spec annex B.1)
pub mod page {
    pub const MAS_COMMAND: u8 = 0x00;
    pub const MAS_CYCLE_TIME: u8 = 0x01;
    pub const MIN_CYCLE_TIME: u8 = 0x02;
    pub const M_SEQ_CAP: u8 = 0x03;
    pub const REVISION_ID: u8 = 0x04;
    pub const PD_IN: u8 = 0x05;
    pub const PD_OUT: u8 = 0x06;
    pub const VENDOR_ID1: u8 = 0x07;
    pub const VENDOR_ID2: u8 = 0x08;
    pub const DEVICE_ID1: u8 = 0x09;
    pub const DEVICE_ID2: u8 = 0x0A;
    pub const DEVICE_ID3: u8 = 0x0B;
    pub const FUNCTION_ID1: u8 = 0x0C;
    pub const FUNCTION_ID2: u8 = 0x0D;
    pub const SYSTEM_CMD: u8 = 0x0F;

    /// highest addressable entry of the direct parameter page
    pub const MAX_ADDRESS: u8 = 31;
}

/// ISDU i-service codes, placed in the high nibble of the request head octet
pub mod isdu {
    pub const WRITE_REQ_8BIT: u8 = 0x1;
    pub const WRITE_REQ_8BIT_SUB: u8 = 0x2;
    pub const WRITE_REQ_16BIT: u8 = 0x3;
    pub const READ_REQ_8BIT: u8 = 0x9;
    pub const READ_REQ_8BIT_SUB: u8 = 0xA;
    pub const READ_REQ_16BIT: u8 = 0xB;
}

/**
    framing used for cyclic traffic on one port

    The type is negotiated at startup from the device's M-sequence capability and process data lengths, see [od_length].
*/
#[repr(u8)]
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq)]
pub enum MSequenceType {
    #[default]
    Type0 = 0,
    Type1X = 1,
    Type2X = 2,
}

/// direction of a process data lane, selecting the row of table B.6 that applies
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PdDirection {
    In,
    Out,
}

/// M-sequence capability octet, direct parameter page address 0x03 (IO-Link spec B.1.4)
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct MSequenceCapability {
    /// device supports the ISDU channel
    pub isdu: bool,
    /// M-sequence type code for the OPERATE state, input of [od_length]
    pub operate_code: u3,
    /// M-sequence type code for the PREOPERATE state
    pub preoperate_code: u2,
    reserved: u2,
}

/// process data length octet, direct parameter page addresses 0x05/0x06 (IO-Link spec B.1.6/B.1.7)
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct PdLengthCode {
    /// raw length code, meaning depends on [Self::byte_mode]
    pub length: u5,
    reserved: u1,
    /// port supports standard IO mode
    pub sio: bool,
    /// when set, [Self::length] counts octets; when clear, it counts bits
    pub byte_mode: bool,
}

/**
    derive the process data length in bytes from a raw `PD_IN`/`PD_OUT` direct parameter octet

    IO-Link spec table B.6. This is a total function except on the combinations the table marks reserved, which are reported as [IoLinkError::Protocol].
*/
pub fn pd_length(raw: u8, direction: PdDirection) -> IoLinkResult<usize> {
    let code = PdLengthCode::from(raw);
    let n = code.length().value() as usize;
    if code.byte_mode() {
        match n {
            0 | 1 => Err(IoLinkError::Protocol("reserved process data length code")),
            _ => Ok(n + 1),
        }
    }
    else {
        match (n, direction) {
            (0, PdDirection::In) => Err(IoLinkError::Protocol("reserved process data length code")),
            // a device without PD-out reports length code 0
            (0, PdDirection::Out) => Ok(0),
            (1..=8, _) => Ok(1),
            (9..=16, _) => Ok(2),
            _ => Err(IoLinkError::Protocol("process data length code out of range")),
        }
    }
}

/**
    derive the on-request data length and the canonical M-sequence type from the process data lengths and the OPERATE capability code

    IO-Link spec table A.10. `capability` is [MSequenceCapability::operate_code] as read from the device.
*/
pub fn od_length(pd_in: usize, pd_out: usize, capability: u8) -> IoLinkResult<(usize, MSequenceType)> {
    use MSequenceType::*;

    if pd_in == 0 && pd_out == 0 {
        // upper half of the table: no process data at all
        return match capability {
            0 => Ok((1, Type0)),
            1 => Ok((2, Type1X)),
            6 => Ok((8, Type1X)),
            7 => Ok((32, Type1X)),
            _ => Err(IoLinkError::Protocol("no matching M-sequence type")),
        }
    }
    match capability {
        // fixed-length process data up to 2 bytes each way
        0 if pd_in <= 2 && pd_out <= 2 => Ok((1, Type2X)),
        // variable-length process data of 3 bytes or more in at least one direction
        4 if pd_in >= 3 || pd_out >= 3 => Ok((1, Type2X)),
        5 => Ok((2, Type2X)),
        6 => Ok((8, Type2X)),
        7 => Ok((32, Type2X)),
        _ => Err(IoLinkError::Protocol("no matching M-sequence type")),
    }
}
