/*!
    trait abstracting the IO-Link line driver chip

    One driver instance stands for one MAX14819-class transceiver, which terminates two
    physical ports and owns the data-link layer: UART framing, parity, the M-sequence timing
    windows and the wake-up current pulse all happen inside the chip. The port engine only
    pushes complete M-sequences in and pulls answers out, so any chip with an equivalent
    frame FIFO can be plugged in here.

    All methods are synchronous: an SPI transaction blocks the calling task until the chip
    has taken or produced the frame, it never yields. Serialization of concurrent callers is
    the responsibility of the supervisor, see [crate::master::Shield].
*/

use crate::error::IoLinkResult;
use crate::registers::MSequenceType;

/// selects one of the two ports terminated by a driver chip
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PortChannel {
    A,
    B,
}

pub trait PortDriver: Send + Sync {
    /// initialize the chip-side port (clock, current limits, interrupt routing)
    fn begin(&self, channel: PortChannel) -> IoLinkResult;

    /// reset the chip-side port to its power-up state
    fn reset(&self, channel: PortChannel) -> IoLinkResult;

    /// assert the wake-up current pulse and sense the device baud rate, returned in baud
    fn wake_up_request(&self, channel: PortChannel) -> IoLinkResult<u32>;

    /**
        send one M-sequence: master command `mc`, the `tx` payload, and arm the receiver
        for an answer of `rx_len` bytes framed as `m_sequence`
    */
    fn write_data(&self, mc: u8, tx: &[u8], rx_len: usize, m_sequence: MSequenceType, channel: PortChannel) -> IoLinkResult;

    /// pull the latest `buffer.len()` answer bytes out of the port receive FIFO
    fn read_data(&self, channel: PortChannel, buffer: &mut [u8]) -> IoLinkResult;

    /// pull a cyclic process data answer of `expected` bytes, `od_len` of which are the on-request segment
    fn read_pd(&self, channel: PortChannel, expected: usize, od_len: usize) -> IoLinkResult<Vec<u8>>;

    /**
        send one ISDU request chunk under master command `mc`

        `pd_out_lane` precedes the chunk on the wire so the process data output lanes keep
        their framing during the on-request exchange.
    */
    fn write_isdu(&self, mc: u8, m_sequence: MSequenceType, channel: PortChannel, pd_out_lane: &[u8], chunk: &[u8]) -> IoLinkResult;

    /// pull one `od_len`-byte ISDU response chunk out of the port receive FIFO
    fn read_isdu(&self, channel: PortChannel, od_len: usize) -> IoLinkResult<Vec<u8>>;

    /// ISDU checksum over a frame; chips with a checksum unit may override this
    fn chkpdu(&self, frame: &[u8]) -> u8 {
        crate::isdu::chkpdu(frame)
    }

    /// read a chip register
    fn read_register(&self, address: u8) -> IoLinkResult<u8>;

    /// write a chip register
    fn write_register(&self, address: u8, value: u8) -> IoLinkResult;
}
