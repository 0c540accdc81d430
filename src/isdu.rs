/*!
    Construction of ISDU request frames and their segmentation over the on-request data channel.

    An ISDU request addresses a device parameter by (index, subindex). The request frame starts
    with an i-service octet carrying the service code in the high nibble and the total head+data
    length in the low nibble, followed by one or two index octets, the subindex where the form
    requires it, the write payload, and a closing [chkpdu] checksum. The frame is then
    zero-padded so it splits into whole chunks of the port's OD length; the port engine sends
    those chunks under the flow-control master commands, see [crate::port].
*/

use crate::{
    error::{IoLinkError, IoLinkResult},
    registers::{isdu, mc},
    };

/// ISDU checksum octet: XOR over the frame, so a frame concatenated with its own checksum folds to zero
pub fn chkpdu(frame: &[u8]) -> u8 {
    frame.iter().fold(0, |acc, byte| acc ^ byte)
}

/// address triple recovered from a request frame head, see [decode_header]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IsduHeader {
    pub index: u16,
    pub subindex: u8,
    /// length of the write payload carried behind the head
    pub data_length: usize,
}

/// build a padded, checksummed read request frame for the given parameter
pub fn read_request(index: u16, subindex: u8, od_len: usize) -> Vec<u8> {
    request_frame(true, index, subindex, &[], od_len)
}

/// build a padded, checksummed write request frame carrying `data`
pub fn write_request(index: u16, subindex: u8, data: &[u8], od_len: usize) -> Vec<u8> {
    request_frame(false, index, subindex, data, od_len)
}

fn request_frame(read: bool, index: u16, subindex: u8, data: &[u8], od_len: usize) -> Vec<u8> {
    let high = (index >> 8) as u8;
    let low = (index & 0x00FF) as u8;
    let length = data.len() as u8;
    let mut frame = Vec::with_capacity(5 + data.len() + od_len);
    if index < 256 {
        if subindex == 0 {
            // subindex 0 references the entire data object
            let service = if read { isdu::READ_REQ_8BIT } else { isdu::WRITE_REQ_8BIT };
            frame.push((service << 4) + length + 3);
            frame.push(low);
        }
        else {
            let service = if read { isdu::READ_REQ_8BIT_SUB } else { isdu::WRITE_REQ_8BIT_SUB };
            frame.push((service << 4) + length + 4);
            frame.push(low);
            frame.push(subindex);
        }
    }
    else {
        let service = if read { isdu::READ_REQ_16BIT } else { isdu::WRITE_REQ_16BIT };
        frame.push((service << 4) + length + 5);
        frame.push(high);
        frame.push(low);
        frame.push(subindex);
    }
    frame.extend_from_slice(data);
    frame.push(chkpdu(&frame));
    pad_to_chunks(&mut frame, od_len);
    frame
}

/// zero-pad the frame so it splits into whole OD-sized chunks
pub fn pad_to_chunks(frame: &mut Vec<u8>, od_len: usize) {
    if od_len == 0 { return }
    let remainder = frame.len() % od_len;
    if remainder != 0 {
        frame.resize(frame.len() + od_len - remainder, 0);
    }
}

/// master command carrying request chunk `seq`: `OD_WRITE` opens the transfer, flow-control commands continue it
pub fn chunk_command(seq: u8) -> u8 {
    if seq == 0 { mc::OD_WRITE } else { mc::OD_FLOWCTRL_BASE + seq }
}

/// master command requesting response segment `segment` (the first segment after the length octet is `0xE1`)
pub fn response_command(segment: u8) -> u8 {
    mc::OD_RESPONSE_BASE + 1 + segment
}

/// recover the address triple from a request frame head
pub fn decode_header(frame: &[u8]) -> IoLinkResult<IsduHeader> {
    let head = *frame.first()
        .ok_or(IoLinkError::Protocol("empty ISDU frame"))?;
    let service = head >> 4;
    let length = (head & 0x0F) as usize;
    let field = |position: usize| frame.get(position).copied()
        .ok_or(IoLinkError::Protocol("truncated ISDU frame head"));
    let payload = |overhead: usize| length.checked_sub(overhead)
        .ok_or(IoLinkError::Protocol("ISDU length nibble below head size"));

    match service {
        isdu::READ_REQ_8BIT | isdu::WRITE_REQ_8BIT => Ok(IsduHeader {
            index: u16::from(field(1)?),
            subindex: 0,
            data_length: payload(3)?,
        }),
        isdu::READ_REQ_8BIT_SUB | isdu::WRITE_REQ_8BIT_SUB => Ok(IsduHeader {
            index: u16::from(field(1)?),
            subindex: field(2)?,
            data_length: payload(4)?,
        }),
        isdu::READ_REQ_16BIT | isdu::WRITE_REQ_16BIT => Ok(IsduHeader {
            index: u16::from(field(1)?) << 8 | u16::from(field(2)?),
            subindex: field(3)?,
            data_length: payload(5)?,
        }),
        _ => Err(IoLinkError::Protocol("unknown ISDU service code")),
    }
}
