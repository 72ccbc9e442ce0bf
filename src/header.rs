use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::frame::Header;

/// MBAP 头部长度：事务号(2) + 协议号(2) + 长度(2) + 单元号(1)
pub(crate) const HEADER_LEN: usize = 7;

/// Modbus 协议号，固定 0
pub(crate) const PROTOCOL_ID: u16 = 0x0000;

/// Bytes covered by the length field, counted from the unit id: the length
/// field plus the six leading header bytes can never exceed a 260 byte ADU.
pub(crate) const MAX_LENGTH: u16 = 254;

/// Modbus Application Protocol header in front of every TCP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MbapHeader {
    pub(crate) transaction_id: u16,
    pub(crate) protocol_id: u16,
    /// Number of bytes that follow, i.e. unit id + PDU.
    pub(crate) length: u16,
    pub(crate) unit_id: u8,
}

impl MbapHeader {
    /// Header for a frame carrying `pdu_len` bytes of PDU.
    pub(crate) fn new(hdr: Header, pdu_len: usize) -> Self {
        Self {
            transaction_id: hdr.transaction_id,
            protocol_id: PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id: hdr.unit_id,
        }
    }

    /// 解析头部，不足 7 字节时返回 None
    pub(crate) fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            transaction_id: BigEndian::read_u16(&buf[0..2]),
            protocol_id: BigEndian::read_u16(&buf[2..4]),
            length: BigEndian::read_u16(&buf[4..6]),
            unit_id: buf[6],
        })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.length);
        buf.put_u8(self.unit_id);
    }

    /// Total frame length announced by this header.
    pub(crate) fn frame_len(&self) -> usize {
        HEADER_LEN - 1 + usize::from(self.length)
    }

    pub(crate) fn header(&self) -> Header {
        Header {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
        }
    }
}
