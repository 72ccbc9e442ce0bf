//! Byte-level encoding and decoding of Modbus TCP ADUs.
//!
//! All multi-byte fields are big-endian. The decoders work on a borrowed
//! buffer and report how many bytes the frame occupied so that the stream
//! codecs in [`tcp`] can advance their read buffer.

use std::{borrow::Cow, io};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::{
    frame::*,
    header::{MbapHeader, HEADER_LEN, MAX_LENGTH, PROTOCOL_ID},
};

pub mod tcp;

/// Why a buffer could not be turned into a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// More bytes are needed; not fatal.
    #[error("Incomplete frame")]
    Incomplete,
    #[error("Invalid protocol id 0x{0:04X}")]
    InvalidProtocol(u16),
    #[error("Invalid MBAP length field {0}")]
    InvalidLength(u16),
    #[error("Invalid body for function {function}: {len} bytes")]
    InvalidBody { function: FunctionCode, len: usize },
}

impl DecodeError {
    /// Only [`DecodeError::Incomplete`] allows the caller to keep buffering.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, DecodeError::Incomplete)
    }
}

impl From<DecodeError> for io::Error {
    fn from(err: DecodeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Splits the front of `buf` into a validated header and the PDU bytes.
fn split_frame(buf: &[u8]) -> Result<(MbapHeader, &[u8]), DecodeError> {
    // 至少需要头部 + 功能码
    if buf.len() < HEADER_LEN + 1 {
        return Err(DecodeError::Incomplete);
    }
    let Some(header) = MbapHeader::parse(buf) else {
        return Err(DecodeError::Incomplete);
    };
    if header.protocol_id != PROTOCOL_ID {
        return Err(DecodeError::InvalidProtocol(header.protocol_id));
    }
    // 长度至少包含单元号和功能码
    if header.length < 2 || header.length > MAX_LENGTH {
        return Err(DecodeError::InvalidLength(header.length));
    }
    let frame_len = header.frame_len();
    if buf.len() < frame_len {
        return Err(DecodeError::Incomplete);
    }
    Ok((header, &buf[HEADER_LEN..frame_len]))
}

fn read_address_and_value(function: FunctionCode, body: &[u8]) -> Result<(u16, u16), DecodeError> {
    if body.len() != 4 {
        return Err(DecodeError::InvalidBody {
            function,
            len: body.len(),
        });
    }
    Ok((
        BigEndian::read_u16(&body[0..2]),
        BigEndian::read_u16(&body[2..4]),
    ))
}

fn read_words(data: &[u8]) -> Vec<Word> {
    data.chunks_exact(2).map(BigEndian::read_u16).collect()
}

fn request_pdu(code: u8, body: &[u8]) -> Result<Request<'static>, DecodeError> {
    let function = FunctionCode::new(code);
    let req = match function {
        FunctionCode::ReadHoldingRegisters => {
            let (addr, qty) = read_address_and_value(function, body)?;
            Request::ReadHoldingRegisters(addr, qty)
        }
        FunctionCode::ReadInputRegisters => {
            let (addr, qty) = read_address_and_value(function, body)?;
            Request::ReadInputRegisters(addr, qty)
        }
        FunctionCode::WriteSingleRegister => {
            let (addr, word) = read_address_and_value(function, body)?;
            Request::WriteSingleRegister(addr, word)
        }
        FunctionCode::WriteMultipleRegisters => {
            // 地址(2) + 数量(2) + 字节数(1) + 数据
            let invalid = DecodeError::InvalidBody {
                function,
                len: body.len(),
            };
            if body.len() < 5 {
                return Err(invalid);
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            let byte_count = usize::from(body[4]);
            if body.len() != 5 + byte_count || byte_count != usize::from(qty) * 2 {
                return Err(invalid);
            }
            Request::WriteMultipleRegisters(addr, Cow::Owned(read_words(&body[5..])))
        }
        FunctionCode::Custom(code) => Request::Custom(code, Cow::Owned(body.to_vec())),
    };
    Ok(req)
}

fn response_pdu(code: u8, body: &[u8]) -> Result<ResponsePdu, DecodeError> {
    if code & 0x80 != 0 {
        let function = FunctionCode::new(code & 0x7F);
        if body.len() != 1 {
            return Err(DecodeError::InvalidBody {
                function,
                len: body.len(),
            });
        }
        return Ok(ExceptionResponse {
            function,
            exception: ExceptionCode::new(body[0]),
        }
        .into());
    }
    let function = FunctionCode::new(code);
    let invalid = DecodeError::InvalidBody {
        function,
        len: body.len(),
    };
    let rsp = match function {
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            let Some((&byte_count, data)) = body.split_first() else {
                return Err(invalid);
            };
            if data.len() != usize::from(byte_count) || byte_count % 2 != 0 {
                return Err(invalid);
            }
            let words = read_words(data);
            if function == FunctionCode::ReadHoldingRegisters {
                Response::ReadHoldingRegisters(words)
            } else {
                Response::ReadInputRegisters(words)
            }
        }
        FunctionCode::WriteSingleRegister => {
            let (addr, word) = read_address_and_value(function, body)?;
            Response::WriteSingleRegister(addr, word)
        }
        FunctionCode::WriteMultipleRegisters => {
            let (addr, qty) = read_address_and_value(function, body)?;
            Response::WriteMultipleRegisters(addr, qty)
        }
        FunctionCode::Custom(_) => return Err(invalid),
    };
    Ok(rsp.into())
}

fn request_pdu_len(req: &Request<'_>) -> usize {
    match req {
        Request::ReadHoldingRegisters(_, _)
        | Request::ReadInputRegisters(_, _)
        | Request::WriteSingleRegister(_, _) => 5,
        Request::WriteMultipleRegisters(_, words) => 6 + words.len() * 2,
        Request::Custom(_, data) => 1 + data.len(),
    }
}

fn response_pdu_len(pdu: &ResponsePdu) -> usize {
    match &pdu.0 {
        Ok(Response::ReadHoldingRegisters(words)) | Ok(Response::ReadInputRegisters(words)) => {
            2 + words.len() * 2
        }
        Ok(Response::WriteSingleRegister(_, _)) | Ok(Response::WriteMultipleRegisters(_, _)) => 5,
        Err(_) => 2,
    }
}

/// Decodes requests on the server side.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerDecoder;

impl ServerDecoder {
    /// Decodes the request frame at the front of `buf`.
    ///
    /// Returns the request and the number of bytes it occupied. Unknown
    /// function codes decode into [`Request::Custom`]; whether they are
    /// supported is up to the service.
    pub fn decode(buf: &[u8]) -> Result<(RequestAdu<'static>, usize), DecodeError> {
        let (header, pdu) = split_frame(buf)?;
        let req = request_pdu(pdu[0], &pdu[1..])?;
        Ok((
            RequestAdu {
                hdr: header.header(),
                pdu: req.into(),
            },
            header.frame_len(),
        ))
    }
}

/// Encodes responses on the server side.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerEncoder;

impl ServerEncoder {
    pub fn encode(adu: &ResponseAdu, buf: &mut BytesMut) {
        let pdu_len = response_pdu_len(&adu.pdu);
        buf.reserve(HEADER_LEN + pdu_len);
        MbapHeader::new(adu.hdr, pdu_len).write(buf);
        buf.put_u8(adu.pdu.wire_function_code());
        match &adu.pdu.0 {
            Ok(Response::ReadHoldingRegisters(words)) | Ok(Response::ReadInputRegisters(words)) => {
                debug_assert!(words.len() <= usize::from(u8::MAX) / 2);
                buf.put_u8((words.len() * 2) as u8);
                for &word in words {
                    buf.put_u16(word);
                }
            }
            Ok(Response::WriteSingleRegister(addr, word)) => {
                buf.put_u16(*addr);
                buf.put_u16(*word);
            }
            Ok(Response::WriteMultipleRegisters(addr, qty)) => {
                buf.put_u16(*addr);
                buf.put_u16(*qty);
            }
            Err(exc) => buf.put_u8(exc.exception.into()),
        }
    }
}

/// Encodes requests on the client side.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientEncoder;

impl ClientEncoder {
    /// Encodes `adu` into `buf`. Requests that do not fit the MBAP length
    /// limit are rejected with [`io::ErrorKind::InvalidInput`] and nothing is
    /// written.
    pub fn encode(adu: &RequestAdu<'_>, buf: &mut BytesMut) -> io::Result<()> {
        let req = &adu.pdu.0;
        let pdu_len = request_pdu_len(req);
        if pdu_len + 1 > usize::from(MAX_LENGTH) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Request for function {} is {pdu_len} bytes, too large for one frame",
                    req.function_code()
                ),
            ));
        }
        buf.reserve(HEADER_LEN + pdu_len);
        MbapHeader::new(adu.hdr, pdu_len).write(buf);
        buf.put_u8(req.function_code().value());
        match req {
            Request::ReadHoldingRegisters(addr, qty) | Request::ReadInputRegisters(addr, qty) => {
                buf.put_u16(*addr);
                buf.put_u16(*qty);
            }
            Request::WriteSingleRegister(addr, word) => {
                buf.put_u16(*addr);
                buf.put_u16(*word);
            }
            Request::WriteMultipleRegisters(addr, words) => {
                buf.put_u16(*addr);
                buf.put_u16(words.len() as u16);
                buf.put_u8((words.len() * 2) as u8);
                for &word in words.iter() {
                    buf.put_u16(word);
                }
            }
            Request::Custom(_, data) => buf.put_slice(data),
        }
        Ok(())
    }
}

/// Decodes responses on the client side.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientDecoder;

impl ClientDecoder {
    pub fn decode(buf: &[u8]) -> Result<(ResponseAdu, usize), DecodeError> {
        let (header, pdu) = split_frame(buf)?;
        let rsp = response_pdu(pdu[0], &pdu[1..])?;
        Ok((
            ResponseAdu {
                hdr: header.header(),
                pdu: rsp,
            },
            header.frame_len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(transaction_id: u16, unit_id: u8) -> Header {
        Header {
            transaction_id,
            unit_id,
        }
    }

    #[test]
    fn decode_read_holding_registers() {
        let bytes = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, // MBAP
            0x03, 0x00, 0x00, 0x00, 0x06, // 读 6 个寄存器
        ];
        let (adu, consumed) = ServerDecoder::decode(&bytes).unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(adu.hdr, hdr(1, 1));
        assert_eq!(adu.pdu.0, Request::ReadHoldingRegisters(0, 6));
    }

    #[test]
    fn decode_needs_at_least_eight_bytes() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01];
        assert_eq!(ServerDecoder::decode(&bytes), Err(DecodeError::Incomplete));
        assert_eq!(ServerDecoder::decode(&[]), Err(DecodeError::Incomplete));
    }

    #[test]
    fn decode_waits_for_the_whole_body() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00];
        assert_eq!(ServerDecoder::decode(&bytes), Err(DecodeError::Incomplete));
    }

    #[test]
    fn decode_rejects_foreign_protocol() {
        let bytes = [
            0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
        ];
        let err = ServerDecoder::decode(&bytes).unwrap_err();
        assert_eq!(err, DecodeError::InvalidProtocol(1));
        assert!(err.is_fatal());
    }

    #[test]
    fn decode_rejects_bad_length_field() {
        let too_short = [0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x03];
        assert_eq!(
            ServerDecoder::decode(&too_short),
            Err(DecodeError::InvalidLength(1))
        );

        let too_long = [0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03];
        assert_eq!(
            ServerDecoder::decode(&too_long),
            Err(DecodeError::InvalidLength(256))
        );
    }

    #[test]
    fn decode_rejects_length_disagreeing_with_function() {
        // 0x03 的请求体必须是 4 字节，这里长度字段声明了 6 字节
        let bytes = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB,
        ];
        assert_eq!(
            ServerDecoder::decode(&bytes),
            Err(DecodeError::InvalidBody {
                function: FunctionCode::ReadHoldingRegisters,
                len: 6,
            })
        );
    }

    #[test]
    fn decode_unknown_function_as_custom() {
        let bytes = [0x00, 0x09, 0x00, 0x00, 0x00, 0x04, 0x01, 0x2B, 0x0E, 0x01];
        let (adu, consumed) = ServerDecoder::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(adu.pdu.0, Request::Custom(0x2B, Cow::Owned(vec![0x0E, 0x01])));
    }

    #[test]
    fn decode_write_multiple_registers() {
        let bytes = [
            0x00, 0x02, 0x00, 0x00, 0x00, 0x0B, 0x01, // MBAP
            0x10, 0x00, 0x04, 0x00, 0x02, 0x04, // 地址 4，数量 2，字节数 4
            0x00, 0x0A, 0x01, 0x02,
        ];
        let (adu, _) = ServerDecoder::decode(&bytes).unwrap();
        assert_eq!(
            adu.pdu.0,
            Request::WriteMultipleRegisters(4, Cow::Owned(vec![0x000A, 0x0102]))
        );
    }

    #[test]
    fn decode_write_multiple_registers_with_wrong_byte_count() {
        let bytes = [
            0x00, 0x02, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0x00, 0x04, 0x00, 0x03, 0x04, 0x00,
            0x0A, 0x01, 0x02,
        ];
        assert!(matches!(
            ServerDecoder::decode(&bytes),
            Err(DecodeError::InvalidBody { .. })
        ));
    }

    #[test]
    fn decode_only_consumes_first_frame() {
        let bytes = [
            0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, // 第一帧
            0x00, 0x06, 0x00, 0x00, // 第二帧的一部分
        ];
        let (adu, consumed) = ServerDecoder::decode(&bytes).unwrap();
        assert_eq!(adu.hdr.transaction_id, 5);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn encode_read_holding_registers_response() {
        let adu = ResponseAdu {
            hdr: hdr(1, 1),
            pdu: Response::ReadHoldingRegisters(vec![123, 456, 789, 234, 567, 890]).into(),
        };
        let mut buf = BytesMut::new();
        ServerEncoder::encode(&adu, &mut buf);
        assert_eq!(
            &buf[..],
            &[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x0F, 0x01, // MBAP, 长度 = 3 + 2*6
                0x03, 0x0C, // 功能码 + 字节数
                0x00, 0x7B, 0x01, 0xC8, 0x03, 0x15, 0x00, 0xEA, 0x02, 0x37, 0x03, 0x7A,
            ]
        );
    }

    #[test]
    fn encode_exception_response() {
        let adu = ResponseAdu::exception(
            hdr(0x0102, 0x11),
            FunctionCode::ReadHoldingRegisters,
            ExceptionCode::IllegalDataAddress,
        );
        let mut buf = BytesMut::new();
        ServerEncoder::encode(&adu, &mut buf);
        assert_eq!(
            &buf[..],
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x03, 0x11, 0x83, 0x02]
        );
    }

    #[test]
    fn encode_write_responses() {
        let mut buf = BytesMut::new();
        ServerEncoder::encode(
            &ResponseAdu {
                hdr: hdr(3, 1),
                pdu: Response::WriteSingleRegister(2, 0xBEEF).into(),
            },
            &mut buf,
        );
        assert_eq!(
            &buf[..],
            &[0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x02, 0xBE, 0xEF]
        );

        buf.clear();
        ServerEncoder::encode(
            &ResponseAdu {
                hdr: hdr(4, 1),
                pdu: Response::WriteMultipleRegisters(2, 3).into(),
            },
            &mut buf,
        );
        assert_eq!(
            &buf[..],
            &[0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x01, 0x10, 0x00, 0x02, 0x00, 0x03]
        );
    }

    #[test]
    fn client_decodes_what_server_encodes() {
        let adu = ResponseAdu {
            hdr: hdr(0xFFFF, 7),
            pdu: Response::ReadInputRegisters(vec![0, 1, 65535]).into(),
        };
        let mut buf = BytesMut::new();
        ServerEncoder::encode(&adu, &mut buf);
        let (decoded, consumed) = ClientDecoder::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, adu);
    }

    #[test]
    fn client_decodes_exception() {
        let bytes = [0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        let (adu, _) = ClientDecoder::decode(&bytes).unwrap();
        assert_eq!(
            adu.pdu.0,
            Err(ExceptionResponse {
                function: FunctionCode::ReadHoldingRegisters,
                exception: ExceptionCode::IllegalDataAddress,
            })
        );
    }

    #[test]
    fn client_encodes_requests() {
        let mut buf = BytesMut::new();
        ClientEncoder::encode(
            &RequestAdu {
                hdr: hdr(1, 1),
                pdu: Request::ReadHoldingRegisters(0, 6).into(),
            },
            &mut buf,
        )
        .unwrap();
        assert_eq!(
            &buf[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x06]
        );

        buf.clear();
        let words = [0x000A, 0x0102];
        ClientEncoder::encode(
            &RequestAdu {
                hdr: hdr(2, 1),
                pdu: Request::WriteMultipleRegisters(4, Cow::Borrowed(&words[..])).into(),
            },
            &mut buf,
        )
        .unwrap();
        let (decoded, _) = ServerDecoder::decode(&buf).unwrap();
        assert_eq!(
            decoded.pdu.0,
            Request::WriteMultipleRegisters(4, Cow::Owned(words.to_vec()))
        );
    }

    #[test]
    fn client_rejects_oversized_writes() {
        let mut buf = BytesMut::new();
        let largest = vec![0x1234; usize::from(MAX_WRITE_QUANTITY)];
        ClientEncoder::encode(
            &RequestAdu {
                hdr: hdr(3, 1),
                pdu: Request::WriteMultipleRegisters(0, Cow::Owned(largest)).into(),
            },
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 6 + 2 * usize::from(MAX_WRITE_QUANTITY));
        assert_eq!(buf[12], 246);

        // 128 个字的字节数会截断成 0
        for len in [124, 128, 300] {
            let mut buf = BytesMut::new();
            let err = ClientEncoder::encode(
                &RequestAdu {
                    hdr: hdr(4, 1),
                    pdu: Request::WriteMultipleRegisters(0, Cow::Owned(vec![0; len])).into(),
                },
                &mut buf,
            )
            .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
            assert!(buf.is_empty());
        }

        let err = ClientEncoder::encode(
            &RequestAdu {
                hdr: hdr(5, 1),
                pdu: Request::Custom(0x2B, Cow::Owned(vec![0; 253])).into(),
            },
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
