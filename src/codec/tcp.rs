use bytes::{Buf, BytesMut};
use log;
use std::io::Result;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{RequestAdu, ResponseAdu};

use super::{ClientDecoder, ClientEncoder, DecodeError, ServerDecoder, ServerEncoder};

/// Frames requests and responses for one server connection.
#[derive(Debug, Default)]
pub struct ServerCodec;

/// Frames requests and responses for one client connection.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ServerCodec {
    type Item = RequestAdu<'static>;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu<'static>>> {
        match ServerDecoder::decode(buf) {
            Ok((adu, frame_len)) => {
                log::debug!("Server received frame: {:02X?}", &buf[..frame_len]);
                buf.advance(frame_len);
                Ok(Some(adu))
            }
            Err(DecodeError::Incomplete) => {
                log::trace!("Need more data: buf.len()={}", buf.len());
                Ok(None)
            }
            Err(err) => {
                log::debug!("Undecodable request buffer: {:02X?}", &buf[..]);
                Err(err.into())
            }
        }
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = std::io::Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let start = buf.len();
        ServerEncoder::encode(&adu, buf);
        log::debug!("Server encoded frame: {:02X?}", &buf[start..]);
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        match ClientDecoder::decode(buf) {
            Ok((adu, frame_len)) => {
                buf.advance(frame_len);
                Ok(Some(adu))
            }
            Err(DecodeError::Incomplete) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = std::io::Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<()> {
        ClientEncoder::encode(&adu, buf)
    }
}
