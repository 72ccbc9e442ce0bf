use super::*;

pub type TransactionId = u16;
pub type UnitId = u8;

/// The part of the MBAP header that a response must echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu<'a> {
    pub hdr: Header,
    pub pdu: RequestPdu<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub hdr: Header,
    pub pdu: ResponsePdu,
}

impl<'a> RequestAdu<'a> {
    #[must_use]
    pub fn into_owned(self) -> RequestAdu<'static> {
        RequestAdu {
            hdr: self.hdr,
            pdu: RequestPdu(self.pdu.0.into_owned()),
        }
    }
}

impl ResponseAdu {
    /// Builds an exception response for `function`, echoing `hdr`.
    #[must_use]
    pub fn exception(hdr: Header, function: FunctionCode, exception: ExceptionCode) -> Self {
        Self {
            hdr,
            pdu: ExceptionResponse {
                function,
                exception,
            }
            .into(),
        }
    }
}

impl<'a> From<RequestAdu<'a>> for Request<'a> {
    fn from(from: RequestAdu<'a>) -> Self {
        from.pdu.into()
    }
}
