use std::{
    borrow::Cow,
    error,
    fmt::{self, Display},
};

pub(crate) mod protocol_error;
pub use self::protocol_error::ProtocolError;

pub mod tcp;
pub use self::tcp::{Header, RequestAdu, ResponseAdu, TransactionId, UnitId};

/// Zero-based register address.
pub type Address = u16;

pub type Quantity = u16;

pub type Word = u16;

/// Largest quantity accepted by read holding/input registers.
pub const MAX_READ_QUANTITY: Quantity = 125;

/// Largest quantity accepted by write multiple registers.
pub const MAX_WRITE_QUANTITY: Quantity = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// 0x03
    ReadHoldingRegisters,
    /// 0x04
    ReadInputRegisters,
    /// 0x06
    WriteSingleRegister,
    /// 0x10
    WriteMultipleRegisters,
    /// Any code the server does not implement.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x06 => Self::WriteSingleRegister,
            0x10 => Self::WriteMultipleRegisters,
            other => Self::Custom(other),
        }
    }

    /// 功能码在报文中的字节值
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleRegisters => 0x10,
            Self::Custom(code) => code,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.value())
    }
}

/// A request PDU as decoded by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// 读取保持寄存器 (0x03)
    ReadHoldingRegisters(Address, Quantity),

    /// 读取输入寄存器 (0x04)
    ReadInputRegisters(Address, Quantity),

    /// 写单个保持寄存器 (0x06)
    WriteSingleRegister(Address, Word),

    /// 写多个保持寄存器 (0x10)
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),

    /// Unsupported function code with its raw payload.
    Custom(u8, Cow<'a, [u8]>),
}

impl<'a> Request<'a> {
    /// 将请求转换为'owned'的实例（静态生命周期）
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;
        match self {
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            Custom(code, data) => Custom(code, Cow::Owned(data.into_owned())),
        }
    }

    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;
        match self {
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
}

impl Response {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
        }
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetDevice,
    /// None of the above.
    ///
    /// Although encoding one of the predefined values as this is possible, it is not recommended.
    /// Instead, prefer to use [`Self::new()`] to prevent such ambiguities.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    /// Create a new [`ExceptionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPdu<'a>(pub Request<'a>);

impl<'a> From<Request<'a>> for RequestPdu<'a> {
    fn from(from: Request<'a>) -> Self {
        RequestPdu(from)
    }
}

impl<'a> From<RequestPdu<'a>> for Request<'a> {
    fn from(from: RequestPdu<'a>) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu(pub Result<Response, ExceptionResponse>);

impl ResponsePdu {
    /// Function code byte as written on the wire, with the exception bit set
    /// for exception responses.
    #[must_use]
    pub fn wire_function_code(&self) -> u8 {
        match &self.0 {
            Ok(rsp) => rsp.function_code().value(),
            Err(exc) => exc.function.value() | 0x80,
        }
    }
}

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {
    fn description(&self) -> &str {
        self.description()
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {
    fn description(&self) -> &str {
        self.exception.description()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_function_code() {
        assert_eq!(FunctionCode::ReadHoldingRegisters, FunctionCode::new(0x03));
        assert_eq!(FunctionCode::ReadInputRegisters, FunctionCode::new(0x04));
        assert_eq!(FunctionCode::WriteSingleRegister, FunctionCode::new(0x06));
        assert_eq!(FunctionCode::WriteMultipleRegisters, FunctionCode::new(0x10));
        assert_eq!(FunctionCode::Custom(0x01), FunctionCode::new(0x01));
    }

    #[test]
    fn function_code_values() {
        for code in [0x01, 0x03, 0x04, 0x06, 0x10, 0x2B] {
            assert_eq!(FunctionCode::new(code).value(), code);
        }
        assert_eq!(FunctionCode::ReadHoldingRegisters.to_string(), "0x03");
    }

    #[test]
    fn exception_code_values() {
        assert_eq!(u8::from(ExceptionCode::IllegalFunction), 0x01);
        assert_eq!(u8::from(ExceptionCode::IllegalDataAddress), 0x02);
        assert_eq!(u8::from(ExceptionCode::IllegalDataValue), 0x03);
        assert_eq!(ExceptionCode::new(0x0B), ExceptionCode::GatewayTargetDevice);
        assert_eq!(ExceptionCode::new(0x42), ExceptionCode::Custom(0x42));
    }

    #[test]
    fn wire_function_code_sets_exception_bit() {
        let ok = ResponsePdu::from(Response::ReadHoldingRegisters(vec![1]));
        assert_eq!(ok.wire_function_code(), 0x03);

        let err = ResponsePdu::from(ExceptionResponse {
            function: FunctionCode::ReadHoldingRegisters,
            exception: ExceptionCode::IllegalDataAddress,
        });
        assert_eq!(err.wire_function_code(), 0x83);
    }

    #[test]
    fn request_into_owned_keeps_payload() {
        let words = [1u16, 2, 3];
        let req = Request::WriteMultipleRegisters(7, Cow::Borrowed(&words[..]));
        let owned = req.clone().into_owned();
        assert_eq!(req, owned);
        assert_eq!(owned.function_code(), FunctionCode::WriteMultipleRegisters);
    }
}
