//! Modbus TCP server side: the request dispatcher and the connection loop.

pub mod dispatcher;
pub mod fault;
pub mod service;
pub mod tcp;

pub use self::{
    dispatcher::Dispatcher,
    fault::{FaultPolicy, FaultPolicyError, SimulatedFault},
    service::Service,
    tcp::{Server, Terminated},
};
