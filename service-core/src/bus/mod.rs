//! Address-keyed request/reply messaging between deployable units.
//!
//! A caller hands an [`Envelope`] (address, action, JSON body) to a
//! [`Dispatcher`] and gets back exactly one [`Reply`]: either a JSON payload or
//! a typed [`ServiceFailure`]. Two dispatchers exist:
//!
//! - [`EventBus`] delivers to a [`Consumer`] registered in the same process.
//! - [`RemoteBus`] carries the envelope over gRPC to an `EventBus` hosted by
//!   another process (see [`BusGrpcService`]).
//!
//! Callers only see the `Dispatcher` trait, so the same client code works with
//! either transport.

pub mod envelope;
pub mod local;
pub mod remote;

pub use envelope::{Dispatcher, Envelope, FailureKind, Reply, ServiceFailure};
pub use local::{Consumer, ConsumerHandle, EventBus};
pub use remote::{BusGrpcService, RemoteBus};
