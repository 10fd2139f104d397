//! gRPC plumbing for carrying the bus between processes.

pub mod server;

pub mod proto {
    tonic::include_proto!("catalog.bus.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("bus_descriptor");
}

pub use server::{BusServer, GrpcServerBuilder};
