//! JobLink protocol definitions
//!
//! Protobuf messages and the generated `JobService` client/server for the
//! node-to-node relay stream.

pub mod v1 {
    #[allow(warnings)]
    tonic::include_proto!("joblink.v1");
}

pub use v1::job_service_client::JobServiceClient;
pub use v1::job_service_server::{JobService, JobServiceServer};
pub use v1::{Job, Passphrase};
