pub mod error;
pub mod types;

pub use error::{Error, Result};

/// Generated message types, client and server for the `scooter` package.
pub mod proto {
    tonic::include_proto!("scooter");

    /// Encoded descriptor set, registered with the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("scooter_descriptor");
}
