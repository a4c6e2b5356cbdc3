mod audit;
mod registry;
mod tarball;
mod transport;
pub mod version;

pub use audit::NpmAuditSource;
pub use registry::{DEFAULT_DOWNLOADS_API_BASE_URL, DEFAULT_REGISTRY_BASE_URL, NpmRegistryClient};
pub use tarball::{download_and_extract, unpack};
pub use transport::reqwest_transport_error;
