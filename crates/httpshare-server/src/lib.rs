pub mod certs;
pub mod consent;
pub mod dirs;
pub mod endpoint;
pub mod handlers;
pub mod limit;
pub mod namer;
pub mod registry;
pub mod resolve;
pub mod server;
pub mod tofc;

pub use certs::{issue, CertError, CertificateMaterial, Fingerprint, ReusePolicy};
pub use consent::{ConsentDesk, ConsentRequest};
pub use endpoint::{Endpoint, Target, Visibility};
pub use namer::EndpointId;
pub use registry::{AccessPolicy, EndpointRegistry, RegistryError, UPLOAD_PATH};
pub use server::{build_registry, run, ServerConfig};
pub use tofc::TrustGate;
