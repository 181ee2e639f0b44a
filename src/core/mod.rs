// src/core/mod.rs
//! Connectivity core: configuration, transport, resilient client and the shared signals

pub mod config_manager;
pub mod connectivity;
pub mod error;
pub mod health;
pub mod observable;
pub mod service_client;
pub mod transport;

pub use config_manager::{ConfigManager, EnvStatus};
pub use connectivity::{ConnectionStatus, ConnectivitySignal};
pub use error::{ApiResult, ClientError};
pub use observable::{Observable, Subscription};
pub use service_client::{RetryPolicy, ServiceClient};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError, UploadFile};
