//! Client core for the recruiting platform: resilient API access with a shared
//! reachability signal, session and role resolution, and conversation sync.

pub mod cli;
pub mod core;
pub mod messaging;
pub mod session;
pub mod types;
pub mod utils;

pub use crate::core::{
    ApiResult, ClientError, ConfigManager, ConnectionStatus, ConnectivitySignal, RetryPolicy,
    ServiceClient,
};
pub use crate::messaging::{ChatSynchronizer, ChatView, Inbox, MessagingClient, SyncPhase};
pub use crate::session::{AuthSnapshot, Role, Session, SessionResolver};
