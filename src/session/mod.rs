// src/session/mod.rs
pub mod claims;
pub mod resolver;

pub use claims::{Role, Session};
pub use resolver::{
    AuthEvent, AuthSnapshot, Identity, IdentityProvider, SessionResolver, StaticTokenProvider,
};
