//! Postgres frontend/backend protocol (v3)
//!
//! Covers the subset the session needs: startup and authentication, the
//! simple query protocol, the unnamed-statement extended protocol and
//! termination.

pub mod constants;
mod decode;
mod encode;
mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription, FrontendMessage};
