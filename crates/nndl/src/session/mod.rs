//! Delivery session negotiation.
//!
//! A session is created by posting an XML [`SessionSpec`] document to the
//! session API and kept alive by periodically echoing the server's own
//! `<session>` element back to it.

mod document;
mod negotiator;
mod spec;

pub use document::{SessionDocument, parse_session_response};
pub use negotiator::{SessionHandle, SessionNegotiator, SessionState, renewal_interval};
pub use spec::{ApiUrl, AuthTypes, SessionApiInfo, SessionSpec};
