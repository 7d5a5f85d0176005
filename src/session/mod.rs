//! Cookie-bound sessions with filesystem persistence.

pub mod session;
pub mod store;

pub use session::Session;
pub use store::{
    generate_session_id, FilesystemSessionStore, SessionStore, SESSION_ID_LEN, SESSION_MAX_AGE,
};
