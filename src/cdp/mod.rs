//! Minimal Chrome DevTools Protocol client

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use transport::{launch_chrome, Transport};
pub use types::{MouseEvent, MouseEventType};
