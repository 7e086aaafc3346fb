//! TFTP side of the boot server.
//!
//! A small read-only TFTP engine plus the dispatcher mapping request
//! paths `<mac>/<firmware code>` onto preloaded boot images.

mod images;
mod server;

pub use images::{parse_path, ImageDispatcher, ImageMap};
pub use server::{TftpServer, TransferHandler};
