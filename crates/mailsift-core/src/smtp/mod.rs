//! SMTP server module

mod handler;
mod server;

pub use handler::{normalize_sender, RelayHandler};
pub use server::SmtpListener;
