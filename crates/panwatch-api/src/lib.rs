// panwatch-api: Async client for the firewall XML management API

pub mod client;
pub mod commands;
pub mod element;
pub mod error;
pub mod transport;

pub use client::XmlApiClient;
pub use element::ApiElement;
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
