//! `sabr_client`: a SABR (Server Adaptive Bitrate) audio streaming client.
//! Fetches one complete audio track over YouTube's framed UMP
//! request/response protocol and writes it to a file. See `fetch()`.

pub mod config;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod output;
pub mod proto;
pub mod request;
pub mod session;
pub mod ump;
pub mod varint;

pub use config::{FetchConfig, FetchOutcome};
pub use driver::{fetch, fetch_with_transport, ReqwestTransport, Transport, TransportResponse};
pub use error::SabrError;
