pub mod client;
pub mod types;

pub use client::{Fetcher, OriginClient};
pub use types::{Destination, Request, Response, ResponseType};
