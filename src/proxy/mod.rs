// src/proxy/mod.rs
mod endpoint;
mod forward;
mod proxy;
mod stream;

pub use forward::{build_client, ProxyClient};
pub use proxy::Proxy;
pub use stream::FlushPolicy;
