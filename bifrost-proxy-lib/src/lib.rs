pub mod b64;
pub mod config;
pub mod error;
pub mod iface;
pub mod packet;
pub mod process;
pub mod proxy;

pub use config::{load_from_path, Config};
pub use error::{ProxyError, Result};
pub use iface::Iface;
pub use packet::{EapolPacket, MacAddr, Tci};
pub use proxy::Proxy;
