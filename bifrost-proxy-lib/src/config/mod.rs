#![forbid(unsafe_code)]

mod loader;
mod types;

pub use loader::{build_table, load_from_path};
pub use types::{
    Config, Dot1qConfig, EgressConfig, ExecConfig, FilterConfig, IfaceConfig, IngressConfig,
};
