//! Configuration loading for the relay gateway.
//!
//! Config is discovered from `./relay.{toml,yaml,yml,json}` and then
//! `~/.config/relay/`, with `${ENV_VAR}` placeholders substituted before
//! parsing. Every section has defaults, so an absent file is not an error.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, config_dir, data_dir, discover_and_load, load_config, set_config_dir},
    schema::{
        DispatchConfig, GatewayConfig, ProviderConfig, ProviderKind, RelayConfig, SessionConfig,
    },
};
