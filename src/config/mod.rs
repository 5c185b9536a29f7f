pub mod credentials;
pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    Config, DispatchConfig, MAX_DELAY_MS, GatewayConfig, IngestConfig, PacerKind, StoreConfig,
    VerifyTokenMode, WhatsAppConfig,
};
