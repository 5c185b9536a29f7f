use crate::errors::ScalazapError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`            printed normally via `&self.field_name`
/// - `redact(field_name)`    `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a webhook delivery may spend processing before it is
    /// acknowledged anyway. Processing continues in the background.
    #[serde(default = "default_ack_timeout_ms", rename = "ackTimeoutMs")]
    pub ack_timeout_ms: u64,
    /// Webhook bodies larger than this are logged truncated and not processed.
    #[serde(default = "default_max_body_bytes", rename = "maxBodyBytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ---------------------------------------------------------------------------
// WhatsApp Cloud API
// ---------------------------------------------------------------------------

/// How the `hub.verify_token` of a verification probe is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyTokenMode {
    /// The probe token must equal the configured token.
    #[default]
    Exact,
    /// The probe token must start with the configured token. Lets several
    /// tenants share one endpoint with `<token><tenant-suffix>` tokens.
    Prefix,
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_api_version() -> String {
    "v21.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default, rename = "verifyToken")]
    pub verify_token: String,
    #[serde(default, rename = "verifyTokenMode")]
    pub verify_token_mode: VerifyTokenMode,
    /// Meta app secret. When set, `X-Hub-Signature-256` is checked on every
    /// event delivery.
    #[serde(default, rename = "appSecret")]
    pub app_secret: String,
    #[serde(default = "default_graph_api_base", rename = "graphApiBase")]
    pub graph_api_base: String,
    #[serde(default = "default_api_version", rename = "apiVersion")]
    pub api_version: String,
    #[serde(
        default = "default_request_timeout_secs",
        rename = "requestTimeoutSecs"
    )]
    pub request_timeout_secs: u64,
}

redact_debug!(
    WhatsAppConfig,
    redact(verify_token),
    verify_token_mode,
    redact(app_secret),
    graph_api_base,
    api_version,
    request_timeout_secs,
);

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            verify_token: String::new(),
            verify_token_mode: VerifyTokenMode::default(),
            app_secret: String::new(),
            graph_api_base: default_graph_api_base(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacerKind {
    /// Sleep exactly `delayMs` before every item but the first.
    #[default]
    Fixed,
    /// GCRA rate limiter allowing one send per `delayMs`.
    Quota,
}

/// Upper bound for any inter-send delay, configured or per request.
pub const MAX_DELAY_MS: u64 = 600_000;

fn default_delay_ms() -> u64 {
    3000
}

fn default_max_batch_size() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_delay_ms", rename = "defaultDelayMs")]
    pub default_delay_ms: u64,
    #[serde(default)]
    pub pacer: PacerKind,
    #[serde(default = "default_max_batch_size", rename = "maxBatchSize")]
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            pacer: PacerKind::default(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest / store
// ---------------------------------------------------------------------------

fn default_dedup_cache_size() -> usize {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Capacity of the in-process LRU of recently seen message IDs.
    #[serde(default = "default_dedup_cache_size", rename = "dedupCacheSize")]
    pub dedup_cache_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_cache_size: default_dedup_cache_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Defaults to `$SCALAZAP_HOME/scalazap.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> anyhow::Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(crate::utils::get_scalazap_home()?.join("scalazap.db")),
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ScalazapError> {
        self.validate_gateway()?;
        self.validate_whatsapp()?;
        self.validate_dispatch()?;
        self.validate_ingest()?;
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), ScalazapError> {
        let g = &self.gateway;
        if g.port == 0 {
            return Err(ScalazapError::Config("gateway.port must be > 0".into()));
        }
        if g.ack_timeout_ms == 0 {
            return Err(ScalazapError::Config(
                "gateway.ackTimeoutMs must be > 0".into(),
            ));
        }
        if g.ack_timeout_ms > 20_000 {
            // The provider gives up on a delivery after roughly 20 seconds
            return Err(ScalazapError::Config(
                "gateway.ackTimeoutMs must be <= 20000".into(),
            ));
        }
        if g.max_body_bytes < 1024 {
            return Err(ScalazapError::Config(
                "gateway.maxBodyBytes must be >= 1024".into(),
            ));
        }
        Ok(())
    }

    fn validate_whatsapp(&self) -> Result<(), ScalazapError> {
        let w = &self.whatsapp;
        let parsed = url::Url::parse(&w.graph_api_base).map_err(|e| {
            ScalazapError::Config(format!("whatsapp.graphApiBase is not a valid URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScalazapError::Config(
                "whatsapp.graphApiBase must use http or https".into(),
            ));
        }
        if parsed.scheme() == "http"
            && !parsed
                .host_str()
                .is_some_and(|h| h == "localhost" || h.starts_with("127."))
        {
            warn!(
                "whatsapp.graphApiBase uses plain http ({}), access tokens will travel unencrypted",
                w.graph_api_base
            );
        }
        if w.api_version.is_empty() || w.api_version.contains('/') {
            return Err(ScalazapError::Config(
                "whatsapp.apiVersion must be a single path segment such as v21.0".into(),
            ));
        }
        if w.request_timeout_secs == 0 {
            return Err(ScalazapError::Config(
                "whatsapp.requestTimeoutSecs must be > 0".into(),
            ));
        }
        if w.verify_token.is_empty() {
            warn!("whatsapp.verifyToken is empty, webhook verification probes will be rejected");
        } else if w.verify_token_mode == VerifyTokenMode::Prefix && w.verify_token.len() < 8 {
            warn!("whatsapp.verifyToken is short for prefix mode, any token with it as a prefix passes");
        }
        Ok(())
    }

    fn validate_dispatch(&self) -> Result<(), ScalazapError> {
        let d = &self.dispatch;
        if d.default_delay_ms > MAX_DELAY_MS {
            return Err(ScalazapError::Config(format!(
                "dispatch.defaultDelayMs is unreasonably large (> {})",
                MAX_DELAY_MS
            )));
        }
        if d.pacer == PacerKind::Quota && d.default_delay_ms == 0 {
            return Err(ScalazapError::Config(
                "dispatch.defaultDelayMs must be > 0 with the quota pacer".into(),
            ));
        }
        if d.max_batch_size == 0 {
            return Err(ScalazapError::Config(
                "dispatch.maxBatchSize must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_ingest(&self) -> Result<(), ScalazapError> {
        if self.ingest.dedup_cache_size == 0 {
            return Err(ScalazapError::Config(
                "ingest.dedupCacheSize must be > 0".into(),
            ));
        }
        Ok(())
    }
}
