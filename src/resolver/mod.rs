//! Picks the credentials an outbound send goes out with.

use crate::errors::{ScalazapError, ScalazapResult};
use crate::models::{Connection, ConnectionStatus, Credentials};
use crate::store::MessageStore;
use serde::Deserialize;
use tracing::debug;

/// Caller-supplied hints, in order of precedence.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSelector {
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
}

impl std::fmt::Debug for ConnectionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSelector")
            .field("phone_number_id", &self.phone_number_id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("connection_id", &self.connection_id)
            .field("company_id", &self.company_id)
            .finish()
    }
}

/// `Some` when the value has non-whitespace content. The value itself is
/// returned untouched.
fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.trim().is_empty())
}

impl ConnectionSelector {
    pub fn for_connection(id: impl Into<String>) -> Self {
        Self {
            connection_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Resolve to concrete credentials.
    ///
    /// 1. explicit phone-number-id plus access token, used as-is;
    /// 2. the named connection;
    /// 3. the first `connected` connection, scoped to the company if given.
    pub async fn resolve(&self, store: &dyn MessageStore) -> ScalazapResult<Credentials> {
        if let (Some(phone_number_id), Some(access_token)) = (
            non_empty(self.phone_number_id.as_ref()),
            non_empty(self.access_token.as_ref()),
        ) {
            debug!("resolver: using explicit credentials for {}", phone_number_id);
            return Ok(Credentials {
                phone_number_id: phone_number_id.to_string(),
                access_token: access_token.to_string(),
            });
        }

        let connection_id = non_empty(self.connection_id.as_ref()).map(str::trim);
        let connection = if let Some(id) = connection_id {
            store.get_connection(id).await?.ok_or_else(|| {
                ScalazapError::NoConnection(format!("connection {} not found", id))
            })?
        } else {
            let company = non_empty(self.company_id.as_ref()).map(str::trim);
            store.first_connected(company).await?.ok_or_else(|| {
                ScalazapError::NoConnection(match company {
                    Some(c) => format!("no connected connection for company {}", c),
                    None => "no connected connection available".to_string(),
                })
            })?
        };

        credentials_from(&connection)
    }
}

fn credentials_from(connection: &Connection) -> ScalazapResult<Credentials> {
    if connection.access_token.trim().is_empty() || connection.phone_number_id.trim().is_empty() {
        return Err(ScalazapError::NoConnection(format!(
            "connection {} has no credentials",
            connection.id
        )));
    }
    if connection.status != ConnectionStatus::Connected {
        debug!(
            "resolver: using connection {} with status {}",
            connection.id,
            connection.status.as_str()
        );
    }
    Ok(Credentials {
        phone_number_id: connection.phone_number_id.clone(),
        access_token: connection.access_token.clone(),
    })
}
