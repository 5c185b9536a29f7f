use super::schema::Config;

macro_rules! define_credentials {
    ($( $name:literal, $env:literal => $($path:ident).+ );* $(;)?) => {
        /// All known credential slot names.
        pub const CREDENTIAL_NAMES: &[&str] = &[$($name),*];

        /// (slot name, env var name) pairs.
        pub const CREDENTIAL_ENV_VARS: &[(&str, &str)] = &[$(($name, $env)),*];

        /// Get the current value of a credential field by slot name.
        pub fn get_credential_value<'a>(config: &'a Config, name: &str) -> Option<&'a str> {
            match name {
                $($name => Some(config.$($path).+.as_str()),)*
                _ => None,
            }
        }

        /// Apply environment variable overrides.
        ///
        /// Any `SCALAZAP_*` env var that is set and non-empty overwrites the
        /// corresponding config field, so secrets can be injected without
        /// touching the config file.
        pub fn apply_env_overrides(config: &mut Config) {
            $(
                if let Ok(val) = std::env::var($env) {
                    if !val.is_empty() {
                        config.$($path).+ = val;
                    }
                }
            )*
        }
    };
}

define_credentials! {
    "whatsapp-verify-token", "SCALAZAP_WHATSAPP_VERIFY_TOKEN" => whatsapp.verify_token;
    "whatsapp-app-secret",   "SCALAZAP_WHATSAPP_APP_SECRET"   => whatsapp.app_secret;
}

/// Which credential slots currently hold a value, for `scalazap status`.
pub fn credential_summary(config: &Config) -> Vec<(&'static str, bool)> {
    CREDENTIAL_NAMES
        .iter()
        .map(|&name| {
            let set = get_credential_value(config, name).is_some_and(|v| !v.is_empty());
            (name, set)
        })
        .collect()
}
