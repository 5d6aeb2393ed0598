//! Typed provider configuration built at the registry boundary from a raw key/value map,
//! replacing the recursive string/any maps the original gateway passed straight to adapters.

use std::collections::BTreeMap;

use serde_json::Value;
use smol_str::SmolStr;

/// Key fragments (case-folded, punctuation-stripped) that mark a config value as sensitive.
/// A key is redacted if any fragment appears as a substring of its folded form.
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "secret",
    "passphrase",
    "apikey",
    "wsapikey",
    "wssecret",
    "privatekey",
    "privkey",
    "token",
    "password",
    "clientsecret",
    "accesskey",
    "accesstoken",
];

/// Two revisions of the source gateway disagreed on `adapter.identifier` vs
/// `exchange.identifier`; both are accepted here and coerced to one canonical field.
const IDENTIFIER_ALIASES: &[&str] = &["adapter.identifier", "exchange.identifier"];

fn fold_key(key: &str) -> String {
    key.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase()
}

fn is_sensitive_key(key: &str) -> bool {
    let folded = fold_key(key);
    SENSITIVE_FRAGMENTS.iter().any(|fragment| folded.contains(fragment))
}

/// A provider's opaque config map, coerced into a small typed wrapper at the registry
/// boundary. Held as a `BTreeMap` so sanitised projections are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    raw: BTreeMap<String, Value>,
}

impl ProviderConfig {
    pub fn new(raw: BTreeMap<String, Value>) -> Self {
        Self { raw }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Resolves the adapter identifier from whichever alias is present, preferring
    /// `adapter.identifier` when both are set.
    pub fn adapter_identifier(&self) -> Option<SmolStr> {
        IDENTIFIER_ALIASES.iter().find_map(|alias| self.get_str(alias)).map(SmolStr::new)
    }

    /// Returns a copy of the config map with every sensitive-looking key blanked, safe to
    /// expose through the provider metadata projection.
    pub fn sanitized(&self) -> BTreeMap<String, Value> {
        self.raw
            .iter()
            .map(|(key, value)| {
                if is_sensitive_key(key) {
                    (key.clone(), Value::String("***".to_string()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, Value)]) -> ProviderConfig {
        ProviderConfig::new(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn adapter_identifier_prefers_the_adapter_alias() {
        let cfg = config(&[("adapter.identifier", json!("binance")), ("exchange.identifier", json!("bybit"))]);
        assert_eq!(cfg.adapter_identifier().as_deref(), Some("binance"));
    }

    #[test]
    fn adapter_identifier_falls_back_to_the_exchange_alias() {
        let cfg = config(&[("exchange.identifier", json!("bybit"))]);
        assert_eq!(cfg.adapter_identifier().as_deref(), Some("bybit"));
    }

    #[test]
    fn sanitized_redacts_keys_matching_sensitive_fragments_case_and_punctuation_insensitively() {
        let cfg = config(&[
            ("api_key", json!("abc123")),
            ("WS-Secret", json!("shh")),
            ("symbol", json!("BTCUSDT")),
        ]);
        let sanitized = cfg.sanitized();
        assert_eq!(sanitized["api_key"], json!("***"));
        assert_eq!(sanitized["WS-Secret"], json!("***"));
        assert_eq!(sanitized["symbol"], json!("BTCUSDT"));
    }
}
