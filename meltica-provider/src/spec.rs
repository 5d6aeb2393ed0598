//! Provider creation/update requests (component C9).

use smol_str::SmolStr;

use crate::config::ProviderConfig;

/// A caller-supplied description of a provider to create or update. Name and adapter
/// identifier are trimmed and stored verbatim otherwise; [`ProviderConfig::adapter_identifier`]
/// is consulted only when `adapter_identifier` here is empty.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name: SmolStr,
    pub adapter_identifier: SmolStr,
    pub config: ProviderConfig,
}

impl ProviderSpec {
    pub fn new(name: impl AsRef<str>, adapter_identifier: impl AsRef<str>, config: ProviderConfig) -> Self {
        Self { name: SmolStr::new(name.as_ref().trim()), adapter_identifier: SmolStr::new(adapter_identifier.as_ref().trim()), config }
    }

    /// Resolves the adapter identifier, falling back to whichever alias the config carries.
    pub fn resolved_adapter_identifier(&self) -> SmolStr {
        if !self.adapter_identifier.is_empty() {
            self.adapter_identifier.clone()
        } else {
            self.config.adapter_identifier().unwrap_or_default()
        }
    }
}
