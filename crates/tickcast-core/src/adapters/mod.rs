//! Upstream bar providers.

mod synthetic;
mod yahoo;

use std::sync::Arc;

pub use synthetic::SyntheticProvider;
pub use yahoo::YahooProvider;

use crate::config::{ProviderKind, SourceConfig};
use crate::data_source::BarProvider;

/// Build the provider named by `config`.
pub fn provider_from_config(config: &SourceConfig) -> Arc<dyn BarProvider> {
    match config.provider {
        ProviderKind::Yahoo => {
            let mut provider = YahooProvider::default().with_request_timeout(config.request_timeout());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::Synthetic => Arc::new(SyntheticProvider::new()),
    }
}
