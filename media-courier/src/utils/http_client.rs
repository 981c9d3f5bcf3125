use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` used for transfer endpoint calls.
///
/// Uploads of large parts can take minutes, so only the connect phase is
/// bounded here; per-request timeouts are set by the caller.
pub fn build_transfer_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}
