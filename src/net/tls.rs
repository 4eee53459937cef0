//! TLS configuration and certificate loading for secure listeners.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::net::listener::ListenerError;

/// Load TLS configuration from PEM certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, ListenerError> {
    for path in [cert_path, key_path] {
        if !path.exists() {
            return Err(ListenerError::TlsFileMissing(path.to_path_buf()));
        }
    }

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(ListenerError::Tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_reported() {
        let err = load_tls_config(Path::new("/nonexistent/host.cert"), Path::new("/nonexistent/host.key"))
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::TlsFileMissing(ref p) if p.ends_with("host.cert")));
    }
}
