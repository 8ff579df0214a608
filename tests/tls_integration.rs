//! Integration tests for TLS transport
//!
//! These tests verify TLS connection establishment against ClickHouse's secure
//! native port, certificate verification, and plugin configuration with TLS
//! material.
//!
//! To run these tests locally:
//! ```bash
//! # Secure native port with a self-signed certificate
//! export TLS_TEST_CLICKHOUSE_URL="tcp://localhost:9440?username=default"
//! export TLS_TEST_CA_PATH="/path/to/ca.crt"  # Optional: custom CA cert
//! export TLS_TEST_INSECURE="true"            # Allow self-signed for dev/test
//!
//! cargo test --test tls_integration -- --ignored --nocapture
//! ```

#[cfg(test)]
mod tls_integration {
    use clickhouse_dbplugin::client::{
        ClickhousePlugin, ConnectionString, Database, InitializeRequest,
    };
    use clickhouse_dbplugin::connection::{Connection, TlsConfig};
    use serde_json::json;
    use std::env;

    /// TLS test configuration from environment
    fn get_tls_test_config() -> Option<(String, bool)> {
        let url = env::var("TLS_TEST_CLICKHOUSE_URL").ok()?;
        let insecure = env::var("TLS_TEST_INSECURE")
            .ok()
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        Some((url, insecure))
    }

    fn ca_pem() -> Option<String> {
        let path = env::var("TLS_TEST_CA_PATH").ok()?;
        std::fs::read_to_string(path).ok()
    }

    fn tls_config(insecure: bool) -> TlsConfig {
        let mut builder = TlsConfig::builder().danger_accept_invalid_certs(insecure);
        if let Some(pem) = ca_pem() {
            builder = builder.ca_pem(pem);
        }
        builder.build().expect("TLS config")
    }

    /// TLS connection succeeds and can run a query
    #[tokio::test]
    #[ignore] // Requires ClickHouse with a secure native port
    async fn test_tls_connection_succeeds() {
        let (url, insecure) = match get_tls_test_config() {
            Some(cfg) => cfg,
            None => {
                eprintln!("Skipping test: TLS_TEST_CLICKHOUSE_URL not set");
                return;
            }
        };

        let tls = tls_config(insecure);
        let options = ConnectionString::parse(&url)
            .expect("parse")
            .with_tls(insecure)
            .to_connect_options(Some(&tls))
            .expect("options");

        let mut conn = Connection::connect(&options).await.expect("TLS connect");
        conn.execute("SELECT 1").await.expect("query over TLS");
        conn.close().await.expect("close");
        println!("✓ TLS connection succeeded");
    }

    /// `secure=true` in the DSN is enough to enable TLS
    #[tokio::test]
    #[ignore] // Requires ClickHouse with a secure native port
    async fn test_tls_via_connection_string() {
        let (url, insecure) = match get_tls_test_config() {
            Some(cfg) => cfg,
            None => {
                eprintln!("Skipping test: TLS_TEST_CLICKHOUSE_URL not set");
                return;
            }
        };

        let dsn = ConnectionString::parse(&url)
            .expect("parse")
            .with_tls(insecure)
            .build()
            .expect("build");
        assert!(dsn.contains("secure=true"));

        let options = ConnectionString::parse(&dsn)
            .and_then(|c| c.to_connect_options(None))
            .expect("options");
        match Connection::connect(&options).await {
            Ok(mut conn) => {
                conn.ping().await.expect("ping over TLS");
                println!("✓ TLS via connection string succeeded");
            }
            Err(e) => {
                // A custom CA is only honoured through TlsConfig
                eprintln!("Note: system roots rejected the server certificate: {}", e);
            }
        }
    }

    /// Plugin initialize verifies connectivity with TLS material from config
    #[tokio::test]
    #[ignore] // Requires ClickHouse with a secure native port
    async fn test_plugin_initialize_with_tls_ca() {
        let (url, insecure) = match get_tls_test_config() {
            Some(cfg) => cfg,
            None => {
                eprintln!("Skipping test: TLS_TEST_CLICKHOUSE_URL not set");
                return;
            }
        };
        let ca = match ca_pem() {
            Some(pem) => pem,
            None => {
                eprintln!("Skipping test: TLS_TEST_CA_PATH not set");
                return;
            }
        };

        let plugin = ClickhousePlugin::with_defaults();
        let config = json!({
            "connection_url": url,
            "tls_ca": ca,
            "tls_skip_verify": insecure,
        });
        plugin
            .initialize(InitializeRequest {
                config: config.as_object().cloned().expect("object"),
                verify_connection: true,
            })
            .await
            .expect("initialize over TLS");
        plugin.close().await.expect("close");
    }

    /// Connecting with TLS to a plaintext port fails instead of hanging
    #[tokio::test]
    #[ignore] // Requires ClickHouse running
    async fn test_tls_to_plaintext_port_fails() {
        let url = env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "tcp://localhost:9000".into());
        let options = ConnectionString::parse(&url)
            .expect("parse")
            .with_tls(true)
            .with_extra("dial_timeout", "5s")
            .to_connect_options(None)
            .expect("options");

        assert!(Connection::connect(&options).await.is_err());
    }

    #[test]
    fn test_tls_config_cloneable() {
        let config = TlsConfig::builder()
            .server_name("clickhouse.internal")
            .build()
            .expect("TLS config");
        let cloned = config.clone();
        assert_eq!(cloned.server_name(), Some("clickhouse.internal"));
        assert!(!cloned.danger_accept_invalid_certs());
    }

    #[test]
    fn test_invalid_ca_is_rejected() {
        let err = TlsConfig::builder()
            .ca_pem("not a certificate")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("failed to append CA"));
    }
}
