//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use double_socket::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig,
};
use serial_test::serial;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_client_address() {
    let mut config = NetworkConfig::default();
    config.client.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Client address cannot be empty")));
}

#[test]
fn test_zero_capacity() {
    let mut config = NetworkConfig::default();
    config.server.max_authenticated = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max authenticated connections must be greater than 0")));
}

#[test]
fn test_auth_timeouts_bounds() {
    let mut config = NetworkConfig::default();
    config.server.tcp_auth_timeout = Duration::from_millis(50);
    config.server.udp_auth_timeout = Duration::from_secs(600);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("TCP authentication timeout too short")));
    assert!(errors
        .iter()
        .any(|e| e.contains("UDP authentication timeout too long")));
}

#[test]
fn test_zero_udp_auth_frequency() {
    let mut config = NetworkConfig::default();
    config.client.udp_auth_frequency = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("UDP authentication frequency must be greater than 0")));
}

#[test]
fn test_tcp_packet_size_limited_by_prefix() {
    let mut config = NetworkConfig::default();
    config.transport.max_tcp_packet_size = 70_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max TCP packet size too large")));
}

#[test]
fn test_tiny_udp_buffer() {
    let mut config = NetworkConfig::default();
    config.transport.udp_buffer_size = 16;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("UDP buffer size too small")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();

    let error = config.validate_strict().unwrap_err();
    assert!(error.to_string().contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NetworkConfig::default();

    config.server.address = String::new();
    config.server.max_pending_connections = 0;
    config.client.address = String::new();
    config.transport.max_tcp_packet_size = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_valid_game_server_config() {
    let config = NetworkConfig {
        server: ServerConfig {
            address: "0.0.0.0:7777".to_string(),
            max_authenticated: 32,
            max_pending_connections: 64,
            tcp_auth_timeout: Duration::from_secs(5),
            udp_auth_timeout: Duration::from_secs(5),
        },
        client: ClientConfig {
            address: "10.0.0.2:7777".to_string(),
            tcp_auth_timeout: Duration::from_secs(5),
            udp_auth_frequency: 20,
            udp_auth_duration: Duration::from_secs(5),
        },
        transport: TransportConfig {
            max_tcp_packet_size: 4096,
            udp_buffer_size: 1200,
            pool_size: 64,
        },
        logging: LoggingConfig {
            app_name: "game-server".to_string(),
            log_level: Level::DEBUG,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: true,
        },
    };

    assert!(config.validate().is_empty(), "{:?}", config.validate());
    assert_eq!(config.client.udp_auth_attempts(), 100);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [server]
        address = "127.0.0.1:4000"
        max_authenticated = 2
        max_pending_connections = 8
        tcp_auth_timeout = 1500
        udp_auth_timeout = 2500
        "#,
    )
    .expect("valid TOML");

    assert_eq!(config.server.max_authenticated, 2);
    assert_eq!(config.server.tcp_auth_timeout, Duration::from_millis(1500));
    assert_eq!(config.client.udp_auth_frequency, 30);
    assert_eq!(config.transport.udp_buffer_size, 1536);
}

#[test]
fn test_example_config_parses_back() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).expect("example config parses");
    assert_eq!(parsed.server.address, ServerConfig::default().address);
    assert_eq!(parsed.logging.log_level, Level::INFO);
}

#[test]
fn test_invalid_log_level_rejected() {
    let result = NetworkConfig::from_toml(
        r#"
        [logging]
        app_name = "x"
        log_level = "loud"
        log_to_console = true
        log_to_file = false
        json_format = false
        "#,
    );
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    std::env::set_var("DOUBLE_SOCKET_MAX_AUTHENTICATED", "3");
    std::env::set_var("DOUBLE_SOCKET_AUTH_TIMEOUT_MS", "1200");
    let config = NetworkConfig::from_env().unwrap();
    std::env::remove_var("DOUBLE_SOCKET_MAX_AUTHENTICATED");
    std::env::remove_var("DOUBLE_SOCKET_AUTH_TIMEOUT_MS");

    assert_eq!(config.server.max_authenticated, 3);
    assert_eq!(config.server.udp_auth_timeout, Duration::from_millis(1200));
    assert_eq!(config.client.tcp_auth_timeout, Duration::from_millis(1200));
}

#[test]
fn test_save_and_reload() {
    let path = std::env::temp_dir().join(format!("double-socket-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| c.server.max_authenticated = 9);
    config.save_to_file(&path).unwrap();
    let reloaded = NetworkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(reloaded.server.max_authenticated, 9);
}
