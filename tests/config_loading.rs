//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a host file: defaults,
//! credential resolution and rejection of unusable settings.

use mqtt_bindings::config::{ConfigError, HostConfig};
use mqtt_bindings::{ParameterShape, TriggerBinding};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "broker.example.com"
port = 1883
tls = false

[[functions]]
name = "echo"
trigger_topic = "sensors/in"
data_type = "string"
output_topic = "sensors/out"

[[functions]]
name = "raw"
trigger_topic = "blobs/in"
data_type = "binary"
"#,
    );

    let config = HostConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.host, "broker.example.com");
    assert_eq!(config.mqtt.port, 1883);
    assert!(!config.mqtt.tls);
    assert_eq!(config.functions.len(), 2);
    assert_eq!(config.functions[0].output_topic.as_deref(), Some("sensors/out"));
    assert_eq!(config.functions[1].output_topic, None);
}

#[test]
fn test_config_defaults_apply() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"

[[functions]]
name = "f"
trigger_topic = "t"
"#,
    );

    let config = HostConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.port, 8883);
    assert!(config.mqtt.tls);
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(config.functions[0].data_type, "message");

    let binding = TriggerBinding::from_declared(
        config.functions[0].trigger_topic.clone(),
        &config.functions[0].data_type,
    )
    .unwrap();
    assert_eq!(binding.shape(), ParameterShape::StructuredMessage);

    let options = config.mqtt.client_options().unwrap();
    assert_eq!(options.connect_timeout, Duration::from_secs(10));
    assert_eq!(options.publish_timeout, Duration::from_secs(5));
    assert_eq!(options.reconnect_delay, Duration::from_secs(5));
}

#[test]
fn test_credentials_resolved_from_environment() {
    std::env::set_var("CONFIG_LOADING_TEST_USER", "device-42");
    std::env::set_var("CONFIG_LOADING_TEST_PASS", "s3cret");
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"
username_env = "CONFIG_LOADING_TEST_USER"
password_env = "CONFIG_LOADING_TEST_PASS"
"#,
    );

    let config = HostConfig::load_from_file(temp_file.path()).unwrap();
    let options = config.mqtt.client_options().unwrap();

    assert_eq!(options.username.as_deref(), Some("device-42"));
    assert_eq!(options.password.as_deref(), Some("s3cret"));
    assert!(!format!("{options:?}").contains("s3cret"));
}

#[test]
fn test_missing_username_variable_is_error() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"
username_env = "CONFIG_LOADING_TEST_UNSET_USER"
"#,
    );

    let config = HostConfig::load_from_file(temp_file.path()).unwrap();
    let result = config.mqtt.client_options();

    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "CONFIG_LOADING_TEST_UNSET_USER"));
}

#[test]
fn test_invalid_settings_rejected() {
    let cases = [
        "[mqtt]\nhost = \"\"",
        "[mqtt]\nhost = \"localhost\"\nport = 0",
        "[mqtt]\nhost = \"localhost\"\nkeep_alive_secs = 2",
        "[mqtt]\nhost = \"localhost\"\npublish_timeout_ms = 0",
        "[mqtt]\nhost = \"localhost\"\n[[functions]]\nname = \"f\"\ntrigger_topic = \"\"",
        "[mqtt]\nhost = \"localhost\"\n[[functions]]\nname = \"f\"\ntrigger_topic = \"a\"\n[[functions]]\nname = \"f\"\ntrigger_topic = \"b\"",
    ];

    for content in cases {
        let temp_file = write_config(content);
        let result = HostConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "accepted: {content}"
        );
    }
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[mqtt\nhost = ");

    let result = HostConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_file_is_read_error() {
    let dir = tempfile::tempdir().unwrap();

    let result = HostConfig::load_from_file(&dir.path().join("absent.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
