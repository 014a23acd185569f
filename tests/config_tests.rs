//! Configuration loading tests (environment overrides mutate process state)

use modelbox::Runtime;
use modelbox::config::ModelboxConfig;
use modelbox::runtime::DevicePreference;
use serial_test::serial;
use std::env;
use std::io::Write;

const VARS: [&str; 5] = [
    "MODELBOX_STORAGE_ROOT",
    "MODELBOX_DEFAULT_RUNTIME",
    "MODELBOX_DEVICE",
    "MODELBOX_OPTIMUM_CLI",
    "HF_TOKEN",
];

fn clear_env() {
    // Environment mutation is unsafe in edition 2024
    unsafe {
        for var in VARS {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_config_load_with_env_overrides() {
    clear_env();
    unsafe {
        env::set_var("MODELBOX_STORAGE_ROOT", "/tmp/modelbox-test-root");
        env::set_var("MODELBOX_DEFAULT_RUNTIME", "pytorch");
        env::set_var("MODELBOX_DEVICE", "cpu");
        env::set_var("MODELBOX_OPTIMUM_CLI", "/opt/optimum/bin/optimum-cli");
        env::set_var("HF_TOKEN", "hf_test");
    }

    let config = ModelboxConfig::load(None).expect("Failed to load config");

    assert_eq!(config.storage_root.to_string_lossy(), "/tmp/modelbox-test-root");
    assert_eq!(config.default_runtime, Runtime::Native);
    assert_eq!(config.device, DevicePreference::Cpu);
    assert_eq!(config.exporter.optimum_cli_path, "/opt/optimum/bin/optimum-cli");
    assert_eq!(config.hf_token.as_deref(), Some("hf_test"));

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        storage_root = "/from/file"
        default_runtime = "onnx"
        "#
    )
    .unwrap();

    unsafe {
        env::set_var("MODELBOX_DEFAULT_RUNTIME", "onnx-quantized");
    }

    let config = ModelboxConfig::load(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(config.storage_root.to_string_lossy(), "/from/file");
    assert_eq!(config.default_runtime, Runtime::Onnx { quantized: true });

    clear_env();
}

#[test]
#[serial]
fn test_invalid_env_value_is_rejected() {
    clear_env();
    unsafe {
        env::set_var("MODELBOX_DEFAULT_RUNTIME", "tensorrt");
    }

    let err = ModelboxConfig::load(None).unwrap_err();
    assert!(format!("{:#}", err).contains("MODELBOX_DEFAULT_RUNTIME"));

    clear_env();
}

#[test]
#[serial]
fn test_empty_token_is_ignored() {
    clear_env();
    unsafe {
        env::set_var("HF_TOKEN", "");
    }

    let config = ModelboxConfig::load(None).unwrap();
    assert!(config.hf_token.is_none());

    clear_env();
}

#[test]
fn test_missing_config_file_fails() {
    let err = ModelboxConfig::load(Some("/nonexistent/modelbox.toml".into())).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
