use historian_forwarder::config::{Config, ProtocolMode};
use std::io::Write;

fn base_args() -> Vec<String> {
    vec![
        "historian-forwarder".into(),
        "--server-url".into(),
        "https://pi.example.com".into(),
        "--device-name".into(),
        "press-17".into(),
        "--credentials".into(),
        "dXNlcjpwdw==".into(),
    ]
}

#[test]
fn defaults_to_the_omf_protocol() {
    let config = Config::load_from(base_args()).unwrap();
    assert_eq!(config.protocol, ProtocolMode::Omf);
    assert_eq!(config.naming_scheme, "default");
    assert_eq!(config.http_timeout_secs, 30);
    assert_eq!(config.data_post_rate_ms, 500);
}

#[test]
fn rejects_non_http_server_urls() {
    let mut args = base_args();
    args[2] = "ftp://pi.example.com".into();
    assert!(Config::load_from(args).is_err());
}

#[test]
fn rejects_the_factory_device_name() {
    let mut args = base_args();
    args[4] = "eWON".into();
    assert!(Config::load_from(args).is_err());
}

#[test]
fn legacy_protocol_requires_a_dataserver_web_id() {
    let mut args = base_args();
    args.extend(["--protocol".into(), "legacy-batch".into()]);
    assert!(Config::load_from(args.clone()).is_err());

    args.extend(["--dataserver-web-id".into(), "ws-1".into()]);
    assert!(Config::load_from(args).is_ok());
}

#[test]
fn omf_protocol_requires_credentials() {
    let args = vec![
        "historian-forwarder".to_string(),
        "--server-url".into(),
        "https://pi.example.com".into(),
        "--device-name".into(),
        "press-17".into(),
    ];
    assert!(Config::load_from(args).is_err());
}

#[test]
fn cloud_protocol_requires_a_token_file() {
    let mut args = base_args();
    args.extend(["--protocol".into(), "omf-cloud".into()]);
    assert!(Config::load_from(args.clone()).is_err());

    args.extend(["--token-file".into(), "/var/run/token.json".into()]);
    assert!(Config::load_from(args).is_ok());
}

#[test]
fn invalid_naming_scheme_falls_back_to_default() {
    let mut args = base_args();
    args.extend(["--naming-scheme".into(), "xx-yy".into()]);
    let config = Config::load_from(args).unwrap();
    assert_eq!(config.naming_scheme, "default");
}

#[test]
fn config_file_overrides_cli_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "device_serial = \"sn-99\"").unwrap();
    writeln!(file, "data_post_rate_ms = 250").unwrap();
    writeln!(file, "naming_scheme = \"tn-tt\"").unwrap();

    let mut args = base_args();
    args.extend([
        "--config-file".into(),
        file.path().display().to_string(),
        "--device-serial".into(),
        "sn-1".into(),
    ]);
    let config = Config::load_from(args).unwrap();
    assert_eq!(config.device_serial, "sn-99");
    assert_eq!(config.data_post_rate_ms, 250);
    assert_eq!(config.naming_scheme, "tn-tt");
}

#[test]
fn unknown_config_file_keys_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "no_such_key = true").unwrap();

    let mut args = base_args();
    args.extend(["--config-file".into(), file.path().display().to_string()]);
    assert!(Config::load_from(args).is_err());
}
