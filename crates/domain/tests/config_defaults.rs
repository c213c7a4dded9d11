use leitl_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn liveness_defaults() {
    let config = Config::default();
    assert_eq!(config.sessions.heartbeat_timeout_secs, 60);
    assert_eq!(config.sessions.sweep_interval_secs, 30);
    assert_eq!(config.sessions.session_ttl_secs, 3600);
}

#[test]
fn log_capacity_defaults() {
    let config = Config::default();
    assert_eq!(config.events.recent_capacity, 100);
    assert_eq!(config.events.activity_capacity, 1000);
    assert_eq!(config.events.activity_ttl_secs, 86_400);
}

#[test]
fn context_cache_ttl_default_is_one_hour() {
    let config = Config::default();
    assert_eq!(config.context.cache_ttl().as_secs(), 3600);
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let toml_str = r#"
[sessions]
heartbeat_timeout_secs = 15
sweep_interval_secs = 5

[store]
channel = "team:events"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.sessions.heartbeat_timeout_secs, 15);
    assert_eq!(config.sessions.sweep_interval_secs, 5);
    assert_eq!(config.sessions.session_ttl_secs, 3600);
    assert_eq!(config.store.channel, "team:events");
    assert_eq!(config.store.key_prefix, "leitl");
    assert_eq!(config.events.recent_capacity, 100);
}

#[test]
fn cors_config_parses_custom_origins() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["https://myapp.com", "http://localhost:3000"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.cors.allowed_origins.len(), 2);
    assert!(config.server.cors.allowed_origins.contains(&"https://myapp.com".to_string()));
}

#[test]
fn session_ttl_and_timeout_are_independent() {
    let toml_str = r#"
[sessions]
heartbeat_timeout_secs = 120
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.sessions.heartbeat_timeout_secs, 120);
    assert_eq!(config.sessions.session_ttl_secs, 3600);
}
