//! Defaults for every config section must survive an empty document.

use cerise_domain::config::AppConfig;

#[test]
fn app_config_from_empty_yaml() {
    let config: AppConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8765);
    assert!(config.capabilities.default_enabled);
    assert!(config.capabilities.allow_tools_by_default);
    assert!(config.stars.stars.is_empty());
    assert!(!config.proactive.enabled);
    assert_eq!(config.proactive.schedule.min_interval_minutes, 30);
    assert_eq!(config.proactive.schedule.max_interval_minutes, 900);
    assert_eq!(config.proactive.schedule.quiet_hours, "1-7");
    assert_eq!(config.proactive.schedule.max_unanswered_times, 4);
    assert_eq!(config.dialogue.skill_top_k, 3);
    assert!(config.dialogue.use_tools);
    assert_eq!(config.memory.compression.threshold, 80);
    assert_eq!(config.memory.compression.window, 40);
}

#[test]
fn capabilities_override_parses() {
    let yaml = r#"
capabilities:
  default_enabled: true
  allow_tools_by_default: true
  capabilities:
    alpha:
      enabled: false
"#;
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
    let toggle = &config.capabilities.capabilities["alpha"];
    assert!(!toggle.enabled);
    assert!(toggle.allow_tools);
}

#[test]
fn mcp_servers_parse() {
    let yaml = r#"
mcp:
  servers:
    - id: files
      command: npx
      args: ["-y", "@modelcontextprotocol/server-filesystem@latest", "."]
"#;
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.mcp.servers.len(), 1);
    assert_eq!(config.mcp.servers[0].id, "files");
    assert!(config.mcp.servers[0].enabled);
}
