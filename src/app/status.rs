use crate::config::Config;
use crate::consent::ConsentDecision;
use crate::queue::QueueCounts;

/// Point-in-time view of the agent's shared state.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub counts: QueueCounts,
    pub consent: ConsentDecision,
    pub terminated: bool,
    /// Provider/model stored as an override, if any.
    pub stored_backend: Option<(String, String)>,
}

pub fn render_status(config: &Config, snapshot: &StatusSnapshot) -> String {
    let (provider, model, source) = match &snapshot.stored_backend {
        Some((provider, model)) => (provider.as_str(), model.as_str(), "stored"),
        None => (config.llm.provider.as_str(), config.llm.model.as_str(), "config"),
    };
    let counts = &snapshot.counts;

    let mut lines = vec![
        "◆ cortexd status".to_string(),
        String::new(),
        format!("Version     {}", env!("CARGO_PKG_VERSION")),
        format!("Config      {}", config.config_path.display()),
        format!("Database    {}", config.database.path.display()),
        String::new(),
        format!("  Agent       {}", if snapshot.terminated { "terminated" } else { "alive" }),
        format!("  Consent     {}", snapshot.consent),
        format!("  Backend     {provider} / {model} ({source})"),
        String::new(),
        format!("Queue ({} items)", counts.total()),
        format!("  pending     {}", counts.pending),
        format!("  processing  {}", counts.processing),
        format!("  complete    {}", counts.complete),
        format!("  failed      {}", counts.failed),
        String::new(),
    ];

    lines.push(format!(
        "Bridge      {}",
        match (config.bridge.enabled, config.bridge.management_url.as_deref()) {
            (true, Some(url)) => format!("✓ {url} (vhost {})", config.bridge.vhost),
            (true, None) => "✗ enabled without management_url".into(),
            (false, _) => "disabled".into(),
        }
    ));
    lines.push(format!(
        "Retries     max {} per item",
        config.worker.max_retries
    ));

    lines.join("\n")
}
