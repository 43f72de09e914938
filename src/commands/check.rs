use crate::args::ConfigArgs;
use anyhow::Context;
use stove::StoveConfig;

pub(crate) fn cmd_check(target: &ConfigArgs, json: bool) -> anyhow::Result<()> {
    let path = target.config_path();
    let profile = target.profile();

    let config = StoveConfig::from_file(&path, &profile)
        .with_context(|| format!("Invalid profile '{}' in {}", profile, path.display()))?;

    let rendered = if json {
        serde_json::to_string_pretty(&config).context("Failed to serialize config to JSON")?
    } else {
        let mut table = toml::Table::new();
        table.insert(
            profile.clone(),
            toml::Value::try_from(&config).context("Failed to serialize config to TOML")?,
        );
        toml::to_string_pretty(&table).context("Failed to serialize config to TOML")?
    };

    println!("{}", rendered.trim_end());
    eprintln!(
        "Profile '{}' is valid: {} worker(s) behind {}",
        profile,
        config.workers,
        config.listen_addr()
    );
    Ok(())
}
