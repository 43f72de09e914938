use crate::args::ConfigArgs;
use anyhow::Context;
use std::sync::Arc;
use stove::{FileConfigSource, Stove};

pub(crate) async fn cmd_run(target: &ConfigArgs, no_watch: bool) -> anyhow::Result<()> {
    let path = target.config_path();
    let profile = target.profile();
    tracing::debug!(path = %path.display(), profile = %profile, "Using config");

    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let source = Arc::new(FileConfigSource::new(&path, &profile));
    let mut stove = Stove::new(source)
        .with_context(|| format!("Invalid profile '{}' in {}", profile, path.display()))?;
    if no_watch {
        stove = stove.without_watcher();
    }

    stove.run().await
}
