//! Subcommand handlers.

use crate::{Commands, ConfigAction, SessionAction};
use concierge_core::config::{ConciergeConfig, load_config};
use concierge_core::error::ConfigError;
use concierge_core::memory::MemoryStore;
use std::path::Path;
use uuid::Uuid;

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Sessions { action } => handle_sessions(action, workspace),
    }
}

/// Load configuration and fill in the default session directory.
pub fn resolve_config(workspace: &Path) -> Result<ConciergeConfig, ConfigError> {
    let mut config = load_config(Some(workspace), None).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    if config.memory.persist_dir.is_none() {
        config.memory.persist_dir = concierge_core::config::data_dir();
    }
    Ok(config)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".concierge");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&ConciergeConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn handle_sessions(action: SessionAction, workspace: &Path) -> anyhow::Result<()> {
    let config = resolve_config(workspace)?;
    let store = MemoryStore::new(&config.memory);

    match action {
        SessionAction::List => {
            let sessions = store.list();
            if sessions.is_empty() {
                println!("No sessions found.");
                return Ok(());
            }
            println!("Sessions ({}):", sessions.len());
            for info in sessions {
                println!(
                    "  {}  {:<8}  {}  sources={} iterations={} warnings={}  {}",
                    info.id,
                    format!("{:?}", info.status).to_lowercase(),
                    info.updated_at.format("%Y-%m-%d %H:%M"),
                    info.sources,
                    info.iterations,
                    info.warnings,
                    info.topic.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        SessionAction::Show { id } => {
            let id = parse_id(&id)?;
            let snapshot = store.snapshot(id)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        SessionAction::Remove { id } => {
            let id = parse_id(&id)?;
            if store.remove(id)? {
                println!("Removed session {}", id);
            } else {
                println!("No session {}", id);
            }
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|e| anyhow::anyhow!("Invalid session id '{}': {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".concierge").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: ConciergeConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, ConciergeConfig::default());
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();
        let config_path = workspace.join(".concierge").join("config.toml");
        std::fs::write(&config_path, "[query]\nmax_sources = 4\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content, "[query]\nmax_sources = 4\n");
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&format!(" {} ", id)).unwrap(), id);
        assert!(parse_id("not-a-uuid").is_err());
    }
}
