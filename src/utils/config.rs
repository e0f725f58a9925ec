use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use anyhow::{Result, Context, anyhow};
use tracing::info;

pub const DEFAULT_DB_PATH: &str = "images_db.json";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

/// Values given on the command line. Anything left as `None` falls back to the
/// env file, then to the defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Main entry point to get settings.
/// Command line first, then the env file, then defaults. Only the base directory is required.
pub fn load_settings(env_path: &Path, overrides: Overrides) -> Result<Settings> {
    let stored = if env_path.exists() {
        let stored = load_from_env(env_path)?;
        info!("Loaded settings from {:?}", env_path);
        stored
    } else {
        Overrides::default()
    };

    let base_dir = overrides
        .base_dir
        .or(stored.base_dir)
        .ok_or_else(|| anyhow!("No base directory configured. Pass --base-dir or set IMAGE_BASE_DIR."))?;

    Ok(Settings {
        base_dir,
        db_path: overrides
            .db_path
            .or(stored.db_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
        host: overrides
            .host
            .or(stored.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: overrides.port.or(stored.port).unwrap_or(DEFAULT_PORT),
    })
}

fn load_from_env(path: &Path) -> Result<Overrides> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut values = Overrides::default();

    for line in reader.lines() {
        let line = line?;
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "IMAGE_BASE_DIR" => values.base_dir = Some(PathBuf::from(value)),
                "IMAGE_DB_PATH" => values.db_path = Some(PathBuf::from(value)),
                "SERVER_HOST" => values.host = Some(value.to_string()),
                "SERVER_PORT" => {
                    let port = value
                        .parse()
                        .with_context(|| format!("Invalid SERVER_PORT in {:?}: {}", path, value))?;
                    values.port = Some(port);
                }
                _ => {}
            }
        }
    }

    Ok(values)
}

pub fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    writeln!(file, "IMAGE_BASE_DIR={}", settings.base_dir.display())?;
    writeln!(file, "IMAGE_DB_PATH={}", settings.db_path.display())?;
    writeln!(file, "SERVER_HOST={}", settings.host)?;
    writeln!(file, "SERVER_PORT={}", settings.port)?;
    Ok(())
}
