use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;

// Stored connection settings for the messaging-provider session. The token
// is base64-obscured on disk, same as any locally cached secret here: not
// encryption, just keeps it out of casual greps.

#[derive(Serialize, Deserialize, Clone)]
pub struct Credentials {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(server: &str, token: &str) -> Self {
        Credentials {
            server: server.to_string(),
            token: Some(BASE64.encode(token)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().map(|encoded| {
            String::from_utf8(BASE64.decode(encoded).unwrap_or_default()).unwrap_or_default()
        })
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("REMINDERSYNC_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("remindersync");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("credentials.json"))
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    let config_path = get_config_path()?;
    let file = File::create(config_path)?;
    serde_json::to_writer_pretty(file, credentials)?;
    info!("Credentials saved for {}", credentials.server);
    Ok(())
}

pub fn load_credentials() -> Result<Option<Credentials>> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&config_path)?;
    let credentials: Credentials = serde_json::from_str(&contents)?;
    info!(
        "Loaded credentials for {} from {}",
        credentials.server,
        config_path.display()
    );
    Ok(Some(credentials))
}
