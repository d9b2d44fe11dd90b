use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::extractors::validate_url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Video metadata provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Speech recognition endpoint
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Transcript correction endpoint
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Share link resolution and media download
    #[serde(default)]
    pub download: DownloadConfig,

    /// Markdown report streaming
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the metadata API
    pub base_url: String,

    /// Bearer token for the metadata API
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,

    pub api_key: Option<String>,

    /// Audio-capable model id
    pub model: String,

    /// Instruction sent alongside the audio
    pub prompt: String,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,

    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Pause before retry `n` is `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,

    pub api_key: Option<String>,

    pub model: Option<String>,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub user_agent: String,

    /// Referer header some CDNs require
    pub referer: Option<String>,

    /// Connect timeout for downloads, request timeout for link resolution
    pub timeout_secs: u64,

    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Characters per streamed markdown chunk
    pub chunk_size: usize,

    /// Pause between markdown chunks in milliseconds
    pub chunk_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/douyin".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
                .to_string(),
            api_key: None,
            model: "qwen-omni-turbo".to_string(),
            prompt: "Transcribe the speech in this audio verbatim. Output only the transcript, \
                     with punctuation, and no commentary."
                .to_string(),
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 1000,
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
                .to_string(),
            api_key: None,
            model: None,
            timeout_secs: 60,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"
                .to_string(),
            referer: Some("https://www.douyin.com/".to_string()),
            timeout_secs: 15,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            chunk_size: 160,
            chunk_delay_ms: 10,
        }
    }
}

impl OptimizationConfig {
    /// Credentials and model needed for the correction call, when configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        let model = self.model.as_deref().filter(|m| !m.trim().is_empty())?;
        Some((key, model))
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            serde_yaml::from_str(&content).context("Failed to parse config file")?
        } else {
            let config = Self::default();
            config.save().await?;
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("clipscribe").join("config.yaml"))
    }

    /// Secrets are usually kept out of the file
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("CLIPSCRIBE_PROVIDER_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(key) = lookup("CLIPSCRIBE_TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = Some(key);
        }
        if let Some(key) = lookup("CLIPSCRIBE_OPTIMIZATION_API_KEY") {
            self.optimization.api_key = Some(key);
        }
        if let Some(model) = lookup("CLIPSCRIBE_OPTIMIZATION_MODEL") {
            self.optimization.model = Some(model);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.provider.base_url).context("Invalid provider.base_url")?;
        validate_url(&self.transcription.endpoint).context("Invalid transcription.endpoint")?;
        validate_url(&self.optimization.endpoint).context("Invalid optimization.endpoint")?;

        if self.transcription.timeout_secs == 0 {
            anyhow::bail!("transcription.timeout_secs must be greater than zero");
        }

        if self.output.chunk_size == 0 {
            anyhow::bail!("output.chunk_size must be greater than zero");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Provider: {}", self.provider.base_url);
        println!(
            "  Transcription: {} ({})",
            self.transcription.endpoint, self.transcription.model
        );
        println!("  Transcription key: {}", mask(self.transcription.api_key.as_deref()));
        match self.optimization.credentials() {
            Some((_, model)) => println!("  Optimization: {} ({})", self.optimization.endpoint, model),
            None => println!("  Optimization: disabled (cleanup only)"),
        }
        println!("  Retries: {}", self.transcription.max_retries);
        println!("  Chunk size: {}", self.output.chunk_size);
    }
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        Some(secret) if secret.chars().count() > 4 => {
            let tail: Vec<char> = secret.chars().rev().take(4).collect();
            format!("****{}", tail.into_iter().rev().collect::<String>())
        }
        Some(_) => "****".to_string(),
        None => "not set".to_string(),
    }
}
