use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted when a provider config has no `api_key`.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const SEARCH_PATHS: [&str; 2] = ["./quill.toml", "~/.config/quill/config.toml"];

/// Everything read from `quill.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

/// Provider settings, grouped by provider kind and keyed by a free-form name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// `<kind>.<name>`, e.g. `openai.default` or `openai_compatible.local`
    pub default_provider: String,

    #[serde(default)]
    pub openai: HashMap<String, OpenAIConfig>,

    /// Named OpenAI-compatible endpoints (openrouter, groq, a local server...)
    #[serde(default)]
    pub openai_compatible: HashMap<String, OpenAIConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl OpenAIConfig {
    /// The configured key, or the `OPENAI_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Retries for a stream that fails to start with a recoverable error
    pub max_retry_attempts: u32,
    /// Per-invocation limit; 0 disables the timeout
    pub tool_timeout_seconds: u64,
    /// Bound on concurrently running tool handlers; 0 means unbounded
    pub max_concurrent_tools: usize,
    /// Advertise tools through the provider's native function-calling channel
    pub native_tool_calling: bool,
    /// Turns a task may take after the first to answer its tool results
    pub max_follow_up_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            tool_timeout_seconds: 120,
            max_concurrent_tools: 0,
            native_tool_calling: false,
            max_follow_up_turns: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 256 * 1024,
            max_total_bytes: 1024 * 1024,
        }
    }
}

impl Default for Config {
    /// A single `openai.default` entry whose key comes from the environment.
    fn default() -> Self {
        let openai = HashMap::from([(
            "default".to_owned(),
            OpenAIConfig {
                api_key: None,
                model: "gpt-4o".to_owned(),
                base_url: None,
                max_tokens: Some(4096),
                temperature: Some(0.1),
            },
        )]);

        Self {
            providers: ProvidersConfig {
                default_provider: "openai.default".to_owned(),
                openai,
                openai_compatible: HashMap::new(),
            },
            agent: AgentConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

/// The two provider tables a reference can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    OpenAICompatible,
}

impl ProviderKind {
    fn from_prefix(prefix: &str) -> Result<Self> {
        match prefix {
            "openai" => Ok(Self::OpenAI),
            "openai_compatible" => Ok(Self::OpenAICompatible),
            other => bail!(
                "Unknown provider type '{}'. Valid types: openai, openai_compatible",
                other
            ),
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::OpenAICompatible => "openai_compatible",
        }
    }
}

/// A parsed `<kind>.<name>` provider reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRef {
    pub kind: ProviderKind,
    pub name: String,
}

impl ProviderRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let Some((prefix, name)) = reference
            .split_once('.')
            .filter(|(prefix, name)| !prefix.is_empty() && !name.is_empty() && !name.contains('.'))
        else {
            bail!(
                "Provider reference '{}' should look like <kind>.<name>, e.g. openai.default",
                reference
            );
        };
        Ok(Self {
            kind: ProviderKind::from_prefix(prefix)?,
            name: name.to_owned(),
        })
    }
}

impl std::fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.name)
    }
}

impl Config {
    /// Load from `config_path`, or from the first default location that
    /// exists. When nothing is found a default config is written to
    /// `~/.config/quill/config.toml` and returned.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        if let Some(path) = config_path {
            let path = PathBuf::from(shellexpand::tilde(path).as_ref());
            if !path.is_file() {
                bail!("Config file not found: {}", path.display());
            }
            return Self::load_file(&path);
        }

        let found = SEARCH_PATHS
            .iter()
            .map(|candidate| PathBuf::from(shellexpand::tilde(candidate).as_ref()))
            .find(|candidate| candidate.is_file());
        if let Some(path) = found {
            return Self::load_file(&path);
        }

        let config = Self::default();
        if let Some(target) = Self::default_config_path() {
            match config.save(&target) {
                Ok(()) => println!("Wrote a starter config to {}", target.display()),
                Err(e) => warn!("Starter config not written to {}: {}", target.display(), e),
            }
        }
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        debug!("Reading config {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        config.provider_settings(&config.providers.default_provider)?;
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("quill").join("config.toml"))
    }

    fn table(&self, kind: ProviderKind) -> &HashMap<String, OpenAIConfig> {
        match kind {
            ProviderKind::OpenAI => &self.providers.openai,
            ProviderKind::OpenAICompatible => &self.providers.openai_compatible,
        }
    }

    fn table_mut(&mut self, kind: ProviderKind) -> &mut HashMap<String, OpenAIConfig> {
        match kind {
            ProviderKind::OpenAI => &mut self.providers.openai,
            ProviderKind::OpenAICompatible => &mut self.providers.openai_compatible,
        }
    }

    /// Settings behind `reference`; errors name the entries that do exist.
    pub fn provider_settings(&self, reference: &str) -> Result<&OpenAIConfig> {
        let target = ProviderRef::parse(reference)?;
        let table = self.table(target.kind);
        table.get(&target.name).ok_or_else(|| {
            let mut known: Vec<&str> = table.keys().map(String::as_str).collect();
            known.sort_unstable();
            anyhow!("Provider config '{}' not found. Available: {:?}", target, known)
        })
    }

    pub fn default_provider_settings(&self) -> Result<&OpenAIConfig> {
        self.provider_settings(&self.providers.default_provider)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_with_overrides(
        config_path: Option<&str>,
        provider_override: Option<String>,
        model_override: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::load(config_path)?;
        config.apply_overrides(provider_override, model_override)?;
        Ok(config)
    }

    /// `--provider` replaces the default provider; `--model` then replaces
    /// the model of whichever provider is the default.
    pub fn apply_overrides(
        &mut self,
        provider_override: Option<String>,
        model_override: Option<String>,
    ) -> Result<()> {
        if let Some(reference) = provider_override {
            self.provider_settings(&reference)?;
            self.providers.default_provider = reference;
        }

        if let Some(model) = model_override {
            let target = ProviderRef::parse(&self.providers.default_provider)?;
            let settings = self
                .table_mut(target.kind)
                .get_mut(&target.name)
                .with_context(|| format!("Provider config '{}' not found", target))?;
            debug!("Model for {} overridden: {} -> {}", target, settings.model, model);
            settings.model = model;
        }

        Ok(())
    }
}
