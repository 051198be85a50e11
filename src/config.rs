use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use crate::account::{AccountStore, FileAccountStore, MemoryAccountStore, SupabaseAccountStore};
use crate::ai::{LlmConfig, LlmProvider};

#[derive(Parser, Debug)]
#[command(name = "metaprompt-core")]
#[command(about = "MetaPrompt Core - prompt enhancement backend with usage metering")]
pub struct Cli {
    #[arg(long, default_value = "http")]
    pub mode: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value = "21430")]
    pub port: u16,

    /// Where account metadata lives
    #[arg(long, value_enum, default_value_t = StoreBackend::File)]
    pub store: StoreBackend,

    /// Completion backend used for enhancement
    #[arg(long, value_enum, default_value_t = LlmProvider::OpenRouter)]
    pub provider: LlmProvider,

    /// Default model id (overridable per request)
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    File,
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub store: StoreBackend,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub llm: LlmConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("metaprompt")
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Combine CLI flags with values looked up through `env`.
    pub fn resolve(cli: &Cli, env: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_key = match cli.provider {
            LlmProvider::OpenRouter => non_empty("OPENROUTER_API_KEY"),
            LlmProvider::OpenAI => non_empty("OPENAI_API_KEY"),
            LlmProvider::Ollama => None,
        };

        Self {
            data_dir: cli.data_dir.clone().unwrap_or_else(default_data_dir),
            store: cli.store,
            supabase_url: non_empty("SUPABASE_URL"),
            supabase_anon_key: non_empty("SUPABASE_ANON_KEY"),
            llm: LlmConfig {
                provider: cli.provider,
                api_key,
                model: cli.model.clone().or_else(|| non_empty("METAPROMPT_MODEL")),
                base_url: None,
            },
        }
    }

    pub async fn account_store(&self) -> Result<Arc<dyn AccountStore>> {
        match self.store {
            StoreBackend::File => {
                let store = FileAccountStore::new(self.data_dir.clone())
                    .await
                    .context("Failed to open account store")?;
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => Ok(Arc::new(MemoryAccountStore::new())),
            StoreBackend::Supabase => {
                let url = self
                    .supabase_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("SUPABASE_URL is not set"))?;
                let key = self
                    .supabase_anon_key
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("SUPABASE_ANON_KEY is not set"))?;
                Ok(Arc::new(SupabaseAccountStore::new(url, key)))
            }
        }
    }
}
