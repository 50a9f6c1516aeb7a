use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::OnceCell;

use crate::app_context::AppContext;
use crate::config::ProxySettings;

pub struct CliContext {
    settings: Arc<ProxySettings>,
    config_path: Option<PathBuf>,
    app_context: OnceCell<Arc<AppContext>>,
}

impl CliContext {
    pub fn new(settings: ProxySettings, config_path: Option<PathBuf>) -> Self {
        Self {
            settings: Arc::new(settings),
            config_path,
            app_context: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        self.settings.as_ref()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// The shared services, created and bootstrapped from disk on first use.
    pub async fn app_context(&self) -> Result<Arc<AppContext>> {
        self.app_context
            .get_or_try_init(|| async {
                let context = AppContext::new(self.settings.as_ref().clone())
                    .context("failed to create upstream client")?;
                context.bootstrap().await;
                Ok::<_, anyhow::Error>(Arc::new(context))
            })
            .await
            .map(Arc::clone)
    }
}
