//! obs-websocket implementation of [`ResourceApplier`]

use obws::requests::inputs::SetSettings;
use obws::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

use super::{ApplyError, ResourceApplier, SourceFlag};

/// A named OBS browser source reached over obs-websocket.
///
/// Calls block the host thread on the websocket round-trip; the host thread
/// is not a runtime worker, so `Handle::block_on` is safe there.
pub struct BrowserSource {
    client: Arc<Client>,
    runtime: Handle,
    name: String,
}

#[derive(Serialize)]
struct UrlSetting<'a> {
    url: &'a str,
}

impl BrowserSource {
    pub fn new(client: Arc<Client>, runtime: Handle, name: impl Into<String>) -> Self {
        Self {
            client,
            runtime,
            name: name.into(),
        }
    }

    fn ensure_exists(&self) -> Result<(), ApplyError> {
        let inputs = self.runtime.block_on(self.client.inputs().list(None))?;
        if inputs.iter().any(|input| input.id.name == self.name) {
            Ok(())
        } else {
            Err(ApplyError::SourceMissing(self.name.clone()))
        }
    }

    fn update<T: Serialize>(&self, settings: &T) -> Result<(), ApplyError> {
        self.ensure_exists()?;
        self.runtime.block_on(self.client.inputs().set_settings(SetSettings {
            input: self.name.as_str().into(),
            settings,
            overlay: Some(true),
        }))?;
        Ok(())
    }
}

impl ResourceApplier for BrowserSource {
    fn current_url(&mut self) -> Result<String, ApplyError> {
        self.ensure_exists()?;
        let response = self.runtime.block_on(
            self.client
                .inputs()
                .settings::<serde_json::Value>(self.name.as_str().into()),
        )?;
        Ok(response
            .settings
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    fn set_url(&mut self, url: &str) -> Result<(), ApplyError> {
        self.update(&UrlSetting { url })?;
        debug!("Browser source {} url set to {}", self.name, url);
        Ok(())
    }

    fn set_flag(&mut self, flag: SourceFlag, value: bool) -> Result<(), ApplyError> {
        let mut settings = serde_json::Map::new();
        settings.insert(
            flag.setting_key().to_string(),
            serde_json::Value::Bool(value),
        );
        self.update(&settings)?;
        debug!(
            "Browser source {} {}={}",
            self.name,
            flag.setting_key(),
            value
        );
        Ok(())
    }
}
