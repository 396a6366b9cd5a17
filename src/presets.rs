use crate::options::RawRenderOptions;
use crate::render::PosterError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub options: RawRenderOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatePresets {
    #[serde(default)]
    pub presets: Vec<Preset>,
}

pub type PresetDocument = BTreeMap<String, TemplatePresets>;

#[derive(Clone)]
pub struct PresetStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl PresetStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Result<PresetDocument> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn get(&self, template: &str, preset_id: &str) -> Result<Option<Preset>> {
        let document = self.list().await?;
        Ok(document
            .get(template)
            .and_then(|group| group.presets.iter().find(|preset| preset.id == preset_id))
            .cloned())
    }

    pub async fn layered(
        &self,
        template: &str,
        preset_id: Option<&str>,
        overrides: &RawRenderOptions,
    ) -> Result<RawRenderOptions, PosterError> {
        let Some(preset_id) = preset_id else {
            return Ok(overrides.clone());
        };
        let preset = self
            .get(template, preset_id)
            .await
            .map_err(|err| PosterError::InvalidRequest(format!("presets unreadable: {err:#}")))?
            .ok_or_else(|| {
                PosterError::InvalidRequest(format!("unknown preset {preset_id} for template {template}"))
            })?;
        Ok(overrides.merged_over(&preset.options))
    }

    pub async fn save(
        &self,
        template: &str,
        preset_id: &str,
        name: Option<&str>,
        options: RawRenderOptions,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let group = document.entry(template.to_string()).or_default();
        match group.presets.iter_mut().find(|preset| preset.id == preset_id) {
            Some(existing) => {
                existing.options = options;
                if let Some(name) = name {
                    existing.name = name.to_string();
                }
            }
            None => group.presets.push(Preset {
                id: preset_id.to_string(),
                name: name.unwrap_or(preset_id).to_string(),
                options,
            }),
        }
        self.write(&document).await?;
        info!(template, preset_id, "preset saved");
        Ok(())
    }

    pub async fn delete(&self, template: &str, preset_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let Some(group) = document.get_mut(template) else {
            return Ok(false);
        };
        let before = group.presets.len();
        group.presets.retain(|preset| preset.id != preset_id);
        if group.presets.len() == before {
            return Ok(false);
        }
        self.write(&document).await?;
        info!(template, preset_id, "preset deleted");
        Ok(true)
    }

    async fn read(&self) -> Result<PresetDocument> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse presets {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PresetDocument::new()),
            Err(err) => Err(err).with_context(|| format!("read presets {}", self.path.display())),
        }
    }

    async fn write(&self, document: &PresetDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(document).context("serialize presets")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}
