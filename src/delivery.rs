use crate::encode::OutputFormat;
use crate::options::RawRenderOptions;
use crate::render::{ItemIdentity, PosterError, RenderResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone)]
pub struct LocalOutput {
    root: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ExportMetadata<'a> {
    pub item_id: &'a str,
    pub title: &'a str,
    pub year: Option<i32>,
    pub template: &'a str,
    pub preset: Option<&'a str>,
    pub artwork_url: Option<&'a str>,
    pub logo_url: Option<&'a str>,
    pub options: &'a RawRenderOptions,
    pub content_type: String,
    pub byte_len: usize,
    pub width: u32,
    pub height: u32,
    pub exported_at: String,
}

pub fn safe_name(item: &ItemIdentity) -> String {
    let raw = match item.year {
        Some(year) => format!("{} ({year})", item.title),
        None => item.title.clone(),
    };
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '_' | '-' | '(' | ')'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

impl LocalOutput {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn target(&self, item: &ItemIdentity, format: OutputFormat) -> PathBuf {
        let name = safe_name(item);
        self.root
            .join(&name)
            .join(format!("{name}.{}", format.extension()))
    }

    pub async fn save(&self, item: &ItemIdentity, result: &RenderResult) -> Result<PathBuf, PosterError> {
        let path = self.target(item, result.format);
        write_atomic(&path, &result.bytes).await?;
        info!(path = %path.display(), size = result.byte_len, "poster saved");
        Ok(path)
    }

    pub async fn export_metadata(
        &self,
        item: &ItemIdentity,
        format: OutputFormat,
        metadata: &ExportMetadata<'_>,
    ) -> Result<PathBuf, PosterError> {
        let path = self.target(item, format).with_extension("json");
        let body = serde_json::to_vec_pretty(metadata)
            .map_err(|err| PosterError::DeliveryFailed(format!("serialize metadata: {err}")))?;
        write_atomic(&path, &body).await?;
        Ok(path)
    }
}

pub fn export_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PosterError> {
    let failed = |err: std::io::Error| PosterError::DeliveryFailed(format!("{}: {err}", path.display()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await.map_err(failed)?;
    fs::rename(&tmp, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn identity(title: &str, year: Option<i32>) -> ItemIdentity {
        ItemIdentity {
            title: title.to_string(),
            year,
        }
    }

    fn result() -> RenderResult {
        RenderResult {
            bytes: Bytes::from_static(b"poster"),
            byte_len: 6,
            content_type: mime::IMAGE_JPEG,
            format: OutputFormat::Jpg,
            width: 2,
            height: 3,
            warnings: Vec::new(),
            etag: "\"x\"".to_string(),
        }
    }

    #[test]
    fn names_are_filesystem_safe() {
        assert_eq!(safe_name(&identity("Heat", Some(1995))), "Heat (1995)");
        assert_eq!(
            safe_name(&identity("Mission: Impossible / Fallout", Some(2018))),
            "Mission Impossible  Fallout (2018)"
        );
        assert_eq!(safe_name(&identity("../..", None)), "untitled");
    }

    #[tokio::test]
    async fn save_and_export_land_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalOutput::new(dir.path().to_path_buf());
        let item = identity("Heat", Some(1995));
        let path = output.save(&item, &result()).await.unwrap();
        assert_eq!(path, dir.path().join("Heat (1995)").join("Heat (1995).jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"poster");

        let options = RawRenderOptions::default();
        let metadata = ExportMetadata {
            item_id: "77",
            title: &item.title,
            year: item.year,
            template: "default",
            preset: Some("cinema"),
            artwork_url: Some("https://image.tmdb.org/t/p/original/a.jpg"),
            logo_url: None,
            options: &options,
            content_type: "image/jpeg".to_string(),
            byte_len: 6,
            width: 2,
            height: 3,
            exported_at: export_timestamp(),
        };
        let sidecar = output
            .export_metadata(&item, OutputFormat::Jpg, &metadata)
            .await
            .unwrap();
        assert_eq!(sidecar.extension().unwrap(), "json");
        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(sidecar).unwrap()).unwrap();
        assert_eq!(value["preset"], "cinema");
        assert_eq!(value["item_id"], "77");
    }
}
