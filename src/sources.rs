use crate::options::{ArtworkFilter, LogoPreference};
use crate::render::{ItemIdentity, PosterError};
use bytes::Bytes;
use mime::Mime;
use serde::{Deserialize, Serialize};
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDescriptor {
    pub item_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub kind: MediaKind,
    pub tmdb_id: Option<u64>,
    pub labels: Vec<String>,
}

impl ItemDescriptor {
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity {
            title: self.title.clone(),
            year: self.year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkCandidate {
    pub url: String,
    pub has_text: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoCandidate {
    pub url: String,
    pub language: Option<String>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemAssets {
    pub artwork: Vec<ArtworkCandidate>,
    pub logos: Vec<LogoCandidate>,
}

pub trait AssetCatalog: Send + Sync + 'static {
    fn upstream(&self) -> &'static str;

    fn candidates(
        &self,
        item: &ItemDescriptor,
    ) -> impl Future<Output = Result<ItemAssets, PosterError>> + Send;

    fn fetch(&self, url: &str) -> impl Future<Output = Result<Bytes, PosterError>> + Send;
}

pub trait MediaServer: Send + Sync + 'static {
    fn upstream(&self) -> &'static str;

    fn describe(
        &self,
        item_id: &str,
    ) -> impl Future<Output = Result<ItemDescriptor, PosterError>> + Send;

    fn labels(&self, item_id: &str) -> impl Future<Output = Result<Vec<String>, PosterError>> + Send;

    fn upload_poster(
        &self,
        item_id: &str,
        bytes: Bytes,
        content_type: &Mime,
    ) -> impl Future<Output = Result<(), PosterError>> + Send;

    fn remove_label(
        &self,
        item_id: &str,
        label: &str,
    ) -> impl Future<Output = Result<(), PosterError>> + Send;
}

pub fn select_artwork(candidates: &[ArtworkCandidate], filter: ArtworkFilter) -> Option<&ArtworkCandidate> {
    let matches = |candidate: &&ArtworkCandidate| match filter {
        ArtworkFilter::All => true,
        ArtworkFilter::Textless => !candidate.has_text,
        ArtworkFilter::Text => candidate.has_text,
    };
    candidates.iter().find(matches).or_else(|| candidates.first())
}

pub fn select_logo(logos: &[LogoCandidate], preference: LogoPreference) -> Option<&LogoCandidate> {
    match preference {
        LogoPreference::First => logos.first(),
        LogoPreference::Neutral => logos
            .iter()
            .find(|logo| logo.language.as_deref().is_none_or(str::is_empty))
            .or_else(|| logos.first()),
        // ties keep catalog order
        LogoPreference::Widest => logos
            .iter()
            .rev()
            .max_by_key(|logo| logo.width.unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, has_text: bool) -> ArtworkCandidate {
        ArtworkCandidate {
            url: url.to_string(),
            has_text,
            width: None,
            height: None,
        }
    }

    #[test]
    fn filter_prefers_matching_artwork() {
        let candidates = vec![candidate("a", true), candidate("b", false), candidate("c", true)];
        assert_eq!(select_artwork(&candidates, ArtworkFilter::All).unwrap().url, "a");
        assert_eq!(select_artwork(&candidates, ArtworkFilter::Textless).unwrap().url, "b");
        assert_eq!(select_artwork(&candidates, ArtworkFilter::Text).unwrap().url, "a");
    }

    #[test]
    fn filter_falls_back_to_any_artwork() {
        let candidates = vec![candidate("a", true)];
        assert_eq!(select_artwork(&candidates, ArtworkFilter::Textless).unwrap().url, "a");
        assert!(select_artwork(&[], ArtworkFilter::All).is_none());
    }

    fn logo(url: &str, language: Option<&str>, width: Option<u32>) -> LogoCandidate {
        LogoCandidate {
            url: url.to_string(),
            language: language.map(str::to_string),
            width,
        }
    }

    #[test]
    fn first_logo_wins_by_default() {
        let logos = vec![logo("x.png", Some("en"), None), logo("y.png", None, None)];
        assert_eq!(select_logo(&logos, LogoPreference::First).unwrap().url, "x.png");
        assert!(select_logo(&[], LogoPreference::First).is_none());
    }

    #[test]
    fn neutral_preference_skips_localized_logos() {
        let logos = vec![logo("en.png", Some("en"), None), logo("plain.png", None, None)];
        assert_eq!(select_logo(&logos, LogoPreference::Neutral).unwrap().url, "plain.png");
        let localized = vec![logo("en.png", Some("en"), None)];
        assert_eq!(select_logo(&localized, LogoPreference::Neutral).unwrap().url, "en.png");
    }

    #[test]
    fn widest_preference_keeps_catalog_order_on_ties() {
        let logos = vec![
            logo("a.png", Some("en"), Some(800)),
            logo("b.png", None, Some(1200)),
            logo("c.png", None, Some(1200)),
            logo("d.png", None, None),
        ];
        assert_eq!(select_logo(&logos, LogoPreference::Widest).unwrap().url, "b.png");
        assert!(select_logo(&[], LogoPreference::Widest).is_none());
    }
}
