use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content category of a source; selects the collector that handles it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    #[default]
    Blog,
    Youtube,
    Podcast,
    Social,
    Pdf,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blog => "blog",
            Self::Youtube => "youtube",
            Self::Podcast => "podcast",
            Self::Social => "social",
            Self::Pdf => "pdf",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for SourceType {
    fn from(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "blog" => Self::Blog,
            "youtube" => Self::Youtube,
            "podcast" => Self::Podcast,
            "social" => Self::Social,
            "pdf" => Self::Pdf,
            _ => Self::Other(s),
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<SourceType> for String {
    fn from(t: SourceType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a source list, with id and type resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Collector specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Source {
    pub fn new(id: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: id.into(),
            source_type,
            url: None,
            path: None,
            title: None,
            depends_on: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    source_type: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceListJson {
    List(Vec<RawSource>),
    Wrapped { sources: Vec<RawSource> },
}

#[derive(Debug, Deserialize)]
struct SourceListToml {
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceListFormat {
    Json,
    Toml,
}

impl SourceListFormat {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => Ok(Self::Toml),
            Some("yaml") | Some("yml") => {
                anyhow::bail!("YAML source lists are not supported; use JSON or TOML")
            }
            _ => Ok(Self::Json),
        }
    }
}

/// Reads a source list from disk. The format follows the file extension.
pub fn load_sources(path: &Path, default_type: &SourceType) -> anyhow::Result<Vec<Source>> {
    let format = SourceListFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_sources(&text, format, default_type)
}

pub fn parse_sources(
    text: &str,
    format: SourceListFormat,
    default_type: &SourceType,
) -> anyhow::Result<Vec<Source>> {
    let raw = match format {
        SourceListFormat::Json => match serde_json::from_str::<SourceListJson>(text)
            .context("source list must be a JSON array or an object with a \"sources\" array")?
        {
            SourceListJson::List(list) => list,
            SourceListJson::Wrapped { sources } => sources,
        },
        SourceListFormat::Toml => {
            toml::from_str::<SourceListToml>(text)
                .context("source list must contain [[sources]] tables")?
                .sources
        }
    };

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(index, raw)| resolve(raw, index, default_type))
        .collect())
}

fn resolve(raw: RawSource, index: usize, default_type: &SourceType) -> Source {
    let source_type = raw
        .source_type
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(SourceType::from)
        .unwrap_or_else(|| default_type.clone());

    let id = raw
        .id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| raw.url.clone())
        .or_else(|| raw.path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .or_else(|| raw.title.clone().filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| format!("{}-{}", source_type, index + 1));

    Source {
        id,
        source_type,
        url: raw.url,
        path: raw.path,
        title: raw.title,
        depends_on: raw.depends_on,
        extra: raw.extra,
    }
}

/// Groups sources by type, keeping list order inside each group.
pub fn group_by_type(sources: &[Source]) -> BTreeMap<SourceType, Vec<&Source>> {
    let mut groups: BTreeMap<SourceType, Vec<&Source>> = BTreeMap::new();
    for source in sources {
        groups
            .entry(source.source_type.clone())
            .or_default()
            .push(source);
    }
    groups
}
