//! Platform record → canonical schema normalizer.
//!
//! [`normalize`] maps a single platform-specific raw record onto
//! [`CanonicalBook`]. It is a pure function and never fails: unusable input
//! degrades to empty defaults rather than an error, so callers must not read
//! reliability out of its output.
//!
//! Shape-sniffing of polymorphic platform payloads (authors, progress,
//! cover) happens exactly once at this boundary, through small tagged-union
//! decoders, instead of repeated runtime type checks in business logic.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{
    CanonicalBook, CoverImages, Platform, RawRecord, ReadingProgress, ReadingStatus,
    SCHEMA_VERSION,
};

/// Collapse internal whitespace runs and trim the ends.
pub fn clean_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip hyphens, colons, whitespace, and a leading case-insensitive
/// `isbn` prefix.
pub fn clean_isbn(raw: &str) -> String {
    let mut s = raw.trim();
    let lower = s.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("isbn") {
        s = &s[s.len() - rest.len()..];
    }
    s.chars()
        .filter(|c| !matches!(c, '-' | ':' | ' ' | '\t'))
        .collect()
}

/// The shapes an `authors` payload arrives in across platforms.
enum AuthorShape {
    /// `"A, B"` or `"A; B"`.
    DelimitedString(String),
    /// `["A", "B"]`.
    StringList(Vec<String>),
    /// `[{"name": "A"}, {"name": "B"}]`.
    NamedObjectList(Vec<Value>),
    Missing,
}

impl AuthorShape {
    fn decode(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => AuthorShape::DelimitedString(s.clone()),
            Some(Value::Array(items)) => {
                if items.iter().any(Value::is_object) {
                    AuthorShape::NamedObjectList(items.clone())
                } else {
                    AuthorShape::StringList(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect(),
                    )
                }
            }
            _ => AuthorShape::Missing,
        }
    }

    /// Resolve to an ordered list of trimmed, non-empty names.
    fn into_names(self) -> Vec<String> {
        let raw_names: Vec<String> = match self {
            AuthorShape::DelimitedString(s) => s
                .split([',', ';', '、'])
                .map(str::to_string)
                .collect(),
            AuthorShape::StringList(items) => items,
            AuthorShape::NamedObjectList(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Object(m) => m.get("name").and_then(Value::as_str).map(str::to_string),
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            AuthorShape::Missing => Vec::new(),
        };
        raw_names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Decode an `authors` (or legacy `author`) payload into normalized names.
pub fn decode_authors(record: &RawRecord) -> Vec<String> {
    let value = record.get("authors").or_else(|| record.get("author"));
    AuthorShape::decode(value).into_names()
}

/// The shapes a progress payload arrives in across platforms.
enum ProgressShape {
    /// Bare number, or `{percentage}` / `{percent}`.
    Percent(f64),
    PageBased { current: f64, total: f64 },
    LocationBased { location: f64, total: f64 },
    RatioBased { read: f64, total: f64 },
    Missing,
}

fn num(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_f64))
}

impl ProgressShape {
    fn decode(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => ProgressShape::Percent(n.as_f64().unwrap_or(0.0)),
            Some(Value::Object(m)) => {
                if let Some(p) = num(m, &["percentage", "percent"]) {
                    return ProgressShape::Percent(p);
                }
                if let (Some(current), Some(total)) = (
                    num(m, &["currentPage", "current_page", "page"]),
                    num(m, &["totalPages", "total_pages", "pages"]),
                ) {
                    return ProgressShape::PageBased { current, total };
                }
                if let (Some(location), Some(total)) = (
                    num(m, &["location", "currentLocation"]),
                    num(m, &["totalLocations", "locations"]),
                ) {
                    return ProgressShape::LocationBased { location, total };
                }
                if let (Some(read), Some(total)) = (num(m, &["read", "ratio"]), num(m, &["total"]))
                {
                    return ProgressShape::RatioBased { read, total };
                }
                ProgressShape::Missing
            }
            _ => ProgressShape::Missing,
        }
    }
}

/// Decode a progress payload into the single canonical shape, clamping
/// the percentage to 0..=100.
pub fn decode_progress(value: Option<&Value>) -> ReadingProgress {
    let clamp = |p: f64| p.clamp(0.0, 100.0);
    match ProgressShape::decode(value) {
        ProgressShape::Percent(p) => {
            let mut progress = ReadingProgress {
                percentage: clamp(p),
                ..Default::default()
            };
            // Percent objects may still carry page counts worth keeping.
            if let Some(Value::Object(m)) = value {
                progress.current_page = num(m, &["currentPage", "current_page", "page"])
                    .map(|v| v.max(0.0) as u32);
                progress.total_pages =
                    num(m, &["totalPages", "total_pages", "pages"]).map(|v| v.max(0.0) as u32);
                progress.last_position = m
                    .get("lastPosition")
                    .or_else(|| m.get("last_position"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            progress
        }
        ProgressShape::PageBased { current, total } => ReadingProgress {
            percentage: if total > 0.0 {
                clamp(current / total * 100.0)
            } else {
                0.0
            },
            current_page: Some(current.max(0.0) as u32),
            total_pages: Some(total.max(0.0) as u32),
            last_position: None,
        },
        ProgressShape::LocationBased { location, total } => ReadingProgress {
            percentage: if total > 0.0 {
                clamp(location / total * 100.0)
            } else {
                0.0
            },
            current_page: None,
            total_pages: None,
            last_position: Some(format!("loc:{}", location as i64)),
        },
        ProgressShape::RatioBased { read, total } => ReadingProgress {
            percentage: if total > 0.0 {
                clamp(read / total * 100.0)
            } else {
                0.0
            },
            ..Default::default()
        },
        ProgressShape::Missing => ReadingProgress::default(),
    }
}

/// Decode a cover payload (bare URL or multi-size object) and back-fill
/// missing sizes from whichever is present, preferring larger sizes.
pub fn decode_cover(value: Option<&Value>) -> CoverImages {
    let mut cover = match value {
        Some(Value::String(url)) if !url.trim().is_empty() => CoverImages {
            original: Some(url.trim().to_string()),
            ..Default::default()
        },
        Some(Value::Object(m)) => {
            let get = |k: &str| {
                m.get(k)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            CoverImages {
                thumbnail: get("thumbnail"),
                small: get("small"),
                medium: get("medium"),
                large: get("large"),
                original: get("original").or_else(|| get("url")),
            }
        }
        _ => CoverImages::default(),
    };

    if cover.is_empty() {
        return cover;
    }

    // Largest available size wins as the fallback for the gaps.
    let fallback = cover
        .original
        .clone()
        .or_else(|| cover.large.clone())
        .or_else(|| cover.medium.clone())
        .or_else(|| cover.small.clone())
        .or_else(|| cover.thumbnail.clone());

    for slot in [
        &mut cover.original,
        &mut cover.large,
        &mut cover.medium,
        &mut cover.small,
        &mut cover.thumbnail,
    ] {
        if slot.is_none() {
            slot.clone_from(&fallback);
        }
    }
    cover
}

fn hash_core_fields(domain: &str, title: &str, authors: &[String], isbn: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update([0]);
    hasher.update(title.trim().to_lowercase().as_bytes());
    for author in authors {
        hasher.update([0]);
        hasher.update(author.as_bytes());
    }
    hasher.update([0]);
    hasher.update(isbn.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content hash over exactly {title, authors, isbn}. Stable across re-runs
/// on unchanged core fields; changes when any of the three change.
pub fn data_fingerprint(title: &str, authors: &[String], isbn: Option<&str>) -> String {
    hash_core_fields("fingerprint", title, authors, isbn)
}

/// Join key for the same title across platforms, derived from the same
/// three core fields as the fingerprint.
pub fn cross_platform_id(title: &str, authors: &[String], isbn: Option<&str>) -> String {
    let digest = hash_core_fields("cross-platform-id", title, authors, isbn);
    format!("xp-{}", &digest[..16])
}

fn parse_timestamp(record: &RawRecord, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|k| record.get_str(k))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map a raw platform record onto the canonical v2.0 schema.
///
/// Best effort: missing or malformed fields become empty defaults. Running
/// the output back through this function leaves `data_fingerprint` and
/// `cross_platform_id` unchanged.
pub fn normalize(raw: &RawRecord, platform: Platform) -> CanonicalBook {
    let title = raw.get_str("title").map(clean_title).unwrap_or_default();
    let authors = decode_authors(raw);

    let isbn = raw
        .get_str("isbn")
        .map(clean_isbn)
        .filter(|s| !s.is_empty());

    let fingerprint = data_fingerprint(&title, &authors, isbn.as_deref());
    let xp_id = cross_platform_id(&title, &authors, isbn.as_deref());

    // Always platform-prefixed, so the fallback cannot collide with the
    // same title normalized on another platform.
    let id = match raw.identifier() {
        Some(native) => format!("{}-{}", platform.as_str(), native),
        None => format!("{}-{}", platform.as_str(), xp_id),
    };

    let status = raw
        .get("status")
        .or_else(|| raw.get("completed"))
        .map(ReadingStatus::from_raw)
        .unwrap_or_default();

    let rating = raw
        .get("rating")
        .and_then(Value::as_f64)
        .map(|r| r.clamp(0.0, 5.0));

    let tags = match raw.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Default::default(),
    };

    let now = Utc::now();

    CanonicalBook {
        id,
        cross_platform_id: xp_id,
        data_fingerprint: fingerprint,
        platform: Some(platform),
        title,
        authors,
        publisher: raw
            .get_str("publisher")
            .map(clean_title)
            .filter(|s| !s.is_empty()),
        isbn,
        cover: decode_cover(raw.get("cover").or_else(|| raw.get("coverUrl"))),
        progress: decode_progress(raw.get("progress")),
        status,
        rating,
        tags,
        source: platform.as_str().to_string(),
        created_at: parse_timestamp(raw, &["createdAt", "created_at"]).unwrap_or(now),
        updated_at: parse_timestamp(raw, &["updatedAt", "updated_at"]).unwrap_or(now),
        schema_version: SCHEMA_VERSION.to_string(),
        platform_metadata: match raw.get("platformMetadata").or_else(|| raw.get("metadata")) {
            Some(Value::Object(m)) => m.clone(),
            _ => Default::default(),
        },
        sync_status: Default::default(),
    }
}
