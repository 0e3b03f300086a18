//! Shared utility functions.
//!
//! - `mime`: MIME detection and media categories
//! - formatting helpers for sizes and durations
//! - slug and comma-separated list normalization used for natural keys

mod mime;

pub use mime::{
    detect_mime, guess_mime_from_filename, guess_mime_from_url, is_normalizable_image,
    mime_to_extension, MediaKind,
};

use std::time::Duration;

/// Format a byte count as a human-readable size.
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a duration as `1h 02m 03s`, `2m 03s` or `4.2s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Normalize a title into a URL-safe slug.
///
/// Lowercases, folds common accented Latin letters, and collapses every run of
/// non-alphanumeric characters into a single hyphen.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;

    for ch in input.chars() {
        let folded = fold_accent(ch);
        if folded.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(folded.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

fn fold_accent(ch: char) -> char {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        other => other,
    }
}

/// Split a comma-separated string into trimmed, non-empty entries.
pub fn split_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Last path segment of a URL or storage key, without query or fragment.
pub fn filename_from_key(key: &str) -> String {
    let path = key.split('?').next().unwrap_or(key);
    let path = path.split('#').next().unwrap_or(path);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string()
}

/// Replace the extension of a filename.
pub fn with_extension(filename: &str, extension: &str) -> String {
    match filename.rfind('.') {
        Some(pos) if pos > 0 => format!("{}.{}", &filename[..pos], extension),
        _ => format!("{}.{}", filename, extension),
    }
}
