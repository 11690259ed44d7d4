//! Filename sanitization and output-path templating.
//!
//! Sanitization removes or replaces characters that are invalid on Windows,
//! Linux or macOS while preserving valid Unicode such as CJK text.

use std::borrow::Cow;
use std::fmt::Write as _;

use chrono::{DateTime, TimeZone};

use crate::{Error, Result};

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Segments longer than this (in UTF-8 bytes) trigger title truncation.
/// 256-byte filesystem limit minus room for suffixes like ` part12.ts.json`.
pub const MAX_SEGMENT_BYTES: usize = 224;

/// Byte budget for a truncated title (before the `...` marker).
pub const TRUNCATED_TITLE_BYTES: usize = 147;

/// Values substituted into an output path template.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathFields<'a> {
    pub plugin: &'a str,
    pub id: &'a str,
    pub author: &'a str,
    pub category: &'a str,
    pub title: &'a str,
}

/// Sanitize a string for use as a single path segment on all platforms.
///
/// This function:
/// 1. Replaces control characters and Windows-invalid characters with `_`
/// 2. Collapses consecutive replacements into one
/// 3. Trims leading/trailing spaces and dots
/// 4. Prefixes Windows reserved names with `_`
/// 5. Returns "unnamed" if the result would be empty
///
/// # Examples
///
/// ```
/// use vigil::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename("观看一只青蛙?"), "观看一只青蛙_");
/// assert_eq!(sanitize_filename(""), "unnamed");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "unnamed".to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}

/// Sanitize every `/`-separated segment of a relative path.
///
/// Empty segments are dropped; the result is stable under repeated application.
pub fn sanitize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(sanitize_filename)
        .collect::<Vec<_>>()
        .join("/")
}

/// Truncate `input` to at most `max_bytes` UTF-8 bytes without splitting a
/// character, appending `...` when anything was cut.
pub fn truncate_to_byte_size(input: &str, max_bytes: usize) -> Cow<'_, str> {
    if input.len() <= max_bytes {
        return Cow::Borrowed(input);
    }
    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}...", input[..end].trim()))
}

/// Expand strftime directives in `template` for the given instant.
///
/// Invalid directives are reported as configuration errors instead of panicking.
pub fn expand_datetime<Tz>(template: &str, now: &DateTime<Tz>) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut expanded = String::with_capacity(template.len() * 2);
    write!(expanded, "{}", now.format(template))
        .map_err(|_| Error::config(format!("invalid date directive in template: {template}")))?;
    Ok(expanded)
}

/// Resolve an output path (relative, without extension) from a template.
///
/// Placeholders `{plugin}`, `{id}`, `{author}`, `{category}` and `{title}`
/// are replaced by sanitized values *after* strftime expansion, so a `%` in
/// a title is never read as a date directive. If any resulting segment is
/// longer than [`MAX_SEGMENT_BYTES`], the title is truncated.
pub fn format_output_path<Tz>(
    template: &str,
    fields: &PathFields<'_>,
    now: &DateTime<Tz>,
) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let dated = expand_datetime(template, now)?;
    let with_identity = dated
        .replace("{plugin}", &sanitize_filename(fields.plugin))
        .replace("{id}", &sanitize_filename(fields.id))
        .replace("{author}", &sanitize_filename(fields.author))
        .replace("{category}", &sanitize_filename(fields.category));

    let full_title = sanitize_filename(fields.title);
    let full = with_identity.replace("{title}", &full_title);
    let too_long = full.split('/').any(|segment| segment.len() > MAX_SEGMENT_BYTES);

    let resolved = if too_long {
        let short_title = truncate_to_byte_size(&full_title, TRUNCATED_TITLE_BYTES);
        with_identity.replace("{title}", &short_title)
    } else {
        full
    };

    Ok(sanitize_path(&resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone, Utc};

    #[test]
    fn test_empty_string() {
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn test_only_invalid_characters() {
        assert_eq!(sanitize_filename("???"), "_");
        assert_eq!(sanitize_filename("<>:"), "_");
    }

    #[test]
    fn test_windows_reserved_names() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("con"), "_con");
        assert_eq!(sanitize_filename("LPT1"), "_LPT1");
        assert_eq!(sanitize_filename("nul.ts"), "_nul.ts");
    }

    #[test]
    fn test_leading_trailing_spaces_and_dots() {
        assert_eq!(sanitize_filename("  hello  "), "hello");
        assert_eq!(sanitize_filename(" . hello . "), "hello");
    }

    #[test]
    fn test_cjk_preserved() {
        assert_eq!(sanitize_filename("観看一只青蛙?"), "観看一只青蛙_");
        assert_eq!(sanitize_filename("안녕하세요"), "안녕하세요");
    }

    #[test]
    fn test_slash_in_value_cannot_create_directories() {
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let inputs = [
            "hello?world",
            "観看一只青蛙?",
            "CON",
            "  test  ",
            "...dots...",
            "twitch/author//2024-01/[x] t?t (1)",
            "/abs/./path/../x",
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            assert_eq!(once, sanitize_filename(&once), "filename: {input}");

            let once = sanitize_path(input);
            assert_eq!(once, sanitize_path(&once), "path: {input}");
        }
    }

    #[test]
    fn test_truncate_short_string_is_borrowed() {
        assert!(matches!(truncate_to_byte_size("short", 10), Cow::Borrowed("short")));
    }

    #[test]
    fn test_truncate_never_splits_multibyte_chars() {
        // Each of these is 3 bytes in UTF-8.
        let title = "青".repeat(100);
        for limit in 1..=20 {
            let truncated = truncate_to_byte_size(&title, limit);
            let body = truncated.strip_suffix("...").unwrap();
            assert!(body.len() <= limit);
            assert_eq!(body.len() % 3, 0);
            assert!(std::str::from_utf8(body.as_bytes()).is_ok());
        }

        let mixed = format!("ab{}", "😀".repeat(60));
        let truncated = truncate_to_byte_size(&mixed, TRUNCATED_TITLE_BYTES);
        assert!(truncated.len() <= TRUNCATED_TITLE_BYTES + 3);
        assert!(truncated.starts_with("ab😀"));
    }

    #[test]
    fn test_format_output_path_default_template() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 21, 5, 7).unwrap();
        let fields = PathFields {
            plugin: "twitch",
            id: "123",
            author: "someone",
            category: "Just Chatting",
            title: "hello: world?",
        };
        let path = format_output_path(
            "{plugin}/{author}/%Y-%m/[%Y%m%d_%H%M%S][{category}] {title} ({id})",
            &fields,
            &now,
        )
        .unwrap();
        assert_eq!(
            path,
            "twitch/someone/2024-03/[20240309_210507][Just Chatting] hello_ world_ (123)"
        );
    }

    #[test]
    fn test_percent_in_title_is_not_a_date_directive() {
        let now = Local::now();
        let fields = PathFields {
            title: "100%d done",
            ..Default::default()
        };
        let path = format_output_path("{title}", &fields, &now).unwrap();
        assert_eq!(path, "100%d done");
    }

    #[test]
    fn test_long_title_is_truncated() {
        let now = Local::now();
        let title = "가".repeat(120); // 360 bytes
        let fields = PathFields {
            plugin: "p",
            id: "1",
            author: "a",
            category: "c",
            title: &title,
        };
        let path = format_output_path("{plugin}/[{category}] {title} ({id})", &fields, &now).unwrap();

        let last = path.rsplit('/').next().unwrap();
        assert!(last.len() <= MAX_SEGMENT_BYTES);
        assert!(last.contains("..."));
        assert!(last.ends_with(" (1)"));
    }

    #[test]
    fn test_invalid_date_directive_is_an_error() {
        let now = Local::now();
        let result = format_output_path("%Q{title}", &PathFields::default(), &now);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
