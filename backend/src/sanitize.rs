//! Title to storage-key transform.
//!
//! The output doubles as the on-disk filename and the index key, so it has to be
//! a single safe path component of bounded size. The transform is pure: two titles
//! that sanitize to the same key share one artifact and the later download wins.

use unicode_normalization::UnicodeNormalization;

use crate::artifact::ArtifactFormat;

pub const DEFAULT_MAX_LEN: usize = 80;

// Keeps `stem + ".mp3"` under the 255 byte NAME_MAX of common filesystems.
const MAX_STEM_BYTES: usize = 240;
const ELLIPSIS: &str = "...";
const FALLBACK_STEM: &str = "untitled";

pub fn sanitize(title: &str) -> String {
    sanitize_with_limit(title, DEFAULT_MAX_LEN)
}

pub fn sanitize_with_limit(title: &str, max_len: usize) -> String {
    let mut sanitized = String::with_capacity(title.len());

    for character in title.nfd() {
        if is_permitted(character) {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    if sanitized.chars().all(|character| matches!(character, '.' | ' ')) {
        return FALLBACK_STEM.to_string();
    }

    if sanitized.chars().count() <= max_len && sanitized.len() <= MAX_STEM_BYTES {
        return sanitized;
    }

    if max_len <= ELLIPSIS.len() {
        return sanitized.chars().take(max_len).collect();
    }

    let keep_chars = max_len - ELLIPSIS.len();
    let keep_bytes = MAX_STEM_BYTES - ELLIPSIS.len();
    let mut truncated = String::with_capacity(keep_bytes + ELLIPSIS.len());
    for character in sanitized.chars().take(keep_chars) {
        if truncated.len() + character.len_utf8() > keep_bytes {
            break;
        }
        truncated.push(character);
    }
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Store and index key for a downloaded title.
pub fn artifact_key(title: &str, format: ArtifactFormat) -> String {
    format!("{}.{}", sanitize(title), format.extension())
}

pub fn is_permitted(character: char) -> bool {
    character.is_alphanumeric()
        || is_hangul(character)
        || matches!(character, ' ' | '.' | '_' | '-')
}

fn is_hangul(character: char) -> bool {
    matches!(
        character,
        '\u{1100}'..='\u{11FF}'
            | '\u{3130}'..='\u{318F}'
            | '\u{A960}'..='\u{A97F}'
            | '\u{AC00}'..='\u{D7A3}'
            | '\u{D7B0}'..='\u{D7FF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(sanitize("AC/DC: Live? <2024>"), "AC_DC_ Live_ _2024_");
        assert_eq!(sanitize("a\\b\0c\nd"), "a_b_c_d");
    }

    #[test]
    fn keeps_permitted_punctuation() {
        assert_eq!(sanitize("my_clip - part.2"), "my_clip - part.2");
    }

    #[test]
    fn hangul_survives_decomposition() {
        let key = sanitize("뉴진스 노래");
        assert!(key.chars().all(is_permitted));
        assert!(!key.contains('_'));
        assert_eq!(key.chars().filter(|c| *c == ' ').count(), 1);
    }

    #[test]
    fn combining_marks_become_underscores() {
        assert_eq!(sanitize("café"), "cafe_");
    }

    #[test]
    fn long_titles_are_truncated_with_ellipsis() {
        let title = "x".repeat(200);
        let key = sanitize(&title);
        assert_eq!(key.chars().count(), DEFAULT_MAX_LEN);
        assert!(key.ends_with("..."));
        assert_eq!(&key[..77], &title[..77]);
    }

    #[test]
    fn exactly_max_len_is_untouched() {
        let title = "y".repeat(DEFAULT_MAX_LEN);
        assert_eq!(sanitize(&title), title);
    }

    #[test]
    fn wide_characters_stay_under_the_byte_bound() {
        let title = "\u{20000}".repeat(DEFAULT_MAX_LEN + 10);
        let key = sanitize(&title);
        assert!(key.len() <= MAX_STEM_BYTES);
        assert!(key.chars().count() <= DEFAULT_MAX_LEN);
        assert!(key.ends_with("..."));
    }

    #[test]
    fn degenerate_titles_fall_back() {
        assert_eq!(sanitize(""), "untitled");
        assert_eq!(sanitize(".."), "untitled");
        assert_eq!(sanitize("   "), "untitled");
    }

    #[test]
    fn output_is_deterministic_and_bounded() {
        let titles = [
            "Rick Astley - Never Gonna Give You Up (Official Music Video)",
            "🔥🔥 BEST OF 2023 🔥🔥 | mix",
            "../../etc/passwd",
            "日本語のタイトル／スラッシュ",
            "Ünïcödé ñame with \t tabs",
        ];

        for title in titles {
            let first = sanitize(title);
            assert_eq!(first, sanitize(title));
            assert!(first.chars().count() <= DEFAULT_MAX_LEN);
            assert!(first.chars().all(is_permitted), "{first:?}");
            assert!(!first.contains('/'));
        }
    }

    #[test]
    fn key_carries_the_container_extension() {
        assert_eq!(artifact_key("video", ArtifactFormat::Audio), "video.mp3");
        assert_eq!(artifact_key("a/b", ArtifactFormat::Video), "a_b.mp4");
    }
}
