//! Deterministic outbox file names.
//!
//! `<inbox basename>__<MODE>_<slug>_<hash8>.out.md`
//!
//! The same item and mode always map to the same name, which is what lets
//! the orchestrator find an output left behind by an interrupted run.

use sha2::{Digest, Sha256};

use crate::pipeline::types::Mode;
use crate::storage::file_name;

/// Suffix of every generated output.
pub const OUTPUT_SUFFIX: &str = ".out.md";

const SLUG_MAX: usize = 40;
const NAME_MAX: usize = 200;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "for", "and", "or", "to", "in", "on", "with", "by", "from", "using",
    "via", "method", "methods", "compound", "compounds", "study", "studies", "analysis",
    "evaluation",
];

/// Outbox file name for an item processed under `mode`.
pub fn output_file_name(mode: Mode, input_path: &str) -> String {
    let base = stem(file_name(input_path));
    let base = if base.is_empty() { "input" } else { base };
    let slug = slugify_title(&title_from_name(base));
    let hash = short_hash(&format!("{}|{}", mode.as_str(), input_path));
    let generated = safe_filename(&format!("{}_{slug}_{hash}", mode.tag()), NAME_MAX);
    let combined = safe_filename(&format!("{base}__{generated}"), NAME_MAX);
    format!("{combined}{OUTPUT_SUFFIX}")
}

/// Same base as an output name with a different extension (`.txt`).
pub fn same_base_name(output_name: &str, ext: &str) -> String {
    let ext = match ext.trim() {
        "" => String::new(),
        e if e.starts_with('.') => e.to_string(),
        e => format!(".{e}"),
    };
    let base = output_name
        .strip_suffix(OUTPUT_SUFFIX)
        .or_else(|| output_name.strip_suffix(".md"))
        .unwrap_or(output_name);
    format!("{base}{ext}")
}

/// Extension of a file name including the dot, or empty.
pub fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[i..],
        _ => "",
    }
}

/// Lowercase, stop-word-free, hyphenated slug.
pub fn slugify_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let all: Vec<&str> = cleaned.split_whitespace().collect();
    let kept: Vec<&str> = all
        .iter()
        .copied()
        .filter(|w| !STOPWORDS.contains(w))
        .collect();
    let words = if kept.is_empty() { all } else { kept };

    let mut slug = String::new();
    for part in words.join("-").split('-').filter(|p| !p.is_empty()) {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(part);
    }
    if slug.len() > SLUG_MAX {
        slug.truncate(SLUG_MAX);
        slug = slug.trim_end_matches('-').to_string();
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Strip characters that are unsafe in file names and collapse whitespace.
pub fn safe_filename(s: &str, max_len: usize) -> String {
    let replaced: String = s
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c => c,
        })
        .collect();
    let joined = replaced.split_whitespace().collect::<Vec<_>>().join("_");
    let mut out: String = joined.chars().take(max_len).collect();
    out = out.trim_matches('_').to_string();
    if out.is_empty() { "output".to_string() } else { out }
}

fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

fn title_from_name(base: &str) -> String {
    base.replace(['_', '-'], " ").trim().to_string()
}

fn short_hash(s: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(s.as_bytes()));
    hex.truncate(8);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_shape() {
        let name = output_file_name(Mode::Memo, "/0-Inbox/note1.txt");
        assert!(name.starts_with("note1__MEMO_note1_"));
        assert!(name.ends_with(".out.md"));
        let hash = name
            .trim_end_matches(OUTPUT_SUFFIX)
            .rsplit('_')
            .next()
            .unwrap();
        assert_eq!(hash.len(), 8);
    }

    #[test]
    fn output_name_is_deterministic_per_mode_and_path() {
        let a = output_file_name(Mode::Paper, "/0-Inbox/note2.md");
        assert_eq!(a, output_file_name(Mode::Paper, "/0-Inbox/note2.md"));
        assert_ne!(a, output_file_name(Mode::Memo, "/0-Inbox/note2.md"));
        assert_ne!(a, output_file_name(Mode::Paper, "/0-Inbox/sub/note2.md"));
    }

    #[test]
    fn slug_drops_stopwords_and_symbols() {
        assert_eq!(
            slugify_title("A Study of the Kinase Inhibitors (2024)"),
            "kinase-inhibitors-2024"
        );
        assert_eq!(slugify_title("the of"), "the-of");
        assert_eq!(slugify_title("!!!"), "untitled");
        assert!(slugify_title(&"long ".repeat(30)).len() <= 40);
    }

    #[test]
    fn unicode_titles_fall_back() {
        assert_eq!(slugify_title("特許メモ"), "untitled");
        let name = output_file_name(Mode::Patent, "/0-Inbox/特許メモ.txt");
        assert!(name.starts_with("特許メモ__PATENT_untitled_"));
    }

    #[test]
    fn same_base_swaps_extension() {
        assert_eq!(same_base_name("x__MEMO_x_12345678.out.md", ".txt"), "x__MEMO_x_12345678.txt");
        assert_eq!(same_base_name("x.md", "txt"), "x.txt");
        assert_eq!(extension("note.TXT"), ".TXT");
        assert_eq!(extension(".hidden"), "");
    }

    #[test]
    fn safe_filename_replaces_separators() {
        assert_eq!(safe_filename("a/b: c  d", 100), "a-b-_c_d");
        assert_eq!(safe_filename("   ", 10), "output");
    }
}
