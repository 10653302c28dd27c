// src/text.rs
//! Text helpers shared by all providers: sentence splitting, mail body
//! paragraphs and base64url payload handling.

use anyhow::{Context, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of `!`/`?` and ellipses followed by whitespace become a plain `". "` boundary.
static RE_TERMINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[!?]+|\.{3,}|…)\s+").expect("terminal punctuation regex"));

static RE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.;]\s+").expect("sentence boundary regex"));

static RE_PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("paragraph regex"));

/// Gmail sends base64url with or without padding.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Split free text into display sentences.
///
/// Heuristic on purpose: abbreviations like "e.g. this" are over-split.
/// A period stays attached to its sentence, a semicolon is dropped, and
/// empty segments are discarded.
pub fn split_sentences(text: &str) -> Vec<String> {
    let canonical = RE_TERMINAL.replace_all(text, ". ");

    let mut out = Vec::new();
    let mut last = 0usize;
    for m in RE_BOUNDARY.find_iter(&canonical) {
        let end = if canonical[m.start()..].starts_with('.') {
            m.start() + 1
        } else {
            m.start()
        };
        push_segment(&mut out, &canonical[last..end]);
        last = m.end();
    }
    push_segment(&mut out, &canonical[last..]);
    out
}

fn push_segment(out: &mut Vec<String>, segment: &str) {
    let s = segment.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

/// Main body of a plain-text mail: quoted lines (`>` prefix) are dropped and
/// the rest is split into paragraphs on blank lines.
pub fn message_paragraphs(body: &str) -> Vec<String> {
    let unix = body.replace("\r\n", "\n");
    let kept = unix
        .split('\n')
        .filter(|line| !line.starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n");

    RE_PARAGRAPH
        .split(&kept)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decode a base64url payload into (lossy) UTF-8 text.
pub fn decode_base64url_text(data: &str) -> Result<String> {
    let bytes = BASE64URL
        .decode(data.trim().as_bytes())
        .context("decoding base64url payload")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `data:` URI for a base64 or base64url image payload.
pub fn image_data_uri(mime_type: &str, data: &str) -> String {
    let standard: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    format!("data:{mime_type};base64,{standard}")
}

/// True for `image/*` MIME types.
pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type
        .get(..6)
        .is_some_and(|p| p.eq_ignore_ascii_case("image/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation_and_semicolons() {
        let out = split_sentences("Hello world! Next sentence... Another; one.");
        assert_eq!(out, vec!["Hello world.", "Next sentence.", "Another", "one."]);
    }

    #[test]
    fn repeated_marks_collapse_to_one_boundary() {
        let out = split_sentences("Wow!! Really?  Yes… fine");
        assert_eq!(out, vec!["Wow.", "Really.", "Yes.", "fine"]);
    }

    #[test]
    fn abbreviations_are_over_split() {
        let out = split_sentences("See e.g. this");
        assert_eq!(out, vec!["See e.g.", "this"]);
    }

    #[test]
    fn empty_text_has_no_sentences() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn paragraphs_skip_quotes_and_blank_lines() {
        let body = "Hi there,\r\nsee below.\r\n\r\n> old reply\r\n>> older\r\n\r\n \r\nBye";
        let out = message_paragraphs(body);
        assert_eq!(out, vec!["Hi there,\nsee below.", "Bye"]);
    }

    #[test]
    fn base64url_text_accepts_missing_padding() {
        let enc = BASE64URL.encode("héllo?".as_bytes());
        let unpadded = enc.trim_end_matches('=');
        assert_eq!(decode_base64url_text(unpadded).unwrap(), "héllo?");
    }

    #[test]
    fn data_uri_uses_standard_alphabet() {
        assert_eq!(image_data_uri("image/png", "ab-_"), "data:image/png;base64,ab+/");
        assert!(is_image_mime("IMAGE/jpeg"));
        assert!(!is_image_mime("text/plain"));
    }
}
