// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::model::MatchType;
use crate::template::unescape_html;

pub const MATCH_OPEN: &str = "<span class=\"lov-match\">";
pub const MATCH_CLOSE: &str = "</span>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Text,
    Tag,
    Entity,
}

pub fn highlight(text: &str, search: &str, match_type: MatchType, case_sensitive: bool) -> String {
    let needle: Vec<char> = search.chars().collect();
    if needle.is_empty() {
        return text.to_owned();
    }

    let mut out = String::with_capacity(text.len() + MATCH_OPEN.len() + MATCH_CLOSE.len());
    let mut run = Vec::new();
    let mut at_start = true;
    let mut state = ScanState::Text;

    for ch in text.chars() {
        match state {
            ScanState::Tag => {
                out.push(ch);
                if ch == '>' {
                    state = ScanState::Text;
                }
            }
            ScanState::Entity => {
                if ch == ';' {
                    out.push(ch);
                    state = ScanState::Text;
                } else if ch.is_whitespace() || ch == '<' || ch == '&' {
                    state = ScanState::Text;
                    if ch == '<' {
                        out.push(ch);
                        state = ScanState::Tag;
                    } else if ch == '&' {
                        out.push(ch);
                        state = ScanState::Entity;
                    } else {
                        run.push(ch);
                    }
                } else {
                    out.push(ch);
                }
            }
            ScanState::Text => match ch {
                '<' => {
                    let emitted =
                        flush_run(&mut out, &mut run, &needle, match_type, case_sensitive, at_start);
                    at_start &= !emitted;
                    out.push(ch);
                    state = ScanState::Tag;
                }
                '&' => {
                    flush_run(&mut out, &mut run, &needle, match_type, case_sensitive, at_start);
                    at_start = false;
                    out.push(ch);
                    state = ScanState::Entity;
                }
                _ => run.push(ch),
            },
        }
    }
    flush_run(&mut out, &mut run, &needle, match_type, case_sensitive, at_start);
    out
}

fn flush_run(
    out: &mut String,
    run: &mut Vec<char>,
    needle: &[char],
    match_type: MatchType,
    case_sensitive: bool,
    at_start: bool,
) -> bool {
    if run.is_empty() {
        return false;
    }

    let mut index = 0;
    while index < run.len() {
        let eligible = match match_type {
            MatchType::Contains => true,
            MatchType::StartsWith => at_start && index == 0,
        };
        if eligible && run_matches_at(run, index, needle, case_sensitive) {
            out.push_str(MATCH_OPEN);
            out.extend(&run[index..index + needle.len()]);
            out.push_str(MATCH_CLOSE);
            index += needle.len();
        } else {
            out.push(run[index]);
            index += 1;
        }
    }
    run.clear();
    true
}

fn run_matches_at(run: &[char], index: usize, needle: &[char], case_sensitive: bool) -> bool {
    if index + needle.len() > run.len() {
        return false;
    }
    run[index..index + needle.len()]
        .iter()
        .zip(needle)
        .all(|(left, right)| chars_equal(*left, *right, case_sensitive))
}

fn chars_equal(left: char, right: char, case_sensitive: bool) -> bool {
    if case_sensitive {
        left == right
    } else {
        left == right || left.to_lowercase().eq(right.to_lowercase())
    }
}

pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

// What the user sees: tags dropped, entity references decoded.
pub fn plain_text(text: &str) -> String {
    unescape_html(&strip_markup(text))
}

pub fn text_matches(text: &str, search: &str, match_type: MatchType, case_sensitive: bool) -> bool {
    if search.is_empty() {
        return true;
    }
    let haystack = plain_text(text);
    if case_sensitive {
        return match match_type {
            MatchType::Contains => haystack.contains(search),
            MatchType::StartsWith => haystack.starts_with(search),
        };
    }
    let haystack = haystack.to_lowercase();
    let needle = search.to_lowercase();
    match match_type {
        MatchType::Contains => haystack.contains(&needle),
        MatchType::StartsWith => haystack.starts_with(&needle),
    }
}

#[cfg(test)]
mod tests {
    use super::{highlight, plain_text, strip_markup, text_matches};
    use crate::model::MatchType;

    fn marked(inner: &str) -> String {
        format!("<span class=\"lov-match\">{inner}</span>")
    }

    #[test]
    fn wraps_every_case_insensitive_occurrence() {
        let out = highlight("Banana", "an", MatchType::Contains, false);
        assert_eq!(out, format!("B{}{}a", marked("an"), marked("an")));
    }

    #[test]
    fn never_highlights_inside_tags() {
        let out = highlight("<b class=\"span\">span text</b>", "span", MatchType::Contains, false);
        assert_eq!(out, format!("<b class=\"span\">{} text</b>", marked("span")));
    }

    #[test]
    fn never_highlights_inside_entities() {
        let out = highlight("R&amp;D amp", "amp", MatchType::Contains, false);
        assert_eq!(out, format!("R&amp;D {}", marked("amp")));
    }

    #[test]
    fn bare_ampersand_does_not_swallow_following_text() {
        let out = highlight("Salt & Pepper", "pep", MatchType::Contains, false);
        assert_eq!(out, format!("Salt & {}per", marked("Pep")));
    }

    #[test]
    fn starts_with_only_marks_leading_text() {
        let out = highlight("Ann Annex", "ann", MatchType::StartsWith, false);
        assert_eq!(out, format!("{} Annex", marked("Ann")));
        let leading = highlight("<i>x</i> Ann", "x", MatchType::StartsWith, false);
        assert_eq!(leading, format!("<i>{}</i> Ann", marked("x")));
    }

    #[test]
    fn case_sensitive_mode_respects_case() {
        let out = highlight("Apple apple", "apple", MatchType::Contains, true);
        assert_eq!(out, format!("Apple {}", marked("apple")));
    }

    #[test]
    fn matching_ignores_markup() {
        assert!(text_matches("<b>Sales</b>", "sal", MatchType::StartsWith, false));
        assert!(!text_matches("<b>Sales</b>", "b>", MatchType::Contains, false));
        assert_eq!(strip_markup("<i>R</i>&amp;D"), "R&amp;D");
    }

    #[test]
    fn matching_sees_decoded_entities() {
        assert_eq!(plain_text("<i>R</i>&amp;D"), "R&D");
        assert!(text_matches("R&amp;D", "R&D", MatchType::Contains, false));
        assert!(!text_matches("R&amp;D", "amp", MatchType::Contains, false));
        assert!(text_matches("&lt;none&gt;", "<no", MatchType::StartsWith, false));
    }
}
