// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tag extraction from activity free text.

use regex::Regex;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([\p{L}\d_-]+)").expect("hashtag pattern"));

static BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([\p{L}\d_-]+)\]").expect("bracket pattern"));

/// Which tag syntax to recognize, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagStyle {
    /// `#recovery` in the description
    #[default]
    Hashtag,
    /// `[base-build]` in the name; all-digit tokens like `[12]` are lap
    /// markers
    Bracket,
}

impl FromStr for TagStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hashtag" => Ok(TagStyle::Hashtag),
            "bracket" => Ok(TagStyle::Bracket),
            other => Err(format!("unknown tag style: {}", other)),
        }
    }
}

/// Extracts case-sensitive, de-duplicated tags in first-seen order.
#[derive(Debug, Clone, Copy)]
pub struct TagExtractor {
    style: TagStyle,
}

impl TagExtractor {
    pub fn new(style: TagStyle) -> Self {
        Self { style }
    }

    /// Hashtags come from the description, bracket tags from the name.
    pub fn extract(&self, name: &str, description: Option<&str>) -> Vec<String> {
        let (pattern, text) = match self.style {
            TagStyle::Hashtag => (&*HASHTAG, description.unwrap_or_default()),
            TagStyle::Bracket => (&*BRACKET, name),
        };

        let mut seen = HashSet::new();
        let mut tags = Vec::new();

        for token in pattern.captures_iter(text).filter_map(|c| c.get(1)) {
            let token = token.as_str();
            if self.style == TagStyle::Bracket && token.chars().all(char::is_numeric) {
                continue;
            }
            if seen.insert(token.to_string()) {
                tags.push(token.to_string());
            }
        }

        tags
    }
}
