use std::sync::LazyLock;

use regex::Regex;

use crate::models::DetectionResult;


/// Phrases that usually precede or accompany an attendance code
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "attendance",
    "attendence",
    "enter the code",
    "attendance code",
    "submit your attendance",
    "mark your attendance",
    "fill the attendance",
    "the code is",
];

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{3,6})\b").expect("code pattern compiles"));

/// Keyword and code detector
/// Stateless apart from the fixed keyword list
#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().copied())
    }
}

impl Classifier {
    /// Keywords are trimmed and lower-cased; blanks are dropped.
    /// An empty list falls back to `DEFAULT_KEYWORDS`.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        if keywords.is_empty() {
            return Self::default();
        }

        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn classify(&self, text: &str) -> DetectionResult {
        DetectionResult {
            matched_keyword: self.find_keyword(text),
            matched_code: find_code(text),
        }
    }

    /// First entry in list order, not text order
    fn find_keyword(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        self.keywords
            .iter()
            .find(|kw| lowered.contains(kw.as_str()))
            .cloned()
    }
}

fn find_code(text: &str) -> Option<String> {
    CODE_PATTERN.find(text).map(|m| m.as_str().to_string())
}
