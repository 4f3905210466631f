//! Interview topic categories
//!
//! The participant picks one of nine topics before the interview starts.
//! Selection accepts either the ordinal ("3") or any case-insensitive
//! substring of the label ("early", "love &").

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the nine fixed interview topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryTag {
    Introduction,
    EarlyLife,
    Family,
    Education,
    Career,
    LoveAndRelationship,
    PassionsAndHobbies,
    Challenges,
    Reflections,
}

impl CategoryTag {
    /// All categories in menu order
    pub const ALL: [CategoryTag; 9] = [
        CategoryTag::Introduction,
        CategoryTag::EarlyLife,
        CategoryTag::Family,
        CategoryTag::Education,
        CategoryTag::Career,
        CategoryTag::LoveAndRelationship,
        CategoryTag::PassionsAndHobbies,
        CategoryTag::Challenges,
        CategoryTag::Reflections,
    ];

    /// 1-based menu position
    pub fn ordinal(&self) -> usize {
        match self {
            CategoryTag::Introduction => 1,
            CategoryTag::EarlyLife => 2,
            CategoryTag::Family => 3,
            CategoryTag::Education => 4,
            CategoryTag::Career => 5,
            CategoryTag::LoveAndRelationship => 6,
            CategoryTag::PassionsAndHobbies => 7,
            CategoryTag::Challenges => 8,
            CategoryTag::Reflections => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CategoryTag::Introduction => "Introduction",
            CategoryTag::EarlyLife => "Early Life",
            CategoryTag::Family => "Family",
            CategoryTag::Education => "Education",
            CategoryTag::Career => "Career",
            CategoryTag::LoveAndRelationship => "Love & Relationship",
            CategoryTag::PassionsAndHobbies => "Passions & Hobbies",
            CategoryTag::Challenges => "Challenges",
            CategoryTag::Reflections => "Reflections",
        }
    }

    /// Menu label, e.g. `"2. Early Life"`
    pub fn label(&self) -> String {
        format!("{}. {}", self.ordinal(), self.name())
    }

    /// Resolve a user selection
    ///
    /// Matches the ordinal exactly, otherwise the first category whose label
    /// contains the input. Empty input never matches.
    pub fn parse_selection(input: &str) -> Option<Self> {
        let wanted = input.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        Self::ALL.iter().copied().find(|cat| {
            wanted == cat.ordinal().to_string() || cat.label().to_lowercase().contains(&wanted)
        })
    }
}

impl fmt::Display for CategoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_ordinal() {
        assert_eq!(CategoryTag::parse_selection("1"), Some(CategoryTag::Introduction));
        assert_eq!(CategoryTag::parse_selection(" 9 "), Some(CategoryTag::Reflections));
    }

    #[test]
    fn test_parse_by_substring() {
        assert_eq!(CategoryTag::parse_selection("early"), Some(CategoryTag::EarlyLife));
        assert_eq!(CategoryTag::parse_selection("LOVE"), Some(CategoryTag::LoveAndRelationship));
        assert_eq!(CategoryTag::parse_selection("hobbies"), Some(CategoryTag::PassionsAndHobbies));
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        assert_eq!(CategoryTag::parse_selection("astronomy"), None);
        assert_eq!(CategoryTag::parse_selection("   "), None);
        assert_eq!(CategoryTag::parse_selection("10"), None);
    }

    #[test]
    fn test_label_format() {
        assert_eq!(CategoryTag::EarlyLife.label(), "2. Early Life");
        assert_eq!(CategoryTag::ALL.len(), 9);
    }
}
