//! Interview transcript
//!
//! Stored as speaker-prefixed lines (`"Melo: ..."`, `"Participant: ..."`)
//! joined with newlines, which is also the format handed to the memoir
//! writer.

use serde::Serialize;

/// Speaker prefix for participant lines
pub const PARTICIPANT: &str = "Participant";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptLine {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    interviewer: String,
    lines: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn new(interviewer: impl Into<String>) -> Self {
        Self {
            interviewer: interviewer.into(),
            lines: Vec::new(),
        }
    }

    /// Append one question/answer exchange
    pub fn push_exchange(&mut self, question: &str, answer: &str) {
        self.lines.push(TranscriptLine {
            speaker: self.interviewer.clone(),
            text: question.to_string(),
        });
        self.lines.push(TranscriptLine {
            speaker: PARTICIPANT.to_string(),
            text: answer.to_string(),
        });
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Participant answers, oldest first
    pub fn answers(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines
            .iter()
            .filter(|l| l.speaker == PARTICIPANT)
            .map(|l| l.text.as_str())
    }

    pub fn answer_count(&self) -> usize {
        self.answers().count()
    }

    pub fn last_answer(&self) -> Option<&str> {
        self.answers().last()
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{}: {}", l.speaker, l.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Participant answers from a rendered transcript
///
/// Lines without the participant prefix are skipped; answer text is trimmed
/// and blank answers are dropped.
pub fn parse_participant_lines(raw: &str) -> Vec<String> {
    let prefix = format!("{}:", PARTICIPANT);
    raw.lines()
        .filter_map(|line| line.trim_start().strip_prefix(prefix.as_str()))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}
