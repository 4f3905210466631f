//! End-of-interview summary

use melo_common::{EmotionDistribution, Entity};
use melo_pd::{AffectVector, MatchOutcome};
use std::fmt;

/// Analysis of a single participant answer
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerReport {
    pub text: String,
    pub dominant: String,
    pub distribution: EmotionDistribution,
    pub entities: Vec<Entity>,
    pub affect: AffectVector,
    /// Best track among those tagged with this answer's dominant emotion
    pub best: MatchOutcome,
}

/// Everything the interview produced
#[derive(Debug, Clone, PartialEq)]
pub struct InterviewReport {
    pub answers: Vec<AnswerReport>,
    /// Element-wise mean of the per-answer distributions
    pub overall: EmotionDistribution,
    /// `None` when the participant gave no answers
    pub overall_dominant: Option<String>,
    pub overall_match: MatchOutcome,
    pub ambience_keywords: Vec<String>,
    pub memoir: Option<String>,
    pub transcript: String,
    pub turns: u32,
    pub interrupted: bool,
}

fn heading(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "==============================")?;
    writeln!(f, "  {}", title)?;
    writeln!(f, "==============================")
}

fn write_match(f: &mut fmt::Formatter<'_>, outcome: &MatchOutcome) -> fmt::Result {
    match outcome {
        MatchOutcome::Match { track, score } => {
            writeln!(f, "{} – {} (similarity={:.3})", track.title, track.artist, score)
        }
        MatchOutcome::NoMatch => writeln!(f, "No matching song found."),
    }
}

fn format_distribution(dist: &EmotionDistribution) -> String {
    dist.iter()
        .filter(|(_, s)| *s > 0.0)
        .map(|(l, s)| format!("{}={:.2}", l, s))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for InterviewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        heading(f, "INTERVIEW SUMMARY")?;

        if self.answers.is_empty() {
            writeln!(f, "No answers were recorded.")?;
        }

        for answer in &self.answers {
            writeln!(f)?;
            writeln!(f, "> {}", answer.text)?;
            writeln!(f, "  emotion: {} [{}]", answer.dominant, format_distribution(&answer.distribution))?;
            if !answer.entities.is_empty() {
                let entities: Vec<String> =
                    answer.entities.iter().map(|e| format!("{} ({})", e.text, e.label)).collect();
                writeln!(f, "  entities: {}", entities.join(", "))?;
            }
            write!(f, "  music: ")?;
            write_match(f, &answer.best)?;
        }

        if let Some(dominant) = &self.overall_dominant {
            heading(f, "OVERALL MUSIC RECOMMENDATION")?;
            writeln!(f, "Dominant emotion for the memoir: {}", dominant)?;
            write_match(f, &self.overall_match)?;
        }

        if !self.ambience_keywords.is_empty() {
            heading(f, "BACKGROUND SOUND")?;
            writeln!(f, "Ambience keywords: {}", self.ambience_keywords.join(", "))?;
        }

        if let Some(memoir) = &self.memoir {
            heading(f, "FINAL MEMOIR")?;
            writeln!(f, "{}", memoir)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use melo_pd::Track;

    #[test]
    fn test_report_rendering() {
        let track = Track::new("y", "Yesterday", "The Beatles", Some("nostalgia"), AffectVector::CENTROID);
        let report = InterviewReport {
            answers: vec![AnswerReport {
                text: "We used to walk by the river.".to_string(),
                dominant: "nostalgia".to_string(),
                distribution: EmotionDistribution::from_pairs([("nostalgia", 0.8), ("joy", 0.0)]),
                entities: vec![Entity::new("Han River", "LOC")],
                affect: AffectVector::CENTROID,
                best: MatchOutcome::Match {
                    track: track.clone(),
                    score: 0.98765,
                },
            }],
            overall: EmotionDistribution::from_pairs([("nostalgia", 0.8)]),
            overall_dominant: Some("nostalgia".to_string()),
            overall_match: MatchOutcome::NoMatch,
            ambience_keywords: vec!["river".to_string()],
            memoir: None,
            transcript: String::new(),
            turns: 1,
            interrupted: false,
        };

        let text = report.to_string();
        assert!(text.contains("emotion: nostalgia [nostalgia=0.80]"));
        assert!(text.contains("entities: Han River (LOC)"));
        assert!(text.contains("Yesterday – The Beatles (similarity=0.988)"));
        assert!(text.contains("Dominant emotion for the memoir: nostalgia"));
        assert!(text.contains("No matching song found."));
        assert!(text.contains("Ambience keywords: river"));
        assert!(!text.contains("FINAL MEMOIR"));
    }
}
