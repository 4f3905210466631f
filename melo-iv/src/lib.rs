//! # Melo Interviewer Library (melo-iv)
//!
//! Conducts a guided memoir interview.
//!
//! **Purpose:** Decide what to ask next, collect answers, and turn the
//! emotional tone of the conversation into ambience and a closing track.
//!
//! **Architecture:** [`orchestrator::InterviewOrchestrator`] composes the
//! dialogue state machine with the melo-pd matcher and the melo-ap ambience
//! controller. Everything outside the engine (analysis, typed or spoken answers,
//! memoir writing) is reached through the traits in [`collaborators`].

pub mod collaborators;
pub mod dialogue;
pub mod orchestrator;
pub mod report;
pub mod transcript;

pub use collaborators::{
    Analysis, Analyzer, AnswerSource, CollaboratorError, EnvironmentDetector, MemoirWriter, Reply,
    SpeechAnswerSource, Transcriber,
};
pub use dialogue::{DialogueState, Phase, QuestionGenerator, TemplateChooser};
pub use orchestrator::InterviewOrchestrator;
pub use report::{AnswerReport, InterviewReport};
pub use transcript::{parse_participant_lines, Transcript};
