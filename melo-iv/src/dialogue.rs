//! Dialogue progression and question selection
//!
//! Each interview covers five phases exactly once, in fixed order:
//! CONTEXT → PEOPLE → FEELINGS → COPING → MEANING
//!
//! Once every phase gate is set, questions follow the dominant emotion of
//! the previous answer, with a generic catch-all for emotions that have no
//! template set. A chosen topic category overrides both modes and leaves
//! the gates untouched.

use melo_common::{CategoryTag, EmotionLabel, Entity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Asked when the dominant emotion has no template set
pub const GENERIC_QUESTION: &str = "Is there anything else about this experience that you would like to add?";

/// Interview phase, in asking order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Context,
    People,
    Feelings,
    Coping,
    Meaning,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [
        Phase::Context,
        Phase::People,
        Phase::Feelings,
        Phase::Coping,
        Phase::Meaning,
    ];

    fn index(&self) -> usize {
        match self {
            Phase::Context => 0,
            Phase::People => 1,
            Phase::Feelings => 2,
            Phase::Coping => 3,
            Phase::Meaning => 4,
        }
    }

    pub fn templates(&self) -> &'static [&'static str] {
        match self {
            Phase::Context => &[
                "Could you tell me a bit more about that experience?",
                "When you picture that moment, what scenes come to mind?",
            ],
            Phase::People => &[
                "Who were the important people in this memory?",
                "How did the people around you influence this experience?",
            ],
            Phase::Feelings => &[
                "How did you feel at that time?",
                "When you think back on this, what feeling comes up first?",
            ],
            Phase::Coping => &[
                "How did you get through that period day-to-day?",
                "Was there anything or anyone that helped you cope?",
            ],
            Phase::Meaning => &[
                "Looking back, how did this experience change you?",
                "What do you think this chapter of your life taught you?",
            ],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Context => "context",
            Phase::People => "people",
            Phase::Feelings => "feelings",
            Phase::Coping => "coping",
            Phase::Meaning => "meaning",
        };
        f.write_str(name)
    }
}

/// Follow-up questions for emotions that have their own template set
fn emotion_templates(label: EmotionLabel) -> Option<&'static [&'static str]> {
    match label {
        EmotionLabel::Joy => Some(&[
            "What made this experience feel so joyful for you?",
            "If you had to pick one happiest moment from that time, what would it be?",
        ]),
        EmotionLabel::Nostalgia => Some(&[
            "What do you miss most about that time?",
            "If you could go back, what is one thing you would love to experience again?",
        ]),
        EmotionLabel::Sadness => Some(&[
            "What was the hardest part of this experience for you?",
            "Has the sadness around this memory changed over time?",
        ]),
        EmotionLabel::Fear => Some(&[
            "What did you find most frightening in that situation?",
            "Was there a particular moment when you felt especially anxious?",
        ]),
        EmotionLabel::Pride => Some(&[
            "What about this experience makes you feel most proud?",
            "If you told this story to a younger person, what would you want them to remember?",
        ]),
        EmotionLabel::Humor => Some(&[
            "Looking back, what do you find a bit funny about this story?",
            "If you told this to a friend, how would you tell it in a playful way?",
        ]),
        EmotionLabel::Resilience => Some(&[
            "What inner strength did you discover in yourself during this time?",
            "How do you think you managed to keep going through all of that?",
        ]),
        EmotionLabel::Anger
        | EmotionLabel::Disgust
        | EmotionLabel::Neutral
        | EmotionLabel::Surprise
        | EmotionLabel::Love
        | EmotionLabel::Optimism
        | EmotionLabel::Pessimism => None,
    }
}

fn category_templates(category: CategoryTag) -> &'static [&'static str] {
    match category {
        CategoryTag::Introduction => &[
            "Can you introduce yourself briefly?",
            "What would you like people to know about you first?",
        ],
        CategoryTag::EarlyLife => &[
            "Can you tell me about your childhood?",
            "What early memories stand out from your youth?",
        ],
        CategoryTag::Family => &[
            "Who were the important people in your family?",
            "How did your family shape who you are today?",
        ],
        CategoryTag::Education => &[
            "Can you tell me about your school experiences?",
            "Were there teachers or mentors who influenced you?",
        ],
        CategoryTag::Career => &[
            "What led you to your current profession?",
            "What have been key moments in your career journey?",
        ],
        CategoryTag::LoveAndRelationship => &[
            "Can you describe meaningful relationships in your life?",
            "How have your relationships shaped your personal growth?",
        ],
        CategoryTag::PassionsAndHobbies => &[
            "What activities bring you the most joy?",
            "How did your hobbies or interests develop over time?",
        ],
        CategoryTag::Challenges => &[
            "What were some significant obstacles you faced?",
            "How did you overcome difficult periods in your life?",
        ],
        CategoryTag::Reflections => &[
            "Looking back, what lessons have you learned?",
            "How have these experiences shaped your perspective today?",
        ],
    }
}

/// Per-session dialogue progress
///
/// Gates only ever flip from false to true.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DialogueState {
    asked: [bool; 5],
    turns: u32,
    history: Vec<String>,
    entities: Vec<Entity>,
}

impl DialogueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_asked(&self, phase: Phase) -> bool {
        self.asked[phase.index()]
    }

    /// First phase whose gate is still open
    pub fn next_phase(&self) -> Option<Phase> {
        Phase::ORDER.iter().copied().find(|p| !self.is_asked(*p))
    }

    pub fn all_phases_asked(&self) -> bool {
        self.next_phase().is_none()
    }

    fn mark_asked(&mut self, phase: Phase) {
        self.asked[phase.index()] = true;
    }

    /// Number of questions generated so far
    pub fn turns(&self) -> u32 {
        self.turns
    }

    /// Participant answers, oldest first
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn record_answer(&mut self, answer: impl Into<String>) {
        self.history.push(answer.into());
    }

    /// Distinct entities mentioned so far, first-seen order
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn note_entities(&mut self, entities: &[Entity]) {
        for entity in entities {
            if !self.entities.contains(entity) {
                self.entities.push(entity.clone());
            }
        }
    }
}

/// Picks one template out of a non-empty set
pub trait TemplateChooser: Send {
    /// Index in `0..count`; `count` is never zero
    fn choose(&mut self, count: usize) -> usize;
}

/// Uniform random choice
pub struct RandomChooser {
    rng: StdRng,
}

impl RandomChooser {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomChooser {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateChooser for RandomChooser {
    fn choose(&mut self, count: usize) -> usize {
        self.rng.gen_range(0..count)
    }
}

/// Always the first template
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstChooser;

impl TemplateChooser for FirstChooser {
    fn choose(&mut self, _count: usize) -> usize {
        0
    }
}

/// Which rule produced a question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSource {
    Category(CategoryTag),
    Phase(Phase),
    Emotion(EmotionLabel),
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub source: QuestionSource,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Emotion-aware question generator
pub struct QuestionGenerator {
    chooser: Box<dyn TemplateChooser>,
}

impl QuestionGenerator {
    pub fn new(chooser: Box<dyn TemplateChooser>) -> Self {
        Self { chooser }
    }

    /// Select the next question and advance `state`
    ///
    /// Never fails: an unknown emotion yields [`GENERIC_QUESTION`].
    pub fn next(
        &mut self,
        state: &mut DialogueState,
        dominant_emotion: &str,
        entities: &[Entity],
        category: Option<CategoryTag>,
    ) -> Question {
        state.turns += 1;
        state.note_entities(entities);

        let question = if let Some(category) = category {
            Question {
                text: self.pick(category_templates(category)),
                source: QuestionSource::Category(category),
            }
        } else if let Some(phase) = state.next_phase() {
            state.mark_asked(phase);
            Question {
                text: self.pick(phase.templates()),
                source: QuestionSource::Phase(phase),
            }
        } else {
            match EmotionLabel::parse(dominant_emotion).and_then(|l| emotion_templates(l).map(|t| (l, t))) {
                Some((label, templates)) => Question {
                    text: self.pick(templates),
                    source: QuestionSource::Emotion(label),
                },
                None => Question {
                    text: GENERIC_QUESTION.to_string(),
                    source: QuestionSource::Generic,
                },
            }
        };

        debug!(
            turn = state.turns,
            source = ?question.source,
            dominant_emotion = %dominant_emotion,
            entities = entities.len(),
            "Generated question"
        );

        question
    }

    fn pick(&mut self, templates: &'static [&'static str]) -> String {
        let index = self.chooser.choose(templates.len()).min(templates.len() - 1);
        templates[index].to_string()
    }
}

impl Default for QuestionGenerator {
    fn default() -> Self {
        Self::new(Box::new(RandomChooser::new()))
    }
}
