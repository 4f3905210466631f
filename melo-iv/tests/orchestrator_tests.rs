//! End-to-end interview sessions against scripted collaborators

use async_trait::async_trait;
use melo_ap::{AmbiencePlayer, AmbienceSettings, ClipError, ClipPlayer, PreviewSearch, SearchError};
use melo_common::config::TomlConfig;
use melo_common::events::{EventBus, MeloEvent};
use melo_common::{CategoryTag, EmotionDistribution};
use melo_iv::collaborators::{Analysis, Analyzer, AnswerSource, CollaboratorError, MemoirWriter, Reply};
use melo_iv::dialogue::{FirstChooser, QuestionGenerator, GENERIC_QUESTION};
use melo_iv::InterviewOrchestrator;
use melo_pd::{Catalog, MatchOutcome};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fakes
// ============================================================================

/// Replays a fixed list of replies, then reports an interrupt
struct ScriptedAnswers {
    replies: VecDeque<Result<Reply, CollaboratorError>>,
    asked: Arc<Mutex<Vec<String>>>,
    think_time: Duration,
}

impl ScriptedAnswers {
    fn new(replies: Vec<Result<Reply, CollaboratorError>>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let asked = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                replies: replies.into(),
                asked: asked.clone(),
                think_time: Duration::ZERO,
            },
            asked,
        )
    }

    fn thinking(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }
}

#[async_trait]
impl AnswerSource for ScriptedAnswers {
    async fn answer(&mut self, question: &str) -> Result<Reply, CollaboratorError> {
        self.asked.lock().unwrap().push(question.to_string());
        if !self.think_time.is_zero() {
            tokio::time::sleep(self.think_time).await;
        }
        self.replies.pop_front().unwrap_or(Ok(Reply::Interrupted))
    }
}

fn text(s: &str) -> Result<Reply, CollaboratorError> {
    Ok(Reply::Text(s.to_string()))
}

fn mic_failure() -> Result<Reply, CollaboratorError> {
    Err(CollaboratorError::failed("speech recognition", "could not understand audio"))
}

/// Keyword-driven analyzer: "happy" → joy, "miss" → nostalgia, "FAIL" → error
struct KeywordAnalyzer;

#[async_trait]
impl Analyzer for KeywordAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis, CollaboratorError> {
        if text.contains("FAIL") {
            return Err(CollaboratorError::unavailable("analyzer", "connection refused"));
        }
        let distribution = if text.contains("happy") {
            EmotionDistribution::from_pairs([("joy", 0.9), ("neutral", 0.1)])
        } else if text.contains("miss") {
            EmotionDistribution::from_pairs([("nostalgia", 0.8), ("neutral", 0.2)])
        } else {
            EmotionDistribution::neutral()
        };
        Ok(Analysis {
            distribution,
            entities: Vec::new(),
        })
    }
}

struct FakeSearch;

#[async_trait]
impl PreviewSearch for FakeSearch {
    async fn ambience_previews(&self, keyword: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        Ok((0..limit.min(2)).map(|i| format!("amb://{}/{}", keyword, i)).collect())
    }

    async fn track_preview(&self, title: &str, _artist: &str) -> Result<Option<String>, SearchError> {
        Ok(Some(format!("track://{}", title)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Mark {
    Begin(String),
    End(String),
}

struct RecordingPlayer {
    log: Mutex<Vec<Mark>>,
}

#[async_trait]
impl ClipPlayer for RecordingPlayer {
    async fn play(&self, url: &str, cancel: &CancellationToken) -> Result<(), ClipError> {
        self.log.lock().unwrap().push(Mark::Begin(url.to_string()));
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(700)) => {}
        }
        self.log.lock().unwrap().push(Mark::End(url.to_string()));
        Ok(())
    }
}

struct FakeMemoir {
    received: Mutex<Option<String>>,
}

#[async_trait]
impl MemoirWriter for FakeMemoir {
    async fn write_memoir(&self, transcript: &str) -> Result<String, CollaboratorError> {
        *self.received.lock().unwrap() = Some(transcript.to_string());
        Ok(format!("A memoir of {} lines.", transcript.lines().count()))
    }
}

fn orchestrator(config: TomlConfig, answers: ScriptedAnswers, bus: EventBus) -> InterviewOrchestrator {
    InterviewOrchestrator::new(config, Catalog::builtin(), Arc::new(KeywordAnalyzer), Box::new(answers), bus)
        .with_generator(QuestionGenerator::new(Box::new(FirstChooser)))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<MeloEvent>) -> Vec<MeloEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Tests
// ============================================================================

/// **Given:** two answers with distinct emotions followed by the sentinel
/// **When:** the interview runs
/// **Then:** each answer gets its own emotion-filtered track and the mean picks the overall track
#[tokio::test]
async fn test_sentinel_ends_session_and_report_aggregates() {
    let (answers, asked) = ScriptedAnswers::new(vec![
        text("I was so happy that summer"),
        text("I miss those days"),
        text("  done "),
    ]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default()).run().await;

    let asked = asked.lock().unwrap().clone();
    assert_eq!(asked[0], "Could you tell me a bit more about that experience?");
    assert_eq!(asked[1], "Who were the important people in this memory?");
    assert_eq!(asked.len(), 3);

    assert_eq!(report.turns, 3);
    assert!(!report.interrupted);
    assert_eq!(report.answers.len(), 2);

    assert_eq!(report.answers[0].dominant, "joy");
    assert_eq!(report.answers[0].best.track().unwrap().id, "here-comes-the-sun");
    assert_eq!(report.answers[1].dominant, "nostalgia");
    assert_eq!(report.answers[1].best.track().unwrap().id, "yesterday");

    assert!((report.overall.score("joy") - 0.45).abs() < 1e-9);
    assert!((report.overall.score("nostalgia") - 0.4).abs() < 1e-9);
    assert_eq!(report.overall_dominant.as_deref(), Some("joy"));
    assert_eq!(report.overall_match.track().unwrap().id, "here-comes-the-sun");

    assert!(report.transcript.starts_with("Melo: Could you tell me"));
    assert!(report.transcript.contains("Participant: I miss those days"));
    assert!(!report.transcript.contains("done"));
}

#[tokio::test]
async fn test_failed_answer_reasks_same_question() {
    let (answers, asked) = ScriptedAnswers::new(vec![mic_failure(), text("I was happy"), text("DONE")]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default()).run().await;

    let asked = asked.lock().unwrap().clone();
    assert_eq!(asked.len(), 3);
    assert_eq!(asked[0], asked[1]);
    assert_eq!(asked[2], "Who were the important people in this memory?");
    assert_eq!(report.turns, 2);
    assert_eq!(report.answers.len(), 1);
}

#[tokio::test]
async fn test_consecutive_failures_end_session() {
    let mut config = TomlConfig::default();
    config.interview.max_consecutive_failures = 3;
    let (answers, asked) = ScriptedAnswers::new(vec![
        text("I was happy"),
        mic_failure(),
        mic_failure(),
        mic_failure(),
        text("never reached"),
    ]);

    let report = orchestrator(config, answers, EventBus::default()).run().await;

    assert_eq!(asked.lock().unwrap().len(), 4);
    assert_eq!(report.answers.len(), 1);
    assert!(!report.interrupted);
}

#[tokio::test]
async fn test_interrupt_keeps_partial_transcript() {
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let (answers, _) = ScriptedAnswers::new(vec![text("I was happy")]);

    let report = orchestrator(TomlConfig::default(), answers, bus).run().await;

    assert!(report.interrupted);
    assert_eq!(report.answers.len(), 1);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        MeloEvent::InterviewFinished { answers: 1, interrupted: true, .. }
    )));
}

#[tokio::test]
async fn test_category_prefixes_every_question() {
    let (answers, asked) = ScriptedAnswers::new(vec![text("We were five siblings"), text("DONE")]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default())
        .with_category(Some(CategoryTag::Family))
        .run()
        .await;

    let asked = asked.lock().unwrap().clone();
    assert!(asked.iter().all(|q| q.starts_with("[Category: 3. Family] ")));
    assert!(report
        .transcript
        .starts_with("Melo: [Category: 3. Family] Who were the important people in your family?"));
}

#[tokio::test]
async fn test_emotion_mode_after_all_phases() {
    let mut replies: Vec<_> = (0..5).map(|_| text("I miss it")).collect();
    replies.push(text("nothing in particular"));
    replies.push(text("DONE"));
    let (answers, asked) = ScriptedAnswers::new(replies);

    orchestrator(TomlConfig::default(), answers, EventBus::default()).run().await;

    let asked = asked.lock().unwrap().clone();
    assert_eq!(asked[5], "What do you miss most about that time?");
    assert_eq!(asked[6], GENERIC_QUESTION);
}

#[tokio::test]
async fn test_analyzer_failure_degrades_to_neutral() {
    let (answers, _) = ScriptedAnswers::new(vec![text("FAIL to classify"), text("DONE")]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default()).run().await;

    assert_eq!(report.answers[0].dominant, "neutral");
    assert_eq!(report.answers[0].best, MatchOutcome::NoMatch);

    // All catalog emotions score zero; the first tag wins
    assert_eq!(report.overall_dominant.as_deref(), Some("joy"));
    assert_eq!(report.overall_match.track().unwrap().id, "here-comes-the-sun");
}

/// **Given:** mostly neutral answers with one nostalgic one
/// **When:** the interview ends
/// **Then:** the overall pick uses the strongest emotion the catalog can serve, not neutral
#[tokio::test]
async fn test_overall_dominant_ignores_untagged_emotions() {
    let (answers, _) = ScriptedAnswers::new(vec![
        text("We lived on a quiet street"),
        text("My father drove a bus"),
        text("I miss the old bakery"),
        text("DONE"),
    ]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default()).run().await;

    assert_eq!(report.overall.dominant(), "neutral");
    assert_eq!(report.overall_dominant.as_deref(), Some("nostalgia"));
    assert_eq!(report.overall_match.track().unwrap().id, "yesterday");
}

#[tokio::test]
async fn test_unfiltered_matching_when_disabled() {
    let mut config = TomlConfig::default();
    config.matching.filter_by_dominant = false;
    let (answers, _) = ScriptedAnswers::new(vec![text("FAIL again"), text("DONE")]);

    let report = orchestrator(config, answers, EventBus::default()).run().await;

    assert!(report.answers[0].best.is_match());
}

#[tokio::test]
async fn test_memoir_writer_receives_transcript() {
    let writer = Arc::new(FakeMemoir {
        received: Mutex::new(None),
    });
    let (answers, _) = ScriptedAnswers::new(vec![text("I was happy"), text("I miss it"), text("DONE")]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default())
        .with_memoir_writer(writer.clone())
        .run()
        .await;

    let received = writer.received.lock().unwrap().clone().unwrap();
    assert_eq!(received, report.transcript);
    assert_eq!(report.memoir.as_deref(), Some("A memoir of 4 lines."));
}

#[tokio::test]
async fn test_no_answers_no_memoir_no_overall() {
    let writer = Arc::new(FakeMemoir {
        received: Mutex::new(None),
    });
    let (answers, _) = ScriptedAnswers::new(vec![text("DONE")]);

    let report = orchestrator(TomlConfig::default(), answers, EventBus::default())
        .with_memoir_writer(writer.clone())
        .run()
        .await;

    assert!(report.answers.is_empty());
    assert_eq!(report.overall_dominant, None);
    assert_eq!(report.memoir, None);
    assert!(writer.received.lock().unwrap().is_none());
}

/// **Given:** ambience triggered by the second answer and final-track playback enabled
/// **When:** the participant finishes
/// **Then:** every ambience clip has ended before the final track begins
#[tokio::test(start_paused = true)]
async fn test_ambience_lifecycle_and_final_track() {
    let mut config = TomlConfig::default();
    config.matching.play_final_track = true;
    config.ambience.trigger_answer = 2;

    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let player = Arc::new(RecordingPlayer {
        log: Mutex::new(Vec::new()),
    });
    let ambience = AmbiencePlayer::spawn(player.clone(), AmbienceSettings::from(&config.ambience), bus.clone());

    let (answers, _) = ScriptedAnswers::new(vec![
        text("I was happy as a child"),
        text("The rain on the river made me happy"),
        text("I was happy again"),
        text("DONE"),
    ]);
    let answers = answers.thinking(Duration::from_secs(2));

    let report = orchestrator(config, answers, bus)
        .with_search(Arc::new(FakeSearch))
        .with_ambience(ambience.clone())
        .with_final_player(player.clone())
        .run()
        .await;

    assert_eq!(report.ambience_keywords, vec!["rain", "river"]);
    assert_eq!(ambience.live_sessions(), 0);

    let log = player.log.lock().unwrap().clone();
    let final_begin = log
        .iter()
        .position(|m| *m == Mark::Begin("track://Here Comes the Sun".to_string()))
        .expect("final track should play");
    let before = &log[..final_begin];
    assert!(before.iter().any(|m| matches!(m, Mark::Begin(u) if u.starts_with("amb://"))));
    let begins = before.iter().filter(|m| matches!(m, Mark::Begin(_))).count();
    let ends = before.iter().filter(|m| matches!(m, Mark::End(_))).count();
    assert_eq!(begins, ends);
    assert!(log[final_begin..]
        .iter()
        .all(|m| !matches!(m, Mark::Begin(u) if u.starts_with("amb://"))));

    let events = drain(&mut events);
    let started = events
        .iter()
        .find_map(|e| match e {
            MeloEvent::AmbienceStarted { keywords, url_count, .. } => Some((keywords.clone(), *url_count)),
            _ => None,
        })
        .expect("ambience should start");
    assert_eq!(started, (vec!["rain".to_string(), "river".to_string()], 4));
    assert!(events.iter().any(|e| matches!(e, MeloEvent::AmbienceStopped { .. })));
    assert!(events.iter().any(|e| matches!(e, MeloEvent::TrackSelected { overall: true, .. })));

    ambience.shutdown().await.unwrap();
}
