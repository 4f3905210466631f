//! Interview orchestrator
//!
//! Composition root for one interview session. Drives the turn loop:
//!
//! 1. Analyze the previous answer (neutral before the first one)
//! 2. Advance the dialogue state and present the question
//! 3. Collect the answer; the sentinel or an interrupt ends the loop
//! 4. Record the exchange and, on trigger answers, refresh the ambience
//!
//! and then the closing phase: stop ambience, re-analyze every answer,
//! aggregate, match tracks, write the memoir and optionally play the
//! overall track.

use crate::collaborators::{
    Analysis, Analyzer, AnswerSource, CollaboratorError, EnvironmentDetector, MemoirWriter, Reply,
    SeedKeywordDetector,
};
use crate::dialogue::{DialogueState, QuestionGenerator};
use crate::report::{AnswerReport, InterviewReport};
use crate::transcript::{parse_participant_lines, Transcript};
use melo_ap::{collect_ambience_urls, AmbiencePlayer, ClipPlayer, PreviewSearch};
use melo_common::config::{AmbienceConfig, TomlConfig};
use melo_common::events::{EventBus, MeloEvent};
use melo_common::{CategoryTag, EmotionDistribution};
use melo_pd::{AffectMapper, Catalog, MatchOutcome, Matcher, Track, TrackFilter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// True when `input` is the session-ending sentinel (case-insensitive)
pub fn is_sentinel(input: &str, sentinel: &str) -> bool {
    let sentinel = sentinel.trim();
    !sentinel.is_empty() && input.trim().eq_ignore_ascii_case(sentinel)
}

/// Whether the `answers`-th answer (1-based) should (re)select ambience
pub fn ambience_due(config: &AmbienceConfig, answers: usize) -> bool {
    if !config.enabled || answers == 0 {
        return false;
    }
    let trigger = config.trigger_answer.max(1);
    if answers == trigger {
        return true;
    }
    config.refresh_every > 0 && answers > trigger && (answers - trigger) % config.refresh_every == 0
}

pub struct InterviewOrchestrator {
    config: TomlConfig,
    category: Option<CategoryTag>,
    generator: QuestionGenerator,
    analyzer: Arc<dyn Analyzer>,
    detector: Arc<dyn EnvironmentDetector>,
    answers: Box<dyn AnswerSource>,
    search: Option<Arc<dyn PreviewSearch>>,
    ambience: Option<AmbiencePlayer>,
    final_player: Option<Arc<dyn ClipPlayer>>,
    memoir_writer: Option<Arc<dyn MemoirWriter>>,
    mapper: AffectMapper,
    matcher: Matcher,
    catalog: Catalog,
    event_bus: EventBus,
}

impl InterviewOrchestrator {
    /// Orchestrator with the required collaborators
    ///
    /// Defaults: random question choice, seed-keyword environment detection,
    /// default anchor table, metric from `config.matching`. Ambience, preview
    /// search, final playback and memoir writing are off until supplied.
    pub fn new(
        config: TomlConfig,
        catalog: Catalog,
        analyzer: Arc<dyn Analyzer>,
        answers: Box<dyn AnswerSource>,
        event_bus: EventBus,
    ) -> Self {
        let matcher = Matcher::new(config.matching.metric.into());
        Self {
            config,
            category: None,
            generator: QuestionGenerator::default(),
            analyzer,
            detector: Arc::new(SeedKeywordDetector::default()),
            answers,
            search: None,
            ambience: None,
            final_player: None,
            memoir_writer: None,
            mapper: AffectMapper::default(),
            matcher,
            catalog,
            event_bus,
        }
    }

    pub fn with_category(mut self, category: Option<CategoryTag>) -> Self {
        self.category = category;
        self
    }

    pub fn with_generator(mut self, generator: QuestionGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn EnvironmentDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn PreviewSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_ambience(mut self, ambience: AmbiencePlayer) -> Self {
        self.ambience = Some(ambience);
        self
    }

    /// Player for the closing track preview (used when `play_final_track` is set)
    pub fn with_final_player(mut self, player: Arc<dyn ClipPlayer>) -> Self {
        self.final_player = Some(player);
        self
    }

    pub fn with_memoir_writer(mut self, writer: Arc<dyn MemoirWriter>) -> Self {
        self.memoir_writer = Some(writer);
        self
    }

    pub fn with_mapper(mut self, mapper: AffectMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Run the interview to completion
    ///
    /// Collaborator failures never abort the session; the report always
    /// covers whatever was recorded.
    pub async fn run(mut self) -> InterviewReport {
        let mut state = DialogueState::new();
        let mut transcript = Transcript::new(self.config.interview.interviewer_name.clone());
        let mut pending: Option<String> = None;
        let mut failures: u32 = 0;
        let mut interrupted = false;
        let mut keywords: Vec<String> = Vec::new();
        let max_failures = self.config.interview.max_consecutive_failures.max(1);

        info!(category = ?self.category, catalog_tracks = self.catalog.len(), "Interview starting");

        loop {
            let question = match pending.take() {
                Some(question) => question,
                None => {
                    let analysis = match transcript.last_answer() {
                        Some(text) => self.analyze_or_neutral(text).await,
                        None => Analysis::neutral(),
                    };
                    let question =
                        self.generator
                            .next(&mut state, analysis.dominant(), &analysis.entities, self.category);
                    match self.category {
                        Some(category) => format!("[Category: {}] {}", category.label(), question.text),
                        None => question.text,
                    }
                }
            };

            self.event_bus.emit_lossy(MeloEvent::QuestionAsked {
                turn: state.turns(),
                question: question.clone(),
                timestamp: chrono::Utc::now(),
            });

            match self.answers.answer(&question).await {
                Ok(Reply::Interrupted) => {
                    info!(turn = state.turns(), "Interview interrupted");
                    interrupted = true;
                    break;
                }
                Ok(Reply::Text(text)) => {
                    failures = 0;
                    let text = text.trim();

                    if is_sentinel(text, &self.config.interview.sentinel) {
                        info!(turn = state.turns(), "Interview finished by participant");
                        break;
                    }
                    if text.is_empty() {
                        pending = Some(question);
                        continue;
                    }

                    transcript.push_exchange(&question, text);
                    state.record_answer(text);
                    self.event_bus.emit_lossy(MeloEvent::AnswerRecorded {
                        turn: state.turns(),
                        answer: text.to_string(),
                        timestamp: chrono::Utc::now(),
                    });

                    if ambience_due(&self.config.ambience, transcript.answer_count()) {
                        if let Some(found) = self.refresh_ambience(text).await {
                            keywords = found;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "Failed to collect answer");
                    if failures >= max_failures {
                        warn!(failures, "Too many consecutive answer failures; ending interview");
                        break;
                    }
                    pending = Some(question);
                }
            }
        }

        let turns = state.turns();
        self.finish(transcript, turns, interrupted, keywords).await
    }

    async fn analyze_or_neutral(&self, text: &str) -> Analysis {
        match self.analyzer.analyze(text).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "Analysis failed; using neutral distribution");
                Analysis::neutral()
            }
        }
    }

    /// Detect keywords for `text` and restart the ambience loop on them
    ///
    /// Returns the detected keywords, or `None` when detection failed or
    /// found nothing. The running loop is kept when no previews are found.
    async fn refresh_ambience(&self, text: &str) -> Option<Vec<String>> {
        let keywords = match self.detector.detect(text).await {
            Ok(keywords) if !keywords.is_empty() => keywords,
            Ok(_) => {
                debug!("No ambience keywords detected");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Environment detection failed");
                return None;
            }
        };

        info!(keywords = ?keywords, "Ambience keywords detected");

        let (Some(ambience), Some(search)) = (&self.ambience, &self.search) else {
            return Some(keywords);
        };

        let urls = collect_ambience_urls(&**search, &keywords, self.config.ambience.previews_per_keyword).await;
        if urls.is_empty() {
            info!(keywords = ?keywords, "No ambience previews found; keeping current ambience");
            return Some(keywords);
        }

        let url_count = urls.len();
        match ambience.start(urls).await {
            Ok(Some(session_id)) => {
                self.event_bus.emit_lossy(MeloEvent::AmbienceStarted {
                    session_id,
                    keywords: keywords.clone(),
                    url_count,
                    timestamp: chrono::Utc::now(),
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to start ambience"),
        }

        Some(keywords)
    }

    async fn stop_ambience(&self) {
        if let Some(ambience) = &self.ambience {
            if let Err(e) = ambience.stop().await {
                warn!(error = %e, "Failed to stop ambience");
            }
        }
    }

    fn filter_for(&self, dominant: &str) -> TrackFilter {
        if self.config.matching.filter_by_dominant {
            TrackFilter::emotion(dominant)
        } else {
            TrackFilter::Any
        }
    }

    fn announce(&self, outcome: &MatchOutcome, overall: bool) {
        if let MatchOutcome::Match { track, score } = outcome {
            self.event_bus.emit_lossy(MeloEvent::TrackSelected {
                track_id: track.id.clone(),
                title: track.title.clone(),
                artist: track.artist.clone(),
                score: *score,
                overall,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    async fn finish(
        self,
        transcript: Transcript,
        turns: u32,
        interrupted: bool,
        ambience_keywords: Vec<String>,
    ) -> InterviewReport {
        self.stop_ambience().await;

        let rendered = transcript.render();
        let mut answers: Vec<AnswerReport> = Vec::new();

        for text in parse_participant_lines(&rendered) {
            let analysis = self.analyze_or_neutral(&text).await;
            let dominant = analysis.dominant().to_string();
            let affect = self.mapper.to_affect(&analysis.distribution);
            let best = self.matcher.best_match(&affect, &self.catalog, &self.filter_for(&dominant));
            self.announce(&best, false);

            answers.push(AnswerReport {
                text,
                dominant,
                distribution: analysis.distribution,
                entities: analysis.entities,
                affect,
                best,
            });
        }

        let distributions: Vec<EmotionDistribution> = answers.iter().map(|a| a.distribution.clone()).collect();
        let overall = EmotionDistribution::mean(&distributions);

        let (overall_dominant, overall_match) = if answers.is_empty() {
            (None, MatchOutcome::NoMatch)
        } else {
            // Filtered selection only considers emotions some track is tagged with
            let tags = self.catalog.emotion_tags();
            let dominant = match overall.dominant_among(&tags) {
                Some(tag) if self.config.matching.filter_by_dominant => tag.to_string(),
                _ => overall.dominant().to_string(),
            };
            let filter = if tags.is_empty() {
                TrackFilter::Any
            } else {
                self.filter_for(&dominant)
            };
            let affect = self.mapper.to_affect(&overall);
            let outcome = self.matcher.best_match(&affect, &self.catalog, &filter);
            match outcome.track() {
                Some(track) => info!(dominant = %dominant, track = %track.title, "Overall track selected"),
                None => info!(dominant = %dominant, "No overall track match"),
            }
            self.announce(&outcome, true);
            (Some(dominant), outcome)
        };

        let memoir = match &self.memoir_writer {
            Some(writer) if !transcript.is_empty() => match writer.write_memoir(&rendered).await {
                Ok(memoir) => Some(memoir),
                Err(e) => {
                    warn!(error = %e, "Memoir generation failed");
                    None
                }
            },
            _ => None,
        };

        if self.config.matching.play_final_track {
            if let Some(track) = overall_match.track() {
                self.play_final_track(track).await;
            }
        }

        self.event_bus.emit_lossy(MeloEvent::InterviewFinished {
            turns,
            answers: answers.len(),
            interrupted,
            timestamp: chrono::Utc::now(),
        });

        InterviewReport {
            answers,
            overall,
            overall_dominant,
            overall_match,
            ambience_keywords,
            memoir,
            transcript: rendered,
            turns,
            interrupted,
        }
    }

    async fn play_final_track(&self, track: &Track) {
        let (Some(search), Some(player)) = (&self.search, &self.final_player) else {
            debug!("Final track playback not configured");
            return;
        };

        // Foreground playback never overlaps the ambience loop
        self.stop_ambience().await;

        let url = match search.track_preview(&track.title, &track.artist).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!(title = %track.title, artist = %track.artist, "No preview available for final track");
                return;
            }
            Err(e) => {
                warn!(error = %CollaboratorError::from(e), "Final track search failed");
                return;
            }
        };

        info!(title = %track.title, artist = %track.artist, "Playing final track preview");
        let cancel = CancellationToken::new();
        tokio::select! {
            result = player.play(&url, &cancel) => {
                if let Err(e) = result {
                    warn!(error = %e, url = %url, "Final track playback failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                info!("Final track playback interrupted");
            }
        }
    }
}
