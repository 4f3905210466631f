//! External collaborators consumed by the interview loop
//!
//! Each subsystem the engine relies on but does not own sits behind a trait:
//! - [`Analyzer`]: emotion classification + named-entity recognition
//! - [`EnvironmentDetector`]: ambient-sound keywords for an utterance
//! - [`AnswerSource`]: the participant's reply (typed or transcribed)
//! - [`Transcriber`]: recorded speech → text
//! - [`MemoirWriter`]: transcript → memoir prose
//!
//! Concrete HTTP clients carry bounded timeouts; any transport problem
//! surfaces as [`CollaboratorError::Unavailable`].

use async_trait::async_trait;
use melo_ap::{AudioError, PhraseRecorder, SearchError};
use melo_common::{EmotionDistribution, Entity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{debug, info};

const USER_AGENT: &str = "Melo/0.1.0";

/// Collaborator failure
///
/// Never fatal: the orchestrator re-asks, degrades to a neutral analysis,
/// or skips the optional step.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Service could not be reached (network, timeout, not configured)
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    /// Service answered but the result is unusable
    #[error("{service} failed: {reason}")]
    Failed { service: &'static str, reason: String },
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, reason: impl Into<String>) -> Self {
        CollaboratorError::Unavailable {
            service,
            reason: reason.into(),
        }
    }

    pub fn failed(service: &'static str, reason: impl Into<String>) -> Self {
        CollaboratorError::Failed {
            service,
            reason: reason.into(),
        }
    }
}

impl From<SearchError> for CollaboratorError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::NetworkError(reason) => CollaboratorError::unavailable("preview search", reason),
            other => CollaboratorError::failed("preview search", other.to_string()),
        }
    }
}

impl From<AudioError> for CollaboratorError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::NoSpeech(_) | AudioError::Encode(_) => {
                CollaboratorError::failed("speech recognition", e.to_string())
            }
            other => CollaboratorError::unavailable("microphone", other.to_string()),
        }
    }
}

fn http_client(service: &'static str, timeout: Duration) -> Result<reqwest::Client, CollaboratorError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| CollaboratorError::unavailable(service, e.to_string()))
}

// ============================================================================
// Analysis
// ============================================================================

/// Emotion + entity analysis of one utterance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(rename = "emotions", default)]
    pub distribution: EmotionDistribution,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Analysis {
    /// Analysis used before any answer exists and when the analyzer fails
    pub fn neutral() -> Self {
        Self {
            distribution: EmotionDistribution::neutral(),
            entities: Vec::new(),
        }
    }

    pub fn dominant(&self) -> &str {
        self.distribution.dominant()
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Analysis, CollaboratorError>;
}

/// Analyzer used when no analysis service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NeutralAnalyzer;

#[async_trait]
impl Analyzer for NeutralAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<Analysis, CollaboratorError> {
        Ok(Analysis::neutral())
    }
}

/// Remote analysis service client
///
/// Request: `POST <url>` with `{"text": "..."}`.
/// Response: `{"emotions": {"joy": 0.9, ...}, "entities": [{"text": "Seoul", "label": "LOC"}]}`.
pub struct HttpAnalyzer {
    http_client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

impl HttpAnalyzer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            http_client: http_client("analyzer", timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis, CollaboratorError> {
        debug!(url = %self.url, chars = text.len(), "Requesting analysis");

        let response = self
            .http_client
            .post(&self.url)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| CollaboratorError::unavailable("analyzer", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::failed("analyzer", format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CollaboratorError::unavailable("analyzer", e.to_string()))?;

        parse_analysis(&body)
    }
}

/// Lenient response decoding: missing sections become empty, unknown ones are ignored
///
/// Decoded straight from the body so the classifier's label order survives.
fn parse_analysis(body: &[u8]) -> Result<Analysis, CollaboratorError> {
    serde_json::from_slice(body).map_err(|e| CollaboratorError::failed("analyzer", e.to_string()))
}

// ============================================================================
// Environment detection
// ============================================================================

#[async_trait]
pub trait EnvironmentDetector: Send + Sync {
    /// Normalized ambient-sound keywords for `text`
    async fn detect(&self, text: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// First word of each keyword, lower-cased, de-duplicated in first-seen order
pub fn normalize_keywords<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut keywords: Vec<String> = Vec::new();
    for item in raw {
        let Some(word) = item.as_ref().split_whitespace().next() else {
            continue;
        };
        let word = word.to_lowercase();
        if !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

pub const DEFAULT_SEEDS: [&str; 12] = [
    "rain", "forest", "ocean", "birds", "wind", "fire", "crowd", "traffic", "water", "night", "cafe", "river",
];

/// Vocabulary matcher over a fixed seed list
///
/// A word matches a seed when it starts with the seed ("raining") or is its
/// singular ("bird" for "birds").
#[derive(Debug, Clone)]
pub struct SeedKeywordDetector {
    seeds: Vec<String>,
}

impl SeedKeywordDetector {
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            seeds: normalize_keywords(seeds),
        }
    }

    /// Matching seeds in order of first mention
    pub fn keywords(&self, text: &str) -> Vec<String> {
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase);

        let mut found: Vec<&str> = Vec::new();
        for word in words {
            for seed in &self.seeds {
                let singular = seed.strip_suffix('s').is_some_and(|s| s == word);
                if (word.starts_with(seed.as_str()) || singular) && !found.contains(&seed.as_str()) {
                    found.push(seed);
                }
            }
        }
        normalize_keywords(found)
    }
}

impl Default for SeedKeywordDetector {
    fn default() -> Self {
        Self::with_seeds(DEFAULT_SEEDS)
    }
}

#[async_trait]
impl EnvironmentDetector for SeedKeywordDetector {
    async fn detect(&self, text: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.keywords(text))
    }
}

// ============================================================================
// Answers
// ============================================================================

/// Outcome of asking one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Participant left (end of input or interrupt)
    Interrupted,
}

#[async_trait]
pub trait AnswerSource: Send {
    /// Present `question` and wait for the participant's reply
    async fn answer(&mut self, question: &str) -> Result<Reply, CollaboratorError>;
}

/// Line-oriented console dialogue
///
/// With speech attached, every question first asks whether the participant
/// wants to type or speak the answer.
pub struct ConsoleAnswerSource<R, W> {
    lines: Lines<R>,
    out: W,
    interviewer: String,
    speech: Option<SpeechAnswerSource>,
}

impl<R, W> ConsoleAnswerSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, out: W, interviewer: impl Into<String>) -> Self {
        Self {
            lines: input.lines(),
            out,
            interviewer: interviewer.into(),
            speech: None,
        }
    }

    /// Offer spoken answers alongside typed ones
    pub fn with_speech(mut self, speech: SpeechAnswerSource) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

async fn emit<W>(out: &mut W, text: &str) -> Result<(), CollaboratorError>
where
    W: AsyncWrite + Unpin + Send,
{
    out.write_all(text.as_bytes())
        .await
        .map_err(|e| CollaboratorError::unavailable("console", e.to_string()))?;
    out.flush()
        .await
        .map_err(|e| CollaboratorError::unavailable("console", e.to_string()))
}

/// Next trimmed line; `None` at end of input or on interrupt
async fn read_reply<R>(lines: &mut Lines<R>) -> Result<Option<String>, CollaboratorError>
where
    R: AsyncBufRead + Unpin + Send,
{
    tokio::select! {
        line = lines.next_line() => match line {
            Ok(Some(line)) => Ok(Some(line.trim().to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(CollaboratorError::failed("console", e.to_string())),
        },
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

#[async_trait]
impl<R, W> AnswerSource for ConsoleAnswerSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn answer(&mut self, question: &str) -> Result<Reply, CollaboratorError> {
        emit(&mut self.out, &format!("\n{}: {}\n", self.interviewer, question)).await?;

        if let Some(speech) = &self.speech {
            emit(&mut self.out, "Respond via (t)ext or (s)peech? [t/s]: ").await?;
            let Some(mode) = read_reply(&mut self.lines).await? else {
                return Ok(Reply::Interrupted);
            };

            if mode.eq_ignore_ascii_case("s") {
                emit(&mut self.out, "Listening... Please speak now.\n").await?;
                let heard = tokio::select! {
                    heard = speech.listen() => heard,
                    _ = tokio::signal::ctrl_c() => return Ok(Reply::Interrupted),
                };
                return match heard {
                    Ok(text) => {
                        emit(&mut self.out, &format!("Participant: {}\n", text)).await?;
                        Ok(Reply::Text(text))
                    }
                    Err(e) => {
                        emit(&mut self.out, "Sorry, could not understand audio.\n").await?;
                        Err(e)
                    }
                };
            }
        }

        emit(&mut self.out, "Participant: ").await?;
        match read_reply(&mut self.lines).await? {
            Some(line) => Ok(Reply::Text(line)),
            None => Ok(Reply::Interrupted),
        }
    }
}

// ============================================================================
// Speech
// ============================================================================

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Text spoken in a WAV clip
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, CollaboratorError>;
}

/// Remote speech-to-text client
///
/// Request: `POST <url>` as multipart form data with the clip in a `file`
/// part (`audio/wav`). Response: `{"text": "..."}`.
pub struct HttpTranscriber {
    http_client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl HttpTranscriber {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            http_client: http_client("transcriber", timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, CollaboratorError> {
        debug!(url = %self.url, bytes = wav.len(), "Requesting transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("answer.wav")
            .mime_str("audio/wav")
            .map_err(|e| CollaboratorError::failed("transcriber", e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http_client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CollaboratorError::unavailable("transcriber", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::failed("transcriber", format!("HTTP {}", status.as_u16())));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::failed("transcriber", e.to_string()))?;

        Ok(body.text)
    }
}

/// Spoken answers: one microphone phrase, transcribed
pub struct SpeechAnswerSource {
    recorder: Arc<dyn PhraseRecorder>,
    transcriber: Arc<dyn Transcriber>,
}

impl SpeechAnswerSource {
    pub fn new(recorder: Arc<dyn PhraseRecorder>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self { recorder, transcriber }
    }

    /// Record one phrase and return its transcription
    ///
    /// Silence, an empty transcription, or a device problem is an error; the
    /// caller decides whether to re-ask.
    pub async fn listen(&self) -> Result<String, CollaboratorError> {
        let recorder = Arc::clone(&self.recorder);
        let recording = tokio::task::spawn_blocking(move || recorder.record_phrase())
            .await
            .map_err(|e| CollaboratorError::unavailable("microphone", e.to_string()))??;

        let wav = recording.to_wav()?;
        let text = self.transcriber.transcribe(wav).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CollaboratorError::failed("speech recognition", "could not understand audio"));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl AnswerSource for SpeechAnswerSource {
    async fn answer(&mut self, question: &str) -> Result<Reply, CollaboratorError> {
        info!(question = %question, "Listening for spoken answer");
        tokio::select! {
            text = self.listen() => Ok(Reply::Text(text?)),
            _ = tokio::signal::ctrl_c() => Ok(Reply::Interrupted),
        }
    }
}

// ============================================================================
// Memoir
// ============================================================================

#[async_trait]
pub trait MemoirWriter: Send + Sync {
    async fn write_memoir(&self, transcript: &str) -> Result<String, CollaboratorError>;
}

/// Remote memoir generation client
///
/// Request: `POST <url>` with `{"transcript": "..."}`; response `{"memoir": "..."}`.
pub struct HttpMemoirWriter {
    http_client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct MemoirRequest<'a> {
    transcript: &'a str,
}

#[derive(Deserialize)]
struct MemoirResponse {
    memoir: String,
}

impl HttpMemoirWriter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            http_client: http_client("memoir writer", timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MemoirWriter for HttpMemoirWriter {
    async fn write_memoir(&self, transcript: &str) -> Result<String, CollaboratorError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&MemoirRequest { transcript })
            .send()
            .await
            .map_err(|e| CollaboratorError::unavailable("memoir writer", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::failed("memoir writer", format!("HTTP {}", status.as_u16())));
        }

        let body: MemoirResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::failed("memoir writer", e.to_string()))?;

        Ok(body.memoir.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keywords() {
        let keywords = normalize_keywords(["Rain drops", "rain", "  Forest ", "", "Ocean waves", "forest"]);
        assert_eq!(keywords, vec!["rain", "forest", "ocean"]);
    }

    #[test]
    fn test_seed_detector_matches_in_mention_order() {
        let detector = SeedKeywordDetector::default();
        let keywords = detector.keywords("We sat by the River at night, listening to a bird while it was raining.");
        assert_eq!(keywords, vec!["river", "night", "birds", "rain"]);
    }

    #[test]
    fn test_seed_detector_no_match() {
        assert!(SeedKeywordDetector::default().keywords("I studied mathematics.").is_empty());
    }

    #[test]
    fn test_parse_analysis_response() {
        let body = br#"{"emotions": {"Joy": 0.8, "sadness": 0.1},
                        "entities": [{"text": "Busan", "label": "LOC"}],
                        "model": "v2"}"#;

        let analysis = parse_analysis(body).unwrap();
        assert_eq!(analysis.dominant(), "joy");
        assert_eq!(analysis.entities, vec![Entity::new("Busan", "LOC")]);
    }

    #[test]
    fn test_parse_analysis_missing_sections() {
        let analysis = parse_analysis(b"{}").unwrap();
        assert!(analysis.distribution.is_empty());
        assert_eq!(analysis.dominant(), "neutral");
    }

    #[test]
    fn test_parse_analysis_rejects_bad_scores() {
        let body = br#"{"emotions": {"joy": "high"}}"#;
        assert!(matches!(parse_analysis(body), Err(CollaboratorError::Failed { .. })));
    }

    #[test]
    fn test_parse_analysis_keeps_classifier_order_on_ties() {
        let body = br#"{"emotions": {"nostalgia": 0.45, "joy": 0.45, "neutral": 0.1}}"#;
        let analysis = parse_analysis(body).unwrap();
        assert_eq!(analysis.dominant(), "nostalgia");
    }

    #[tokio::test]
    async fn test_neutral_analyzer() {
        let analysis = NeutralAnalyzer.analyze("anything").await.unwrap();
        assert_eq!(analysis, Analysis::neutral());
    }

    #[tokio::test]
    async fn test_console_source_reads_lines() {
        let input: &[u8] = b"  I grew up by the sea  \nDONE\n";
        let mut source = ConsoleAnswerSource::new(input, Vec::new(), "Melo");

        assert_eq!(
            source.answer("Where did you grow up?").await.unwrap(),
            Reply::Text("I grew up by the sea".to_string())
        );
        assert_eq!(source.answer("And then?").await.unwrap(), Reply::Text("DONE".to_string()));
        assert_eq!(source.answer("Still there?").await.unwrap(), Reply::Interrupted);

        let printed = String::from_utf8(source.into_output()).unwrap();
        assert!(printed.contains("Melo: Where did you grow up?"));
        assert!(printed.contains("Participant: "));
    }

    struct FixedRecorder {
        result: fn() -> Result<melo_ap::Recording, AudioError>,
    }

    impl PhraseRecorder for FixedRecorder {
        fn record_phrase(&self) -> Result<melo_ap::Recording, AudioError> {
            (self.result)()
        }
    }

    fn half_second() -> Result<melo_ap::Recording, AudioError> {
        Ok(melo_ap::Recording {
            samples: vec![0.2; 8000],
            sample_rate: 16000,
        })
    }

    #[derive(Default)]
    struct ScriptedTranscriber {
        text: String,
        uploads: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedTranscriber {
        fn saying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                text: text.to_string(),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(&self, wav: Vec<u8>) -> Result<String, CollaboratorError> {
            self.uploads.lock().unwrap().push(wav);
            Ok(self.text.clone())
        }
    }

    fn speech(
        result: fn() -> Result<melo_ap::Recording, AudioError>,
        transcriber: Arc<ScriptedTranscriber>,
    ) -> SpeechAnswerSource {
        SpeechAnswerSource::new(Arc::new(FixedRecorder { result }), transcriber)
    }

    #[tokio::test]
    async fn test_console_offers_text_or_speech() {
        let transcriber = ScriptedTranscriber::saying("  I remember the sea at Busan ");
        let input: &[u8] = b"s\nT\nMy grandmother raised me\n";
        let mut source = ConsoleAnswerSource::new(input, Vec::new(), "Melo")
            .with_speech(speech(half_second, transcriber.clone()));

        assert_eq!(
            source.answer("Where did you grow up?").await.unwrap(),
            Reply::Text("I remember the sea at Busan".to_string())
        );
        assert_eq!(
            source.answer("Who raised you?").await.unwrap(),
            Reply::Text("My grandmother raised me".to_string())
        );
        assert_eq!(source.answer("Still there?").await.unwrap(), Reply::Interrupted);

        // The recording is uploaded as WAV
        let uploads = transcriber.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(&uploads[0][0..4], b"RIFF");

        let printed = String::from_utf8(source.into_output()).unwrap();
        assert_eq!(printed.matches("Respond via (t)ext or (s)peech? [t/s]: ").count(), 3);
        assert!(printed.contains("Listening... Please speak now."));
        assert!(printed.contains("Participant: I remember the sea at Busan\n"));
    }

    #[tokio::test]
    async fn test_console_reports_unintelligible_speech() {
        let input: &[u8] = b"s\n";
        let mut source = ConsoleAnswerSource::new(input, Vec::new(), "Melo")
            .with_speech(speech(half_second, ScriptedTranscriber::saying("   ")));

        let result = source.answer("What do you remember?").await;
        assert!(matches!(
            result,
            Err(CollaboratorError::Failed { service: "speech recognition", .. })
        ));

        let printed = String::from_utf8(source.into_output()).unwrap();
        assert!(printed.contains("Sorry, could not understand audio."));
    }

    #[tokio::test]
    async fn test_console_without_speech_skips_choice() {
        let input: &[u8] = b"s\n";
        let mut source = ConsoleAnswerSource::new(input, Vec::new(), "Melo");

        // Without a microphone "s" is just a typed answer
        assert_eq!(source.answer("Q?").await.unwrap(), Reply::Text("s".to_string()));
        let printed = String::from_utf8(source.into_output()).unwrap();
        assert!(!printed.contains("(s)peech"));
    }

    #[tokio::test]
    async fn test_speech_source_silence_is_failure() {
        let transcriber = ScriptedTranscriber::saying("never used");
        let mut source = speech(|| Err(AudioError::NoSpeech(10_000)), transcriber.clone());

        let result = source.answer("Tell me more").await;
        assert!(matches!(
            result,
            Err(CollaboratorError::Failed { service: "speech recognition", .. })
        ));
        assert!(transcriber.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_audio_error_mapping() {
        assert!(matches!(
            CollaboratorError::from(AudioError::Device("no microphone".into())),
            CollaboratorError::Unavailable { service: "microphone", .. }
        ));
        assert!(matches!(
            CollaboratorError::from(AudioError::NoSpeech(500)),
            CollaboratorError::Failed { .. }
        ));
    }

    #[test]
    fn test_search_error_mapping() {
        assert!(matches!(
            CollaboratorError::from(SearchError::NetworkError("timeout".into())),
            CollaboratorError::Unavailable { .. }
        ));
        assert!(matches!(
            CollaboratorError::from(SearchError::ApiError(500, "boom".into())),
            CollaboratorError::Failed { .. }
        ));
    }
}
