//! Interviewer (melo-iv) - Main entry point
//!
//! Console memoir interview: asks questions, reads typed or spoken answers,
//! loops an ambience soundscape in the background and prints a summary with
//! the recommended music when the participant types the sentinel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use melo_ap::{
    list_input_devices, list_output_devices, AmbiencePlayer, AmbienceSettings, CpalSink, DeezerClient,
    HttpClipPlayer, MicRecorder, NullSink, OutputSettings, PcmSink, PreviewSearch,
};
use melo_common::config::{MetricName, TomlConfig};
use melo_common::events::EventBus;
use melo_common::CategoryTag;
use melo_iv::collaborators::{
    Analyzer, ConsoleAnswerSource, HttpAnalyzer, HttpMemoirWriter, HttpTranscriber, NeutralAnalyzer,
    SpeechAnswerSource,
};
use melo_iv::dialogue::{QuestionGenerator, RandomChooser};
use melo_iv::InterviewOrchestrator;
use melo_pd::Catalog;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    Cosine,
    Euclidean,
}

impl From<MetricArg> for MetricName {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Cosine => MetricName::Cosine,
            MetricArg::Euclidean => MetricName::Euclidean,
        }
    }
}

/// Command-line arguments for melo-iv
#[derive(Parser, Debug)]
#[command(name = "melo-iv")]
#[command(about = "Emotion-aware memoir interview")]
#[command(version)]
struct Args {
    /// Configuration file (overrides MELO_CONFIG and the per-user file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interview topic: number (1-9) or part of its name; prompted when absent
    #[arg(long)]
    category: Option<String>,

    /// Skip the topic prompt and follow the phase sequence
    #[arg(long, conflicts_with = "category")]
    no_category: bool,

    /// JSON track catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Emotion/NER analysis endpoint
    #[arg(long, env = "MELO_ANALYSIS_URL")]
    analysis_url: Option<String>,

    /// Memoir generation endpoint
    #[arg(long, env = "MELO_MEMOIR_URL")]
    memoir_url: Option<String>,

    /// Speech-to-text endpoint; enables spoken answers
    #[arg(long, env = "MELO_TRANSCRIPTION_URL")]
    transcription_url: Option<String>,

    #[arg(long, value_enum)]
    metric: Option<MetricArg>,

    /// Disable background ambience
    #[arg(long)]
    no_ambience: bool,

    /// Play the recommended track's preview at the end
    #[arg(long)]
    play_final_track: bool,

    /// Never open sound devices (silent playback, typed answers only)
    #[arg(long)]
    no_audio: bool,

    /// Print the available sound devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Seed for question selection
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(path) = &self.catalog {
            config.matching.catalog_path = Some(path.clone());
        }
        if let Some(url) = &self.analysis_url {
            config.services.analysis_url = Some(url.clone());
        }
        if let Some(url) = &self.memoir_url {
            config.services.memoir_url = Some(url.clone());
        }
        if let Some(url) = &self.transcription_url {
            config.services.transcription_url = Some(url.clone());
        }
        if self.no_audio {
            config.audio.enabled = false;
        }
        if let Some(metric) = self.metric {
            config.matching.metric = metric.into();
        }
        if self.no_ambience {
            config.ambience.enabled = false;
        }
        if self.play_final_track {
            config.matching.play_final_track = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load_resolved(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    // Initialize tracing (RUST_LOG wins over the configured level)
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("melo_iv={level},melo_ap={level},melo_pd={level},melo_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Melo interviewer v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let catalog = match &config.matching.catalog_path {
        Some(path) => Catalog::load_json(path).with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => Catalog::builtin(),
    };

    let timeout = Duration::from_millis(config.services.request_timeout_ms);

    let analyzer: Arc<dyn Analyzer> = match &config.services.analysis_url {
        Some(url) => Arc::new(HttpAnalyzer::new(url.clone(), timeout).context("Failed to create analyzer client")?),
        None => {
            warn!("No analysis service configured; every answer will read as neutral");
            Arc::new(NeutralAnalyzer)
        }
    };

    let mut stdin = BufReader::new(tokio::io::stdin());

    let category = if args.no_category {
        None
    } else {
        match &args.category {
            Some(selection) => match CategoryTag::parse_selection(selection) {
                Some(category) => Some(category),
                None => bail!("Unknown category {:?}; use a number 1-9 or part of a category name", selection),
            },
            None => prompt_category(&mut stdin).await?,
        }
    };

    let event_bus = EventBus::default();
    let chooser = match args.seed {
        Some(seed) => RandomChooser::seeded(seed),
        None => RandomChooser::new(),
    };

    let mut answers = ConsoleAnswerSource::new(stdin, tokio::io::stdout(), config.interview.interviewer_name.clone());
    let speech_enabled = match &config.services.transcription_url {
        Some(url) if config.audio.enabled => {
            let transcriber = HttpTranscriber::new(url.clone(), timeout).context("Failed to create transcription client")?;
            let recorder = MicRecorder::from(&config.audio);
            answers = answers.with_speech(SpeechAnswerSource::new(Arc::new(recorder), Arc::new(transcriber)));
            true
        }
        Some(_) => {
            warn!("Audio is disabled; spoken answers are unavailable");
            false
        }
        None => false,
    };

    let search: Arc<dyn PreviewSearch> = Arc::new(
        DeezerClient::new(config.services.search_base_url.clone(), timeout).context("Failed to create search client")?,
    );
    let sink = open_sink(&config);
    let clip_player = Arc::new(HttpClipPlayer::new(timeout, sink).context("Failed to create clip player")?);

    let sentinel = config.interview.sentinel.clone();
    let mut orchestrator = InterviewOrchestrator::new(config.clone(), catalog, analyzer, Box::new(answers), event_bus.clone())
        .with_category(category)
        .with_generator(QuestionGenerator::new(Box::new(chooser)))
        .with_search(search)
        .with_final_player(clip_player.clone());

    let ambience = if config.ambience.enabled {
        let player = AmbiencePlayer::spawn(clip_player, AmbienceSettings::from(&config.ambience), event_bus);
        orchestrator = orchestrator.with_ambience(player.clone());
        Some(player)
    } else {
        None
    };

    if let Some(url) = &config.services.memoir_url {
        let writer = HttpMemoirWriter::new(url.clone(), timeout).context("Failed to create memoir client")?;
        orchestrator = orchestrator.with_memoir_writer(Arc::new(writer));
    }

    println!("\n==============================");
    println!("   REAL-TIME MEMOIR INTERVIEW");
    println!("==============================\n");
    println!("Type '{}' at any time to finish and generate the memoir.", sentinel);
    if speech_enabled {
        println!("Each question lets you choose to type or speak your answer.");
    }
    if let Some(category) = category {
        println!("Topic: {}", category);
    }

    let report = orchestrator.run().await;

    if let Some(ambience) = ambience {
        if let Err(e) = ambience.shutdown().await {
            warn!(error = %e, "Ambience controller did not shut down cleanly");
        }
    }

    println!("{}", report);
    info!(answers = report.answers.len(), turns = report.turns, "Interview complete");
    Ok(())
}

/// Speaker sink, or a silent one when audio is off or the device fails
fn open_sink(config: &TomlConfig) -> Arc<dyn PcmSink> {
    if !config.audio.enabled {
        info!("Audio output disabled");
        return Arc::new(NullSink);
    }

    match CpalSink::open(OutputSettings::from(&config.audio)) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(error = %e, "Audio output unavailable; continuing without sound");
            Arc::new(NullSink)
        }
    }
}

fn print_devices() {
    match list_output_devices() {
        Ok(devices) => {
            println!("Output devices:");
            for name in devices {
                println!("  {}", name);
            }
        }
        Err(e) => println!("Output devices unavailable: {}", e),
    }
    match list_input_devices() {
        Ok(devices) => {
            println!("Input devices:");
            for name in devices {
                println!("  {}", name);
            }
        }
        Err(e) => println!("Input devices unavailable: {}", e),
    }
}

/// Ask for a topic until the input names one; empty input skips
async fn prompt_category<R>(input: &mut R) -> Result<Option<CategoryTag>>
where
    R: AsyncBufRead + Unpin,
{
    let mut out = tokio::io::stdout();
    let mut menu = String::from("\nPlease choose a category to start with (Enter to skip):\n\n");
    for category in CategoryTag::ALL {
        menu.push_str(&format!("{}\n", category));
    }
    out.write_all(menu.as_bytes()).await?;

    loop {
        out.write_all(b"\nYour choice: ").await?;
        out.flush().await?;

        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            return Ok(None);
        }
        match CategoryTag::parse_selection(&line) {
            Some(category) => return Ok(Some(category)),
            None => {
                out.write_all(b"Invalid choice. Please select a number 1-9 or type the category name.\n")
                    .await?
            }
        }
    }
}
