use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use interject::pipeline::{SentenceSegmenter, clean_for_speech};
use interject::voice::{
    AudioCapture, AudioPlayback, MicrophoneSource, OpenAiSpeechEngine, PLAYBACK_SAMPLE_RATE,
    SAMPLE_RATE, SpeechEngine, SpeechToText, TextToSpeech, WhisperCapture, load_classifier,
    rms_energy,
};
use interject::{Assistant, Collaborators, Config, OllamaModel};

/// Interject - an interruptible voice assistant
#[derive(Parser)]
#[command(name = "interject", version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, env = "INTERJECT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Split stdin into spoken sentence units
    Segment {
        /// Characters per simulated stream chunk
        #[arg(long, default_value = "8")]
        chunk: usize,
        /// Override the minimum sentence length
        #[arg(long)]
        min: Option<usize>,
        /// Override the maximum sentence length
        #[arg(long)]
        max: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,interject=info",
        1 => "info,interject=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(Some(path))?,
        None => Config::load()?,
    };
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Segment { chunk, min, max } => segment(&config, chunk, min, max),
        };
    }

    let parts = collaborators(&config)?;
    let mut assistant = Assistant::new(&config, parts)?;
    assistant.start().context("failed to start the pipeline")?;

    let mut states = assistant.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::debug!(%state, "pipeline state changed");
        }
    });

    tracing::info!(model = %config.llm.model, "interject ready - say the wake word");

    let shutdown = assistant.shutdown_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupted");
        }
        () = shutdown.cancelled() => {
            tracing::info!("shutdown requested by voice command");
        }
    }

    let status = assistant.status();
    tracing::debug!(?status, "final status");
    assistant.stop().await;

    Ok(())
}

/// Build the production collaborators from configuration
fn collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let classifier = load_classifier(config.voice.wake_model.as_deref(), config.voice.wake_threshold)?;

    let api_key = config
        .api_keys
        .openai
        .clone()
        .context("OPENAI_API_KEY is required for speech synthesis and recognition")?;

    let tts = TextToSpeech::new(
        api_key.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
        config.voice.tts_model.clone(),
    )?;
    let stt = SpeechToText::new(api_key, config.voice.stt_model.clone())?;

    Ok(Collaborators {
        audio: Box::new(MicrophoneSource::new(classifier.frame_length())),
        classifier,
        speech: Arc::new(OpenAiSpeechEngine::new(tts)),
        capture: Arc::new(WhisperCapture::new(stt, config.voice.energy_threshold)),
        model: Arc::new(OllamaModel::new(&config.llm)?),
    })
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || AudioPlayback::new()?.play(samples, || false)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output through the speech engine
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let api_key = config
        .api_keys
        .openai
        .clone()
        .context("OPENAI_API_KEY is required for TTS")?;
    let tts = TextToSpeech::new(
        api_key,
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
        config.voice.tts_model.clone(),
    )?;

    println!("Synthesizing and playing...");
    OpenAiSpeechEngine::new(tts).speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Feed stdin through the segmenter in small chunks and print each unit
fn segment(
    config: &Config,
    chunk: usize,
    min: Option<usize>,
    max: Option<usize>,
) -> anyhow::Result<()> {
    let min = min.unwrap_or(config.pipeline.min_sentence_length);
    let max = max.unwrap_or(config.pipeline.max_sentence_length);
    anyhow::ensure!(min > 0 && max > min, "need 0 < min < max (got {min}, {max})");

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let chars: Vec<char> = input.chars().collect();
    let mut segmenter = SentenceSegmenter::new(min, max);
    let mut units = Vec::new();

    for piece in chars.chunks(chunk.max(1)) {
        units.extend(segmenter.add_chunk(&piece.iter().collect::<String>()));
    }
    units.extend(segmenter.flush());

    for (i, unit) in units.iter().enumerate() {
        println!("{:3}: {}", i + 1, clean_for_speech(unit));
    }

    Ok(())
}
