use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voxturn::api::ApiServerBuilder;
use voxturn::voice::{
    AudioSegment, AudioSink, CaptureConstraints, InputDevice, MicrophoneInput,
    PLAYBACK_SAMPLE_RATE, SpeakerOutput, TurnId, samples_to_wav,
};
use voxturn::{Config, PipelineController, Services, TurnOutcome, TurnPipeline, TurnState};

/// voxturn - push-to-talk voice turns against remote STT, dialogue and TTS
#[derive(Parser)]
#[command(name = "voxturn", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/voxturn/config.toml)
    #[arg(short, long, env = "VOXTURN_CONFIG")]
    config: Option<PathBuf>,

    /// Control API port
    #[arg(long)]
    port: Option<u16>,

    /// Control API bind address
    #[arg(long, env = "VOXTURN_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Default synthesis language
    #[arg(long)]
    language: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and control API until interrupted
    Serve,
    /// Run one turn from the terminal
    Talk,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test the synthesis service and speaker together
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxturn=info",
        1 => "info,voxturn=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(language) = cli.language {
        config.services.language = language;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &cli.host).await,
        Command::Talk => talk(&config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Spawn the controller over the default microphone and speaker
fn spawn_controller(
    config: &Config,
) -> anyhow::Result<(voxturn::ControllerHandle, tokio::task::JoinHandle<()>)> {
    let input: Arc<dyn InputDevice> = Arc::new(MicrophoneInput);
    let sink: Arc<dyn AudioSink> = Arc::new(SpeakerOutput::new()?);
    let pipeline = TurnPipeline::new(Services::http(&config.services), config.pipeline_settings());

    Ok(PipelineController::spawn(
        input,
        sink,
        pipeline,
        config.controller_settings(),
    ))
}

/// Run the controller with the HTTP control API until Ctrl-C
async fn serve(config: &Config, host: &str) -> anyhow::Result<()> {
    tracing::info!(
        port = config.api.port,
        transcription = %config.services.transcription_url,
        dialogue = %config.services.dialogue_url,
        synthesis = %config.services.synthesis_url,
        "starting voxturn"
    );

    let (controller, controller_task) = spawn_controller(config)?;
    let mut server = ApiServerBuilder::new(controller.clone(), config.api.port)
        .host(host)
        .build()
        .spawn();

    tracing::info!("voxturn ready");

    tokio::select! {
        result = &mut server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    // The server holds a controller handle; it must go before the controller can stop
    server.abort();
    let _ = server.await;

    let _ = controller.end_turn().await;
    drop(controller);
    controller_task.await?;
    Ok(())
}

/// Capture one utterance from the terminal and play the replies
async fn talk(config: &Config) -> anyhow::Result<()> {
    let (controller, controller_task) = spawn_controller(config)?;

    let turn = controller.start_turn().await?;
    println!(
        "Listening (turn {turn}). Press Enter to stop, or wait {}s.",
        config.capture.max_duration.as_secs()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        _ = lines.next_line() => {
            if controller.state() == TurnState::Capturing {
                controller.toggle_capture().await?;
            }
        }
        _ = controller.wait_for(|s| s.state != TurnState::Capturing) => {}
    }

    println!("Processing...");

    let mut status = controller.subscribe();
    let mut shown_transcript = false;
    let final_status = loop {
        let snapshot = status.borrow_and_update().clone();
        if !shown_transcript {
            if let Some(text) = &snapshot.transcript {
                println!("You said: {text}");
                shown_transcript = true;
            }
        }
        if snapshot.turn != Some(turn) || snapshot.state == TurnState::Error {
            break snapshot;
        }
        if status.changed().await.is_err() {
            anyhow::bail!("controller stopped unexpectedly");
        }
    };

    if let Some(error) = &final_status.last_error {
        println!("Turn failed at {error}");
    } else {
        match &final_status.last_outcome {
            Some(TurnOutcome::Completed {
                segments,
                playback_failures,
                ..
            }) => println!("Played {segments} replies ({playback_failures} failed)"),
            Some(TurnOutcome::NoSpeech { .. }) => println!("No speech detected"),
            Some(TurnOutcome::Cancelled { .. }) => println!("Turn cancelled"),
            Some(TurnOutcome::Failed { error, .. }) => println!("Turn failed at {error}"),
            None => {}
        }
    }

    let _ = controller.end_turn().await;
    drop(controller);
    controller_task.await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let constraints = CaptureConstraints {
        echo_cancellation: config.capture.echo_cancellation,
        noise_suppression: config.capture.noise_suppression,
        sample_rate: config.capture.sample_rate,
    };
    let mut handle = MicrophoneInput.acquire(&constraints).await?;

    println!("Sample rate: {} Hz", handle.sample_rate());
    println!("---");

    for i in 0..duration {
        let mut samples = Vec::new();
        let window = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(window);

        loop {
            tokio::select! {
                () = &mut window => break,
                chunk = handle.next_chunk() => match chunk {
                    Some(chunk) => samples.extend_from_slice(&chunk),
                    None => anyhow::bail!("microphone stopped delivering audio"),
                },
            }
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    drop(handle);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let speaker = SpeakerOutput::new()?;

    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let sample_rate = PLAYBACK_SAMPLE_RATE as f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate * 2.0) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);

    let segment = AudioSegment {
        turn: TurnId::default(),
        index: 0,
        data: samples_to_wav(&samples, PLAYBACK_SAMPLE_RATE)?,
    };
    speaker.play(&segment).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test the synthesis service end to end
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let services = Services::http(&config.services);

    println!("Synthesizing speech ({})...", config.services.language);
    let audio = services
        .synthesizer
        .synthesize(text, &config.services.language)
        .await?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio...");
    let speaker = SpeakerOutput::new()?;
    speaker
        .play(&AudioSegment {
            turn: TurnId::default(),
            index: 0,
            data: audio,
        })
        .await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
