//! # Trial Client - Command Line Entry Point
//!
//! A terminal front end for the two real-time sessions:
//! - `chat`: fact-gathering conversation, one line per message
//! - `trial`: voice trial with push-to-talk driven from the keyboard
//! - `create`: build a trial from a finished fact-gathering conversation
//! - `devices`: list audio devices (feature `device`)
//!
//! ## Startup:
//! 1. `.env` is loaded if present
//! 2. Tracing is initialized from `RUST_LOG`
//! 3. Configuration is loaded from `config.toml` + environment and validated
//! 4. The subcommand runs until `/quit`, the session ends, or SIGINT/SIGTERM arrives

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trial_session_client::api::{CreateTrialRequest, TrialApi};
use trial_session_client::audio::memory::ScriptedMicrophone;
use trial_session_client::audio::{MicPermission, Microphone, Speaker};
use trial_session_client::config::AppConfig;
use trial_session_client::session::{
    AudioDevices, FactGatheringClient, FactNotice, StopOutcome, VoiceNotice, VoiceTrialClient,
};
use trial_session_client::state::ClientState;
use trial_session_client::transcript::{Message, Origin};

/// Set once SIGINT or SIGTERM is received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "trial-client", version, about = "Mock trial session client")]
struct Cli {
    /// Configuration file (without extension)
    #[arg(long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fact-gathering chat
    Chat {
        #[arg(long)]
        session: String,
        #[arg(long)]
        flow: String,
    },
    /// Voice trial with push-to-talk
    Trial {
        #[arg(long)]
        session: String,
        /// Use a WAV file as the microphone instead of the system device
        #[arg(long)]
        audio_file: Option<PathBuf>,
    },
    /// Create a trial from a fact-gathering conversation
    Create {
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        flow: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List audio input and output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = if cli.config == "config" {
        AppConfig::load()?
    } else {
        AppConfig::load_from(&cli.config)?
    };
    config.validate()?;

    info!("Starting trial-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        ws = %config.server.ws_url,
        http = %config.server.http_url,
        "Configuration loaded"
    );

    let state = ClientState::new(config);
    setup_signal_handlers();

    let result = match cli.command {
        Command::Chat { session, flow } => run_chat(&state, &session, &flow).await,
        Command::Trial {
            session,
            audio_file,
        } => run_trial(&state, &session, audio_file).await,
        Command::Create {
            conversation,
            flow,
            description,
        } => run_create(&state, conversation, flow, &description).await,
        Command::Devices => list_devices(),
    };

    print_metrics(&state);
    result
}

/// `RUST_LOG` wins; otherwise the library logs at debug and the binary at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trial_session_client=debug,trial_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    _ => {
                        error!("Failed to install signal handlers");
                        return;
                    }
                };
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("Failed to install Ctrl-C handler");
                return;
            }
            info!("Received Ctrl-C");
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

fn print_metrics(state: &ClientState) {
    let metrics = state.get_metrics_snapshot();
    info!(
        received = metrics.messages_received,
        sent = metrics.messages_sent,
        malformed = metrics.malformed_dropped,
        refused = metrics.sends_refused,
        reconnects = metrics.reconnect_attempts,
        uptime_secs = state.get_uptime_seconds(),
        "Session metrics"
    );
}

fn print_message(label: &str, message: &Message) {
    let who = match message.origin {
        Origin::User => "you".to_string(),
        Origin::System => "system".to_string(),
        Origin::Agent => label.to_string(),
    };
    println!("[{}] {}: {}", message.timestamp, who, message.content);
}

async fn run_chat(state: &ClientState, session_id: &str, flow_id: &str) -> Result<()> {
    let (client, mut notices) = FactGatheringClient::connect(state, session_id, flow_id)
        .await
        .context("failed to open fact-gathering channel")?;

    println!("Connected. Type a message, /upload <path>, or /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => break,
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                match notice {
                    FactNotice::ConversationCreated(id) => info!(conversation_id = %id, "Conversation created"),
                    FactNotice::MessageCommitted(message) => print_message("assistant", &message),
                    FactNotice::AwaitingInput { .. } => println!("> "),
                    FactNotice::FlowComplete => {
                        println!("Fact gathering complete.");
                        if let Some(conversation) = client.conversation_id() {
                            println!("Create the trial with: trial-client create --conversation {conversation}");
                        }
                    }
                    FactNotice::FileUploaded { filename, size, .. } => {
                        println!("Uploaded {filename} ({} bytes)", size.unwrap_or(0));
                    }
                    FactNotice::ServerError(err) => println!("{}", err.user_message()),
                    FactNotice::SessionInterrupted => {
                        println!("Connection was interrupted; the conversation may need to be restarted.");
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                let sent = match line.strip_prefix("/upload ") {
                    Some(path) => client.upload_file(std::path::Path::new(path.trim())).await,
                    None => client.send_message(line),
                };
                if let Err(err) = sent {
                    println!("{}", err.user_message());
                }
            }
        }
        if client.gave_up() {
            println!("Connection lost. Please refresh the session.");
            break;
        }
    }

    client.close();
    Ok(())
}

fn audio_devices(config: &AppConfig, audio_file: Option<PathBuf>) -> Result<AudioDevices> {
    let microphone: Arc<dyn Microphone> = match audio_file {
        Some(path) => Arc::new(
            ScriptedMicrophone::from_wav_file(&path)
                .with_context(|| format!("cannot read {}", path.display()))?,
        ),
        None => system_microphone(config),
    };
    Ok(AudioDevices {
        microphone,
        speaker: system_speaker(config),
    })
}

#[cfg(feature = "device")]
fn system_microphone(config: &AppConfig) -> Arc<dyn Microphone> {
    Arc::new(trial_session_client::device::CpalMicrophone::new(Some(
        config.audio.input_device.clone(),
    )))
}

#[cfg(not(feature = "device"))]
fn system_microphone(_config: &AppConfig) -> Arc<dyn Microphone> {
    warn!("Built without the `device` feature; no microphone available");
    Arc::new(ScriptedMicrophone::missing())
}

#[cfg(feature = "device")]
fn system_speaker(config: &AppConfig) -> Arc<dyn Speaker> {
    Arc::new(trial_session_client::device::CpalSpeaker::new(Some(
        config.audio.output_device.clone(),
    )))
}

#[cfg(not(feature = "device"))]
fn system_speaker(_config: &AppConfig) -> Arc<dyn Speaker> {
    Arc::new(trial_session_client::audio::memory::RecordingSpeaker::new())
}

async fn run_trial(state: &ClientState, session_id: &str, audio_file: Option<PathBuf>) -> Result<()> {
    let config = state.get_config();
    let api = TrialApi::new(&config)?;

    let seed = match api.get_trial(session_id).await {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(error = %err, "Could not load trial session, starting empty");
            None
        }
    };

    let devices = audio_devices(&config, audio_file)?;
    let (client, mut notices) = VoiceTrialClient::connect(state, session_id, devices, seed)
        .await
        .context("failed to open trial channel")?;

    for message in client.transcript() {
        print_message(&client.speaker_label(message.role), &message);
    }
    println!("Enter toggles push-to-talk. /text <words>, /end, /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut confirming_end = false;

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => break,
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                match notice {
                    VoiceNotice::Connected { session_id } => {
                        info!(session_id = ?session_id, "Trial session ready");
                    }
                    VoiceNotice::RecordingChanged(state) => println!("({state})"),
                    VoiceNotice::Transcription(text) => println!("heard: {text}"),
                    VoiceNotice::MessageCommitted(message) => {
                        print_message(&client.speaker_label(message.role), &message);
                    }
                    VoiceNotice::ThinkingStarted(role) => {
                        println!("{} is thinking...", client.speaker_label(role));
                    }
                    VoiceNotice::ThinkingStopped(_) => {}
                    VoiceNotice::SpeakingStarted(role) => {
                        println!("{} is speaking", client.speaker_label(role));
                    }
                    VoiceNotice::SpeakingStopped(_) => {}
                    VoiceNotice::AudioDropped(role) => {
                        warn!(role = %role, "Agent audio dropped, another clip is playing");
                    }
                    VoiceNotice::PlaybackFailed(reason) => warn!(reason = %reason, "Playback failed"),
                    VoiceNotice::ServerError(err) => println!("{}", err.user_message()),
                    VoiceNotice::TrialEnded => {
                        println!("The trial has ended.");
                        if let Err(err) = api.end_trial(session_id).await {
                            warn!(error = %err, "Ending the trial on the server failed");
                        }
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();

                if confirming_end {
                    confirming_end = false;
                    if line.eq_ignore_ascii_case("y") {
                        if let Err(err) = client.end_trial() {
                            println!("{}", err.user_message());
                        }
                    }
                    continue;
                }

                match line {
                    "/quit" => break,
                    "/end" => {
                        println!("End the trial? [y/N]");
                        confirming_end = true;
                    }
                    "" | "/talk" => toggle_talk(&client).await,
                    _ => {
                        let text = line.strip_prefix("/text ").unwrap_or(line);
                        if let Err(err) = client.send_text(text) {
                            println!("{}", err.user_message());
                        }
                    }
                }
            }
        }
        if client.gave_up() {
            println!("Connection lost. Please refresh the session.");
            break;
        }
    }

    client.close();
    Ok(())
}

async fn toggle_talk(client: &VoiceTrialClient) {
    use trial_session_client::session::RecordingState;

    if client.recording_state() == RecordingState::Recording {
        match client.request_stop().await {
            Ok(StopOutcome::TooShort) => println!("Recording too short, hold longer."),
            Ok(StopOutcome::NotSent) => println!("Not connected; recording discarded."),
            Ok(_) => {}
            Err(err) => println!("{}", err.user_message()),
        }
        return;
    }

    if client.permission().await == MicPermission::Prompt {
        match client.request_permission().await {
            Ok(MicPermission::Granted) => {}
            Ok(_) => {
                println!("Microphone access is required to speak.");
                return;
            }
            Err(err) => {
                println!("{}", err.user_message());
                return;
            }
        }
    }

    match client.request_start().await {
        Ok(true) => {}
        Ok(false) => println!("Not ready to record."),
        Err(err) => println!("{}", err.user_message()),
    }
}

async fn run_create(
    state: &ClientState,
    conversation: Option<String>,
    flow: Option<String>,
    description: &str,
) -> Result<()> {
    let api = TrialApi::new(&state.get_config())?;
    let request = CreateTrialRequest::all_roles(conversation, flow, description);
    let created = api.create_trial(&request).await?;

    println!("Trial session: {}", created.session_id);
    for agent in &created.agents {
        println!("  {}: {}", agent.role, agent.name);
    }
    Ok(())
}

#[cfg(feature = "device")]
fn list_devices() -> Result<()> {
    use trial_session_client::device::{list_input_devices, list_output_devices};

    println!("Input devices:");
    for name in list_input_devices()? {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in list_output_devices()? {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(not(feature = "device"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("built without the `device` feature")
}
