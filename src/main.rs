use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use nova_live::{
    ChannelConfig, ChannelConnector, ChannelError, ChannelHandle, Config, EncodedChunk,
    MicBackend, ServerMessage, SessionChannel, SpeakerSink,
};

#[derive(Parser)]
#[command(name = "nova-live", about = "Live duplex audio session core", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available input devices
    Devices,
    /// Run a microphone-to-speaker loopback session
    Loopback {
        /// Config file (without extension), e.g. config/nova-live
        #[arg(long)]
        config: Option<String>,
        /// How long to run before stopping
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Devices => {
            let devices = MicBackend::list_devices().context("failed to enumerate devices")?;
            if devices.is_empty() {
                info!("no input devices found");
            }
            for name in devices {
                info!("input device: {}", name);
            }
            Ok(())
        }
        Command::Loopback { config, seconds } => run_loopback(config, seconds).await,
    }
}

/// Capture from the microphone, bounce every chunk off an in-process echo
/// channel, and play it back. Exercises the whole pipeline without any
/// remote service.
async fn run_loopback(config_path: Option<String>, seconds: u64) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load(&path).context("failed to load config")?,
        None => Config::default(),
    };

    let mut session_config = config.session_config();
    // The echo returns capture-rate audio, so play back at the same rate.
    session_config.output_sample_rate = config.audio.input_sample_rate;
    session_config.video = None;

    let capture = Box::new(MicBackend::new(config.capture_config()));
    let output = Arc::new(
        SpeakerSink::open(
            session_config.output_sample_rate,
            config.audio.output_device.clone(),
        )
        .await
        .context("failed to open speaker output")?,
    );

    let session = nova_live::LiveSession::start(
        session_config,
        capture,
        None,
        &EchoConnector,
        output,
    )
    .await
    .context("failed to start loopback session")?;

    info!("loopback session {} running for {}s", session.id(), seconds);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = session.wait_until_ended() => {}
    }

    let stats = session.stop().await;
    info!(
        "loopback finished: {:.1}s, {} chunks sent, {} chunks played",
        stats.duration_secs, stats.chunks_sent, stats.chunks_played
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// In-process channel that reflects audio input back as model audio.
struct EchoConnector;

struct EchoChannel {
    messages: Mutex<Option<mpsc::Sender<ServerMessage>>>,
}

#[async_trait]
impl ChannelConnector for EchoConnector {
    async fn connect(&self, _config: &ChannelConfig) -> Result<ChannelHandle, ChannelError> {
        let (tx, rx) = mpsc::channel(64);
        tx.send(ServerMessage::Opened)
            .await
            .map_err(|_| ChannelError::Connect("echo channel receiver dropped".into()))?;
        Ok(ChannelHandle {
            channel: Arc::new(EchoChannel {
                messages: Mutex::new(Some(tx)),
            }),
            messages: rx,
        })
    }
}

#[async_trait]
impl SessionChannel for EchoChannel {
    async fn send(&self, chunk: EncodedChunk) -> Result<(), ChannelError> {
        if !chunk.is_audio() {
            return Ok(());
        }
        let tx = {
            let guard = self
                .messages
                .lock()
                .map_err(|_| ChannelError::Send("echo channel state poisoned".into()))?;
            guard.clone()
        };
        let tx = tx.ok_or(ChannelError::Closed)?;
        tx.send(ServerMessage::AudioChunk { chunk })
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if let Ok(mut guard) = self.messages.lock() {
            guard.take();
        }
        Ok(())
    }
}
