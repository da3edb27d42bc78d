use anyhow::{Context, Result};
use clap::Parser;
use convai_duplex::{
    create_router, AppState, AudioBackendFactory, AudioSource, Config,
    ConversationSession, HttpCredentialFetcher, PlaybackOutput, SessionConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "convai-duplex", about = "Realtime voice conversation with a remote agent")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/convai-duplex")]
    config: String,

    /// WAV file used as the microphone (overrides config)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// WAV file the agent's voice is written to (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Discard the agent's voice instead of playing it
    #[arg(long)]
    mute: bool,

    /// Run the HTTP control API instead of a single conversation
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config))?;

    info!("convai-duplex v{}", env!("CARGO_PKG_VERSION"));
    info!("Agent: {} ({}, {}Hz)", cfg.agent.agent_id, cfg.agent.language, cfg.agent.sample_rate);

    let fetcher = HttpCredentialFetcher::from_config(&cfg.credential)?;

    let session_config = SessionConfig::from_config(&cfg);
    let backend_config = session_config.backend_config();
    let source = match args.input.or_else(|| cfg.audio.input_path.clone()) {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };
    info!("Capture source: {:?}", source);
    let capture = AudioBackendFactory::for_source(source, backend_config);

    let playback = match args.output.or_else(|| cfg.playback.output_path.clone()) {
        Some(path) => PlaybackOutput::WavFile(path),
        None if args.mute => PlaybackOutput::Discard,
        None => PlaybackOutput::Speaker,
    };

    let handle = ConversationSession::spawn(
        session_config,
        Arc::new(fetcher),
        capture,
        playback,
    );

    if args.serve {
        let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Control API listening on http://{}", addr);

        axum::serve(listener, create_router(AppState::new(handle.clone())))
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

        handle.shutdown().await;
        return Ok(());
    }

    handle.start().await?;

    tokio::select! {
        status = handle.wait_for(|state| state.is_terminal()) => {
            let status = status?;
            info!("{}", status.message);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing conversation");
            handle.stop().await?;
            let status = handle.wait_for(|state| state.is_terminal()).await?;
            info!("{}", status.message);
        }
    }

    let stats = handle.stats();
    info!(
        "Frames sent: {}, dropped: {}, agent frames: {}, playback errors: {}",
        stats.frames_sent, stats.frames_dropped, stats.audio_frames_received, stats.playback_errors
    );
    for utterance in handle.utterances() {
        info!("[{:?}] {}", utterance.speaker, utterance.text);
    }

    handle.shutdown().await;
    Ok(())
}
