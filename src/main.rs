use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ishu_voice::{
    create_router, AppState, CaptureBackendFactory, Config, ImageGenerator, NatsConnector,
    NatsImageGenerator, SessionDevices, SessionHandle, SessionState, TimelineOutput, VoiceSession,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ishu-voice")]
#[command(about = "Real-time voice assistant core")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/ishu-voice")]
    config: String,

    /// Replay a WAV file instead of the microphone
    #[arg(short, long, global = true)]
    input: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control surface
    Serve,
    /// Start a conversation right away; Ctrl-C to hang up
    Talk,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ishu_voice=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config).context("Failed to load config")?;
    if let Some(input) = cli.input {
        cfg.audio.source = "file".to_string();
        cfg.audio.input_file = Some(input);
    }

    info!("Ishu Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let (session, task) = spawn_session(&cfg).await?;

    match cli.command {
        Command::Serve => serve(&cfg, session.clone()).await?,
        Command::Talk => talk(session.clone()).await?,
    }

    session.shutdown().await.context("Failed to shut down session")?;
    task.await.context("Session task panicked")?;
    Ok(())
}

async fn spawn_session(cfg: &Config) -> Result<(SessionHandle, tokio::task::JoinHandle<()>)> {
    let session_config = cfg.session_config();
    let session_id = session_config.session_id.clone();

    let capture = CaptureBackendFactory::create_shared(
        cfg.audio.capture_source()?,
        cfg.audio.capture_config(),
    )
    .context("Failed to create capture backend")?;
    let output = TimelineOutput::new(cfg.audio.playback_sample_rate, cfg.audio.output_driver()?);

    let connector = Arc::new(NatsConnector::new(cfg.channel_config(&session_id)));

    let images: Option<Arc<dyn ImageGenerator>> = if cfg.images.enabled {
        match NatsImageGenerator::connect(
            &cfg.channel.nats_url,
            cfg.images.subject.clone(),
            session_id.clone(),
            Duration::from_secs(cfg.images.timeout_secs),
        )
        .await
        {
            Ok(generator) => Some(Arc::new(generator)),
            Err(e) => {
                warn!("Image generation unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let devices = SessionDevices {
        capture,
        output: Box::new(output),
    };
    Ok(VoiceSession::spawn(session_config, connector, images, devices))
}

async fn serve(cfg: &Config, session: SessionHandle) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    let app = create_router(AppState::new(session));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down HTTP server");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn talk(session: SessionHandle) -> Result<()> {
    session.start().await?;

    let mut updates = session.subscribe();
    let mut last = SessionState::Idle;
    let mut last_turn = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Hanging up");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state != last {
                    info!("State: {}", snapshot.state);
                    if let Some(message) = &snapshot.error_message {
                        warn!("{}", message);
                    }
                    last = snapshot.state;
                }
                if let Some(entry) = snapshot.turn_after(last_turn) {
                    info!("Ishu: {}", entry.text);
                    last_turn = Some(entry.timestamp);
                }
                if matches!(last, SessionState::Idle | SessionState::AwaitingAuth | SessionState::Error) {
                    break;
                }
            }
        }
    }

    if session.state().is_active() {
        session.stop().await?;
        let closed = tokio::time::timeout(
            Duration::from_secs(5),
            session.wait_for(|s| s.state == SessionState::Idle),
        )
        .await;
        if closed.is_err() {
            warn!("Channel did not close in time");
        }
    }

    Ok(())
}
