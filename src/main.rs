use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use streamsys_client::config::{self, DEFAULT_BASE_URL};
use streamsys_client::{
    ConfigError, CurrentState, DisplayState, Endpoint, SessionClient, SessionConfig, SessionError, StateRecord,
    StaticToken,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("not connected after {0:?}")]
    ConnectTimeout(Duration),
    #[error("server refused authentication; pass a token with write access")]
    AuthRefused,
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "streamsys", about = "Presentation state session CLI")]
struct Cli {
    #[arg(long, env = "STREAMSYS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "STREAMSYS_TOKEN")]
    token: Option<String>,

    #[arg(long, value_enum, default_value_t = EndpointArg::State)]
    endpoint: EndpointArg,

    #[arg(long, default_value_t = 10_000, help = "Give up connecting after this many milliseconds")]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EndpointArg {
    State,
    DisplayState,
}

impl From<EndpointArg> for Endpoint {
    fn from(value: EndpointArg) -> Self {
        match value {
            EndpointArg::State => Endpoint::State,
            EndpointArg::DisplayState => Endpoint::DisplayState,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every state change until ctrl-c.
    Watch,
    /// Print the current state once.
    Get,
    /// Replace the shared state.
    Set {
        #[arg(long, help = "New state as JSON")]
        data: String,
    },
    /// Measure round-trip latency.
    Ping {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let endpoint = Endpoint::from(cli.endpoint);
    let mut config = SessionConfig::from_env(endpoint)?;
    config.url = config::ws_url(&cli.base_url, endpoint.path())?;
    if !matches!(cli.command, Command::Watch) {
        config.ping_delay = None;
    }

    match endpoint {
        Endpoint::State => run::<CurrentState>(cli, config).await,
        Endpoint::DisplayState => run::<DisplayState>(cli, config).await,
    }
}

async fn run<S: StateRecord>(cli: Cli, config: SessionConfig) -> Result<(), CliError> {
    let session = SessionClient::<S>::websocket(config, Arc::new(StaticToken::new(cli.token)));
    let connect_timeout = Duration::from_millis(cli.connect_timeout_ms);

    match cli.command {
        Command::Watch => watch(&session).await,
        Command::Get => {
            connect(&session, connect_timeout).await?;
            print_json(&session.current_state())?;
            session.disconnect().await;
            Ok(())
        }
        Command::Set { data } => {
            let state = serde_json::from_str::<S>(&data)?;
            connect(&session, connect_timeout).await?;
            if !session.status().authenticated && !session.authenticate().await? {
                return Err(CliError::AuthRefused);
            }
            let confirmed = session.set_state(state).await?;
            print_json(&confirmed)?;
            session.disconnect().await;
            Ok(())
        }
        Command::Ping { count } => {
            connect(&session, connect_timeout).await?;
            for _ in 0..count {
                let rtt = session.ping().await?;
                println!("pong in {:.1} ms", rtt.as_secs_f64() * 1000.0);
            }
            session.disconnect().await;
            Ok(())
        }
    }
}

async fn connect<S: StateRecord>(session: &SessionClient<S>, limit: Duration) -> Result<(), CliError> {
    tokio::time::timeout(limit, session.connect())
        .await
        .map_err(|_| CliError::ConnectTimeout(limit))
}

/// Connect (retrying for as long as it takes) and print each state change.
async fn watch<S: StateRecord>(session: &SessionClient<S>) -> Result<(), CliError> {
    let mut states = session.watch_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        result = &mut ctrl_c => {
            result?;
            session.disconnect().await;
            return Ok(());
        }
        () = session.connect() => {}
    }
    print_json(&session.current_state())?;
    states.mark_unchanged();

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_json(&state)?;
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
