use anyhow::{Context, Result};
use clap::Parser;
use livemind::LlmOverride;
use livemind::config::{Config, LogConfig, LogFormat};
use livemind::engine::{Answer, QueryEngine, QueryRequest, StreamEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "livemind",
    version,
    about = "Real-time multi-source intelligence: live news, markets, weather and discussion fused into cited answers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the HTTP/WebSocket server with background refresh
    Serve {
        /// Path to config file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Bind address override
        #[arg(long)]
        host: Option<String>,

        /// Port override
        #[arg(long)]
        port: Option<u16>,

        /// Do not start the background refresher
        #[arg(long)]
        no_refresh: bool,

        /// LLM provider override: groq, openrouter, openai, anthropic
        #[arg(long)]
        provider: Option<String>,

        /// LLM model override
        #[arg(long)]
        model: Option<String>,
    },

    /// Answer one question from the terminal
    Ask {
        /// The question
        query: String,

        /// Comma-separated sources, e.g. news,finance
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        /// Path to config file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// LLM provider override: groq, openrouter, openai, anthropic
        #[arg(long)]
        provider: Option<String>,

        /// LLM model override
        #[arg(long)]
        model: Option<String>,
    },

    /// List known sources and whether each is usable
    Sources {
        /// Path to config file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn load_config(path: &Path, provider: Option<String>, model: Option<String>) -> Result<Config> {
    let mut config = Config::load_or_default(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(o) = LlmOverride::from_flags(provider, model)? {
        o.apply(&mut config.llm);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::from_path("../.env").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            no_refresh,
            provider,
            model,
        } => {
            let mut cfg = load_config(&config, provider, model)?;
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            cfg.validate()?;
            init_tracing(&cfg.log);
            livemind::server::serve(cfg, !no_refresh).await?;
            Ok(())
        }
        Command::Ask {
            query,
            sources,
            stream,
            config,
            provider,
            model,
        } => {
            let cfg = load_config(&config, provider, model)?;
            init_tracing(&cfg.log);
            let engine = QueryEngine::from_config(cfg).await?;
            let req = QueryRequest {
                query,
                sources: (!sources.is_empty()).then_some(sources),
                real_time: true,
                confidence_threshold: None,
            };
            let answer = if stream {
                ask_streaming(&engine, req).await?
            } else {
                let answer = engine.answer(req).await?;
                println!("{}", answer.response);
                answer
            };
            print_sources(&answer);
            Ok(())
        }
        Command::Sources { config } => {
            let cfg = load_config(&config, None, None)?;
            init_tracing(&cfg.log);
            let engine = QueryEngine::from_config(cfg).await?;
            println!("{:<10} {:<8} {:<13} DESCRIPTION", "SOURCE", "ENABLED", "STATUS");
            for s in engine.available_sources() {
                println!(
                    "{:<10} {:<8} {:<13} {}",
                    s.id.id(),
                    if s.enabled { "yes" } else { "no" },
                    s.status,
                    s.description
                );
            }
            Ok(())
        }
    }
}

async fn ask_streaming(engine: &QueryEngine, req: QueryRequest) -> Result<Answer> {
    let (tx, mut rx) = mpsc::channel(64);
    let printer = async {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk { content } => {
                    print!("{content}");
                    let _ = stdout.flush();
                }
                StreamEvent::Error { message, .. } => eprintln!("error: {message}"),
                StreamEvent::Context { .. } | StreamEvent::Done { .. } => {}
            }
        }
        println!();
    };
    let (answer, ()) = tokio::join!(engine.answer_stream(req, tx), printer);
    Ok(answer?)
}

fn print_sources(answer: &Answer) {
    println!();
    println!(
        "mode: {:?} | {} ms | {} context item(s)",
        answer.mode,
        answer.processing_time_ms,
        answer.sources.len()
    );
    for s in &answer.sources {
        println!(
            "  [{}] {} | {} | confidence {:.2}",
            s.name, s.provider, s.title, s.confidence
        );
    }
    for o in &answer.outcomes {
        match &o.error {
            Some(err) => println!("  {}: {:?} ({err})", o.source, o.status),
            None => println!("  {}: {:?}, {} item(s), {} ms", o.source, o.status, o.items, o.latency_ms),
        }
    }
    if !answer.unknown_sources.is_empty() {
        println!("  unknown sources ignored: {}", answer.unknown_sources.join(", "));
    }
}
