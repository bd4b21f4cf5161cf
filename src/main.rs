//! CortexDx - diagnostic and self-improvement engine for MCP servers
#![doc = "Main entry point for the CortexDx diagnostic CLI."]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cortexdx::cli::{Cli, Commands, PatternsCommand};
use cortexdx::config::Config;
use cortexdx::conversation::session::{ConversationSession, ExpertiseLevel};
use cortexdx::llm::http::HttpChatAdapter;
use cortexdx::orchestrator::{Orchestrator, ProbeRegistry, RunConfig};
use cortexdx::pattern_memory::{PatternStore, QueryParams, SortBy};
use cortexdx::ratelimit::RateLimiter;
use cortexdx::transport::TransportSession;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse_args();
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Diagnose {
            endpoint,
            suites,
            severity,
            out,
            r#async,
            timeout,
            deterministic,
        } => {
            if r#async {
                tracing::warn!("--async is not yet wired to a background run queue; running synchronously");
            }

            let probe_ids = suites.map(|s| s.split(',').map(|p| p.trim().to_string()).collect::<Vec<_>>());
            let severity_gate = match severity {
                Some(s) => {
                    let mut cfg = config.orchestrator.clone();
                    cfg.severity_gate = Some(s);
                    cfg.severity_gate()?
                }
                None => config.orchestrator.severity_gate()?,
            };

            let session = build_transport_session(&endpoint, &config).await?;
            let pattern_memory = Arc::new(PatternStore::new(config.pattern_memory.dev_plaintext)?);
            let rate_limiter = RateLimiter::new();

            let mut registry = ProbeRegistry::new();
            registry.register(Arc::new(cortexdx::orchestrator::probes::HandshakeSummaryProbe::new()));
            registry.register(Arc::new(cortexdx::orchestrator::probes::ToolsListProbe::new()));
            let orchestrator = Orchestrator::new(registry)
                .with_pattern_memory(Arc::clone(&pattern_memory))
                .with_rate_limiter(rate_limiter);

            let run_config = RunConfig {
                endpoint: endpoint.clone(),
                question: None,
                probe_ids,
                headers: HashMap::new(),
                severity_gate,
                output_dir: out.map(Into::into),
                deterministic,
                probe_timeout: timeout.map(Duration::from_millis).unwrap_or_else(|| config.orchestrator.probe_timeout()),
                parallelism: config.orchestrator.parallelism,
                evidence_cap: config.orchestrator.evidence_cap,
            };

            let outcome = orchestrator.run(session, run_config).await;
            println!("{}", outcome.report.render_markdown());
            if let Some(dir) = &outcome.report_dir {
                tracing::info!(report_dir = %dir.display(), "wrote diagnostic report artifacts");
            }
            std::process::exit(outcome.exit_code);
        }

        Commands::Chat { endpoint, expertise, seed } => {
            tracing::info!(%endpoint, "starting conversational session");
            let expertise = match expertise.to_lowercase().as_str() {
                "beginner" => ExpertiseLevel::Beginner,
                "expert" => ExpertiseLevel::Expert,
                _ => ExpertiseLevel::Intermediate,
            };
            let mut session = ConversationSession::new(uuid::Uuid::new_v4().to_string(), expertise);
            if let Some(seed) = seed {
                session = session.with_deterministic_seed(seed);
            }
            let adapter = HttpChatAdapter::new(config.llm.to_adapter_config())?;

            let stdin = std::io::stdin();
            loop {
                print!("> ");
                std::io::stdout().flush().ok();
                let mut line = String::new();
                if stdin.read_line(&mut line)? == 0 {
                    break;
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let outcome = session.turn(line, &adapter).await?;
                println!("{}", outcome.response);
                if outcome.phase == cortexdx::conversation::Phase::Completed {
                    break;
                }
            }
        }

        Commands::Patterns { command } => {
            let store = PatternStore::new(config.pattern_memory.dev_plaintext)?;
            match command {
                PatternsCommand::List { problem_type, min_confidence, limit } => {
                    let patterns = store.query_patterns(QueryParams {
                        problem_type,
                        min_confidence,
                        limit,
                        sort_by: SortBy::Confidence,
                        ..Default::default()
                    })?;
                    for pattern in patterns {
                        println!(
                            "{}  [{}]  confidence={:.2}  uses={}/{}",
                            pattern.id,
                            pattern.problem_type,
                            pattern.confidence,
                            pattern.success_count,
                            pattern.success_count + pattern.failure_count
                        );
                    }
                }
                PatternsCommand::Prune { max_age_days } => {
                    let days = max_age_days.unwrap_or(config.pattern_memory.max_age_days);
                    let removed = store.prune_old_patterns(chrono::Duration::days(days))?;
                    println!("pruned {removed} pattern(s) older than {days} day(s)");
                }
            }
        }
    }

    Ok(())
}

/// Build a transport for `endpoint`: HTTP(S) URLs use the Streamable HTTP/SSE
/// transport; anything else is treated as an executable path for a
/// stdio-transport child process.
async fn build_transport_session(endpoint: &str, config: &Config) -> Result<Arc<TransportSession>> {
    let transport: Arc<dyn cortexdx::transport::Transport> = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        let url = url::Url::parse(endpoint)?;
        Arc::new(cortexdx::transport::http::HttpTransport::new(
            url,
            HashMap::new(),
            config.transport.request_timeout(),
        ))
    } else {
        Arc::new(cortexdx::transport::stdio::StdioTransport::spawn(
            endpoint.into(),
            Vec::new(),
            HashMap::new(),
            None,
        )?)
    };
    Ok(Arc::new(TransportSession::new(transport)))
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cortexdx=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
