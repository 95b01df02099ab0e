use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use hr_agent::backend::{Backend, HttpBackend};
use hr_agent::config::AgentConfig;
use hr_agent::llm::{HttpLlm, LlmClient};
use hr_agent::mailbox::HttpMailbox;
use hr_agent::pipeline::classifier::{Classifier, RoutingRules};
use hr_agent::pipeline::orchestrator::{Orchestrator, OrchestratorSettings};
use hr_agent::runner::{RunConfig, RunLoop};
use hr_agent::templates::TemplateStore;

enum Mode {
    Once,
    Continuous,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mode = match args.get(1).map(String::as_str) {
        None | Some("once") => Mode::Once,
        Some("continuous") => Mode::Continuous,
        Some(other) => {
            eprintln!("Unknown mode: {other}");
            eprintln!("Usage:");
            eprintln!("  hr-agent once                              # single pass, then exit");
            eprintln!("  hr-agent continuous [interval] [iterations]");
            std::process::exit(2);
        }
    };

    let mut config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Positional overrides for continuous mode.
    if let Some(interval) = args.get(2).and_then(|s| s.parse::<u64>().ok()) {
        config.poll_interval = Duration::from_secs(interval);
    }
    if let Some(iterations) = args.get(3).and_then(|s| s.parse::<u32>().ok()) {
        config.max_iterations = iterations;
    }

    eprintln!("HR mail agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.backend_url);
    eprintln!("   Mailbox: {}", config.mailbox_url);
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());
    eprintln!("   Max messages per poll: {}", config.max_messages_per_poll);
    eprintln!("   Max iterations: {}", config.max_iterations);
    match &config.llm {
        Some(llm) => eprintln!("   Classifier fallback: {}", llm.model),
        None => eprintln!("   Classifier fallback: disabled (deterministic only)"),
    }

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(
        &config.backend_url,
        &config.agent_email,
        config.agent_password.clone(),
    ));

    if !backend.health_check().await {
        eprintln!("Error: backend health check failed. Is the backend running?");
        std::process::exit(1);
    }
    eprintln!("   Backend connection established");

    let mailbox = Arc::new(HttpMailbox::new(
        &config.mailbox_url,
        config.mailbox_token.clone(),
    ));

    let templates = match &config.template_dir {
        Some(dir) => match TemplateStore::with_overrides(dir) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("Error: failed to load templates from {}: {e}", dir.display());
                std::process::exit(1);
            }
        },
        None => Arc::new(TemplateStore::builtin()),
    };
    eprintln!("   Templates: {} loaded", templates.list().len());

    let llm: Option<Arc<dyn LlmClient>> = config
        .llm
        .as_ref()
        .map(|settings| Arc::new(HttpLlm::new(settings)) as Arc<dyn LlmClient>);

    let classifier = Classifier::new(
        RoutingRules::new(&config.candidate_token, &config.position_token),
        llm,
    );

    let orchestrator = Orchestrator::new(
        Arc::clone(&mailbox) as Arc<dyn hr_agent::mailbox::Mailbox>,
        Arc::clone(&backend),
        templates,
        classifier,
        OrchestratorSettings {
            draft_replies: config.draft_replies,
            default_department: config.default_department.clone(),
            processed_label: config.processed_label.clone(),
        },
    );

    let runner = RunLoop::new(
        mailbox,
        backend,
        orchestrator,
        RunConfig {
            poll_interval: config.poll_interval,
            max_messages_per_poll: config.max_messages_per_poll,
            max_iterations: config.max_iterations,
            inbox_label: config.inbox_label.clone(),
            processed_label: config.processed_label.clone(),
        },
    );

    // Interrupts are honored between iterations; the in-flight item always
    // finishes.
    let shutdown = runner.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received; finishing current iteration...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    match mode {
        Mode::Once => match runner.run_once().await {
            Ok(stats) => {
                eprintln!(
                    "Done: attempted {}, succeeded {}, failed {}",
                    stats.attempted, stats.succeeded, stats.failed
                );
            }
            Err(e) => {
                // Not fatal by the loop's rules, but in single-pass mode
                // there is no next iteration to recover in.
                eprintln!("Iteration aborted: {e}");
            }
        },
        Mode::Continuous => {
            let stats = runner.run_continuous().await;
            eprintln!(
                "Run complete: attempted {}, succeeded {}, failed {}",
                stats.attempted, stats.succeeded, stats.failed
            );
        }
    }

    Ok(())
}
