

use anyhow::{bail, Context};
use research_kb::core::BatchStatus;
use research_kb::{KbConfig, KnowledgeBase};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "usage: research-kb-batch [--config <file>] <citations|pagerank|dedup|all>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("research_kb=info".parse()?))
        .init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<String> = None;
    let mut job: Option<String> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().context(USAGE)?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other if job.is_none() => job = Some(other.to_string()),
            other => bail!("unexpected argument '{}'\n{}", other, USAGE),
        }
    }
    let job = job.context(USAGE)?;

    let config = KbConfig::load(config_path.as_deref()).context("loading configuration")?;
    let kb = KnowledgeBase::from_config(config).context("initializing knowledge base")?;

    let (citations, pagerank, dedup) = match job.as_str() {
        "citations" => (true, false, false),
        "pagerank" => (false, true, false),
        "dedup" => (false, false, true),
        "all" => (true, true, true),
        other => bail!("unknown job '{}'\n{}", other, USAGE),
    };

    let mut failed = false;
    if dedup {
        let loaded = kb.load_registry().await?;
        info!("Registry seeded with {} concepts", loaded);
        let report = kb.deduplicate_corpus().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        failed |= report.status == BatchStatus::Failed;
    }
    if citations {
        let stats = kb.build_citation_graph().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        failed |= stats.status == BatchStatus::Failed;
    }
    if pagerank {
        let config = kb.config();
        let report = kb
            .compute_pagerank_authority(config.pagerank_iterations, config.pagerank_damping)
            .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        failed |= report.status == BatchStatus::Failed;
    }

    if failed {
        warn!("One or more batch jobs failed; previous state was kept");
        std::process::exit(1);
    }
    Ok(())
}
