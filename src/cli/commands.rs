use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app::{AppContext, Result, TributaryError};
use crate::config::format_duration;
use crate::daemon::{Daemon, DaemonConfig};
use crate::scheduler::{CycleReport, SourceOutcome};
use crate::store::Store;

pub async fn run(ctx: Arc<AppContext>, tick: Option<Duration>) -> Result<()> {
    let mut config = DaemonConfig::from_config(&ctx.config);
    if let Some(tick) = tick {
        config.tick = tick;
    }
    Daemon::new(ctx, config).run().await
}

pub async fn check(ctx: &AppContext, destination: Option<usize>) -> Result<()> {
    let mut scheduler = ctx.scheduler();
    let total = scheduler.destinations().len();

    if total == 0 {
        println!("No destinations configured");
        return Ok(());
    }

    let reports = match destination {
        Some(n) if n >= 1 && n <= total => vec![scheduler.check(n - 1, Instant::now()).await],
        Some(n) => {
            return Err(TributaryError::Config(format!(
                "No destination #{} (have {})",
                n, total
            )))
        }
        None => scheduler.check_all(Instant::now()).await,
    };

    let names: Vec<String> = scheduler.destinations().iter().map(|d| d.display_name()).collect();
    for report in &reports {
        print_report(&names[report.destination], report);
    }

    ctx.flush_conditional()?;
    Ok(())
}

fn print_report(name: &str, report: &CycleReport) {
    println!("{} ({} delivered)", name, report.delivered());
    for source in &report.sources {
        let status = match &source.outcome {
            SourceOutcome::Delivered {
                new,
                delivered,
                failed,
            } => {
                if *failed > 0 {
                    format!("{} new, {} delivered, {} failed", new, delivered, failed)
                } else {
                    format!("{} new, {} delivered", new, delivered)
                }
            }
            SourceOutcome::NotModified => "not modified".to_string(),
            SourceOutcome::CoolingDown => "host cooling down".to_string(),
            SourceOutcome::NoItems => "no items".to_string(),
            SourceOutcome::Failed(reason) => format!("failed: {}", reason),
        };
        println!("  {:<60} {}", source.url, status);
    }
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let counts = ctx.store.seen_counts()?;
    let mut by_key: HashMap<(usize, &str), usize> = HashMap::new();
    for count in &counts {
        by_key.insert((count.destination, count.source_url.as_str()), count.count);
    }

    let destinations = ctx.config.destinations();
    if destinations.is_empty() {
        println!("No destinations configured");
    }

    for dest in &destinations {
        println!(
            "#{} {} -> {} (every {}, up to {} per cycle)",
            dest.index + 1,
            dest.display_name(),
            dest.target,
            format_duration(dest.interval),
            dest.send_limit
        );
        for source in &dest.sources {
            let seen = by_key.get(&(dest.index, source.url.as_str())).copied().unwrap_or(0);
            println!("    {:>4} seen  {}", seen, source.url);
        }
    }

    println!();
    println!("Conditional cache entries: {}", ctx.conditional.len());
    Ok(())
}

pub fn parsers(ctx: &AppContext) -> Result<()> {
    for parser in ctx.pipeline.parsers() {
        println!("{:>4}  {}", parser.priority(), parser.name());
    }
    Ok(())
}
