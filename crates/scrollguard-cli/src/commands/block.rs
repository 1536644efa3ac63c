use chrono::Utc;
use clap::{Args, Subcommand};
use scrollguard_core::{
    format_time, hostname_from_url, BlockScope, ListClassifier, SiteClassifier, TimeManager,
};

use super::{open_times, CommandResult};

/// Which block a command applies to.
#[derive(Args)]
pub struct Target {
    /// Site URL or hostname (e.g. "x.com", "https://www.reddit.com/r/all")
    site: Option<String>,
    /// Apply to the shared block covering every news site
    #[arg(long, conflicts_with = "site")]
    news: bool,
}

impl Target {
    fn scope(&self) -> Result<BlockScope, Box<dyn std::error::Error>> {
        if self.news {
            return Ok(BlockScope::news());
        }
        match &self.site {
            Some(site) => Ok(BlockScope::host(hostname_from_url(site)?)),
            None => Err("pass a site or --news".into()),
        }
    }
}

#[derive(Subcommand)]
pub enum BlockAction {
    /// Print whether a site is blocked right now as JSON
    Status {
        #[command(flatten)]
        target: Target,
    },
    /// Block a site (or all news sites) for the configured duration
    Create {
        #[command(flatten)]
        target: Target,
    },
    /// Remove a block
    Remove {
        #[command(flatten)]
        target: Target,
    },
    /// List active blocks as JSON
    List,
}

pub async fn run(action: BlockAction) -> CommandResult {
    let (config, times) = open_times()?;
    let now = Utc::now();

    match action {
        BlockAction::Status { target } => {
            let scope = target.scope()?;
            let site = match &scope {
                BlockScope::Host(hostname) => {
                    Some(ListClassifier::from_config(&config.sites).classify(hostname))
                }
                BlockScope::Category(_) => None,
            };
            // A news site is also covered by the category block.
            let covered_by_news = site.is_some_and(|s| s.is_news)
                && times.is_news_time_blocked(now).await?;
            let scope = if covered_by_news {
                BlockScope::news()
            } else {
                scope
            };
            let remaining_ms = times.remaining(&scope, now).await?;
            let status = serde_json::json!({
                "scope": scope,
                "site": site,
                "blocked": remaining_ms > 0,
                "remaining_ms": remaining_ms,
                "remaining": format_time(remaining_ms),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        BlockAction::Create { target } => {
            let scope = target.scope()?;
            times.create_block(&scope, now).await?;
            let until = now + config.blocking.block_duration();
            println!("blocked {scope} until {}", until.to_rfc3339());
        }
        BlockAction::Remove { target } => {
            let scope = target.scope()?;
            if !times.is_blocked(&scope, now).await? {
                eprintln!("{scope} is not blocked");
            }
            times.remove_block(&scope).await?;
            println!("ok");
        }
        BlockAction::List => {
            let blocks = times.active_blocks(now)?;
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
    }
    Ok(())
}
