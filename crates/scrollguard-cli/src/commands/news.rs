use chrono::Utc;
use clap::Subcommand;
use scrollguard_core::{format_time, TimeManager};

use super::{open_times, CommandResult};

#[derive(Subcommand)]
pub enum NewsAction {
    /// Print today's news reading time as JSON
    Status,
    /// Record reading time, blocking news sites once the limit is reached
    Add {
        /// Minutes to add
        minutes: u64,
    },
    /// Clear today's counter
    Reset,
}

pub async fn run(action: NewsAction) -> CommandResult {
    let (_, times) = open_times()?;
    let now = Utc::now();

    match action {
        NewsAction::Status => {
            let usage = times.news_usage(now)?;
            let limit_ms = times.news_daily_limit_ms();
            let left_ms = limit_ms.saturating_sub(usage.total_time_ms);
            let block_ms = times.get_remaining_news_block_time(now).await?;
            let status = serde_json::json!({
                "daily_start": usage.daily_start,
                "total_time_ms": usage.total_time_ms,
                "limit_ms": limit_ms,
                "used": format_time(usage.total_time_ms as i64),
                "left": format_time(left_ms as i64),
                "blocked": block_ms > 0,
                "block_remaining": format_time(block_ms),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        NewsAction::Add { minutes } => {
            let reached = times
                .add_news_time(minutes.saturating_mul(60_000), now)
                .await?;
            if reached && !times.is_news_time_blocked(now).await? {
                times.create_news_time_block(now).await?;
                println!("daily limit reached, news sites blocked");
            } else {
                println!("ok");
            }
        }
        NewsAction::Reset => {
            times.reset_news_usage()?;
            println!("news usage reset");
        }
    }
    Ok(())
}
