pub mod block;
pub mod config;
pub mod news;
pub mod simulate;

use scrollguard_core::{Config, Database, KvTimeManager};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Time manager over the on-disk database, using the saved configuration.
pub fn open_times() -> Result<(Config, KvTimeManager<Database>), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open()?;
    let times = KvTimeManager::from_config(db, &config);
    Ok((config, times))
}
