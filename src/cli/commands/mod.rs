mod config;
mod embed;
mod pdfs;
mod search;
mod stats;
mod transform;

pub use config::ConfigCommand;
pub use embed::EmbedArgs;
pub use pdfs::MissingPdfsArgs;
pub use search::SearchArgs;
pub use transform::TransformArgs;

pub use config::handle_config;
pub use embed::handle_embed;
pub use pdfs::handle_missing_pdfs;
pub use search::handle_search;
pub use stats::handle_stats;
pub use transform::handle_transform;

use anyhow::{Context, Result};

use crate::models::Config;
use crate::services::Store;

/// Open the configured store for commands that need existing data.
fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.store.path).with_context(|| {
        format!(
            "failed to open store at {} (run `doistore transform` first)",
            config.store.path.display()
        )
    })
}
