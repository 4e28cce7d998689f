//! RedisQ queue id command

use crate::cli::args::GlobalOptions;
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::derive_queue_id;

/// Print the queue id the listener would poll with
pub fn queue_id(opts: &GlobalOptions) -> Result<()> {
    let config = Config::load_at(opts.config_ref())?;
    let secret = config.require_queue_secret()?;
    println!("{}", derive_queue_id(secret));
    Ok(())
}
