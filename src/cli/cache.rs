//! The `cache` commands.

use console::style;

use super::helpers::confirm;
use crate::config::Settings;
use crate::media::DiskCache;
use crate::utils::format_size;

pub fn cmd_cache_stats(settings: &Settings) -> anyhow::Result<()> {
    let cache = DiskCache::new(&settings.media_cache_dir());
    let stats = cache.stats()?;
    println!("{}", style("Media cache").bold());
    println!("  {:<20} {}", "Location:", cache.dir().display());
    println!("  {:<20} {}", "Files:", stats.files);
    println!("  {:<20} {}", "Size:", format_size(stats.bytes));
    println!("  {:<20} {}", "ID map:", settings.id_map_path().display());
    Ok(())
}

pub fn cmd_cache_clear(settings: &Settings, yes: bool) -> anyhow::Result<()> {
    let cache = DiskCache::new(&settings.media_cache_dir());
    let stats = cache.stats()?;
    if stats.files == 0 {
        println!("{} Cache is already empty", style("✓").green());
        return Ok(());
    }
    if !yes
        && !confirm(&format!(
            "Delete {} cached files ({})?",
            stats.files,
            format_size(stats.bytes)
        ))?
    {
        return Ok(());
    }
    let removed = cache.clear()?;
    println!("{} Removed {} cached files", style("✓").green(), removed);
    Ok(())
}
