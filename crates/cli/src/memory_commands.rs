use std::path::Path;

use {
    anyhow::Result,
    mnemo_memory::{MemoryManager, SearchResult},
};

const SNIPPET_CHARS: usize = 160;

pub async fn index(manager: &MemoryManager, path: &Path) -> Result<()> {
    if path.is_dir() {
        let report = manager.index_directory(path).await?;
        println!(
            "{}: {} updated, {} unchanged, {} removed, {} skipped",
            path.display(),
            report.files_updated,
            report.files_unchanged,
            report.files_removed,
            report.skipped
        );
    } else if manager.index_file(path).await? {
        println!("indexed {}", path.display());
    } else {
        println!("{} unchanged", path.display());
    }
    Ok(())
}

pub async fn sync(manager: &MemoryManager) -> Result<()> {
    let report = manager.sync().await?;
    println!(
        "{} updated, {} unchanged, {} removed, {} skipped",
        report.files_updated, report.files_unchanged, report.files_removed, report.skipped
    );
    Ok(())
}

pub async fn search(manager: &MemoryManager, query: &str, top_k: usize, json: bool) -> Result<()> {
    let results = manager.search(query, top_k).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("no results");
    }
    for (rank, result) in results.iter().enumerate() {
        println!("{}", format_result(rank + 1, result));
    }
    Ok(())
}

pub async fn status(manager: &MemoryManager, json: bool) -> Result<()> {
    let status = manager.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("sources:           {}", status.total_sources);
    println!("chunks:            {}", status.total_chunks);
    println!("cached embeddings: {}", status.cached_embeddings);
    println!("embedding model:   {}", status.embedding_model);
    Ok(())
}

pub async fn prune_cache(manager: &MemoryManager, keep: usize) -> Result<()> {
    let removed = manager.prune_embedding_cache(keep).await?;
    println!("removed {removed} cached embeddings");
    Ok(())
}

#[cfg(feature = "file-watcher")]
pub async fn watch(manager: &MemoryManager) -> Result<()> {
    use mnemo_memory::watcher::{DEFAULT_DEBOUNCE, MemoryFileWatcher};

    let (_watcher, events) =
        MemoryFileWatcher::start(&manager.config().source_dirs, DEFAULT_DEBOUNCE)?;
    sync(manager).await?;

    let task = manager.watch(events);
    tokio::signal::ctrl_c().await?;
    task.abort();
    Ok(())
}

/// Single line of content, cut at a char boundary.
fn snippet(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

fn format_result(rank: usize, result: &SearchResult) -> String {
    format!(
        "{rank}. [{:.3}] {}\n   {}",
        result.score,
        result.source,
        snippet(&result.content, SNIPPET_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\n  b\tc", 10), "a b c");
        assert_eq!(snippet("héllo wörld", 5), "héllo…");
        assert_eq!(snippet("", 5), "");
    }

    #[test]
    fn result_line_format() {
        let result = SearchResult {
            id: "abc".into(),
            source: "notes/a.md".into(),
            content: "My timezone\nis EST".into(),
            updated_at: 1,
            score: 0.76543,
        };
        assert_eq!(
            format_result(1, &result),
            "1. [0.765] notes/a.md\n   My timezone is EST"
        );
    }
}
