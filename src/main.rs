//! Command-line entry point.
//!
//! Two modes: explore/extract an archive (local file or URL), or run the
//! proxy/media relay server with `--serve`.

use anyhow::Result;
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use ziplens::{ArchiveHandle, Cli, Policy, ZipEntry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let policy = Policy::default();

    if cli.serve {
        ziplens::server::serve(cli.bind, policy).await?;
        return Ok(());
    }

    let Some(target) = cli.archive.clone() else {
        anyhow::bail!("no archive given");
    };
    let handle = if cli.is_http_url() {
        ArchiveHandle::open_url(&target, cli.proxy.as_deref(), policy).await?
    } else {
        let data = tokio::fs::read(&target).await?;
        ArchiveHandle::open_bytes(data, policy).await?
    };

    if !cli.is_quiet() {
        for warning in handle.warnings() {
            eprintln!("warning: {warning}");
        }
    }

    if cli.list || cli.verbose {
        list_entries(&handle, cli.verbose);
    } else {
        extract_entries(&handle, &cli).await?;
    }

    if handle.origin_url().is_some() && !cli.is_quiet() {
        eprintln!(
            "\nTotal bytes transferred: {}",
            format_size(handle.bytes_transferred())
        );
    }

    Ok(())
}

/// Print the entry listing, short or verbose.
fn list_entries(handle: &ArchiveHandle, verbose: bool) {
    if !verbose {
        for entry in handle.entries() {
            println!("{}", entry.path);
        }
        return;
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in handle.entries() {
        let m = entry.last_modified;
        let ratio = if entry.uncompressed_size > 0 {
            format!(
                "{:>4}%",
                100 - (entry.compressed_size * 100 / entry.uncompressed_size)
            )
        } else {
            "  0%".to_string()
        };
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio,
            m.year,
            m.month,
            m.day,
            m.hour,
            m.minute,
            entry.path
        );
        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {:>26}  {} files",
        total_uncompressed, total_compressed, "", file_count
    );
}

/// Extract the selected entries (or all files when none are named).
async fn extract_entries(handle: &ArchiveHandle, cli: &Cli) -> Result<()> {
    let selected: Vec<&ZipEntry> = handle
        .entries()
        .iter()
        .filter(|e| !e.is_directory)
        .filter(|e| {
            cli.entries.is_empty()
                || cli
                    .entries
                    .iter()
                    .any(|want| e.path == *want || e.name() == want)
        })
        .collect();

    for entry in selected {
        if cli.pipe {
            let data = handle.extract(&entry.path).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            continue;
        }

        let output_path = match cli.extract_dir.as_deref() {
            Some(dir) => PathBuf::from(dir).join(sanitize_path(&entry.path)),
            None => sanitize_path(&entry.path),
        };

        if output_path.exists() && !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.path);
            }
            continue;
        }

        if !cli.is_quiet() {
            println!("  extracting: {}", entry.path);
        }

        let data = handle.extract(&entry.path).await?;
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::File::create(&output_path).await?;
        file.write_all(&data).await?;
    }

    Ok(())
}

/// Make an archive path safe to write under the output directory:
/// absolute prefixes and `..` segments are dropped.
fn sanitize_path(archive_path: &str) -> PathBuf {
    Path::new(archive_path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_parent_segments() {
        assert_eq!(
            sanitize_path("../../etc/passwd"),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(
            sanitize_path("docs/../../secret.txt"),
            PathBuf::from("docs/secret.txt")
        );
    }

    #[test]
    fn sanitize_strips_absolute_prefixes() {
        assert_eq!(sanitize_path("/etc/passwd"), PathBuf::from("etc/passwd"));
    }

    #[test]
    fn sanitize_keeps_ordinary_paths() {
        assert_eq!(
            sanitize_path("src/deep/nested.rs"),
            PathBuf::from("src/deep/nested.rs")
        );
    }

    #[test]
    fn formats_sizes_by_magnitude() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1_048_576), "1.00 MB");
    }
}
