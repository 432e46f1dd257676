use std::path::Path;
use std::sync::Arc;

use dove_chunked::{
    format_duration, format_size, AllowAll, DoveResult, DownloadConfig, DownloadEvent,
    DownloadOrchestrator, NoBookkeeping, StartRequest,
};

#[tokio::main]
async fn main() -> DoveResult<()> {
    println!("Dove Chunked - Resumable Chunked Downloader Example");

    // Set download URL and destination path
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/wikipedia_en_all.zim".to_string());
    let destination_dir = Path::new("../downloads");

    // Small chunks make the split visible on an ordinary test file
    let config = DownloadConfig::new()
        .with_max_chunk_size(64 * 1024 * 1024)
        .with_split_extension("zim")
        .with_max_attempts(10);

    println!("Start downloading: {}", url);
    println!("Save to: {}", destination_dir.display());

    let orchestrator = DownloadOrchestrator::new(
        config,
        destination_dir,
        Arc::new(AllowAll),
        Arc::new(NoBookkeeping),
    )?;

    for pending in orchestrator.pending_downloads().await? {
        println!(
            "Found interrupted download: {} ({})",
            pending.title,
            format_size(pending.total_size)
        );
    }

    let mut events = orchestrator.subscribe();
    let request = StartRequest::new(url);
    let job_id = request.job_id.clone();
    orchestrator.start(request).await?;

    let start = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, partial files are kept for the next run");
                orchestrator.shutdown().await;
                break;
            }
            event = events.recv() => {
                let Ok(event) = event else { break };
                if event.job_id() != &job_id {
                    continue;
                }
                match event {
                    DownloadEvent::Progress { bytes_downloaded, percent, eta_seconds, .. } => {
                        println!(
                            "Downloaded: {}% ({}), Time remaining: {}",
                            percent,
                            format_size(bytes_downloaded),
                            format_duration(eta_seconds)
                        );
                    }
                    DownloadEvent::Paused { reason, .. } => println!("Paused: {:?}", reason),
                    DownloadEvent::Resumed { .. } => println!("Resumed"),
                    DownloadEvent::Completed { files, .. } => {
                        for file in files {
                            println!("Saved: {}", file.display());
                        }
                        println!("Completed! Time elapsed: {:?}", start.elapsed());
                        break;
                    }
                    DownloadEvent::Cancelled { .. } => break,
                    DownloadEvent::Failed { failure, .. } => {
                        println!("Failed on chunk {}: {}", failure.chunk_index, failure.message);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
