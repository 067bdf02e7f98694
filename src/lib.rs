//! # media-dl
//!
//! Concurrency-safe media download orchestration for chat-bot front-ends.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Bounded** - A per-requester cooldown and a global admission gate cap the load
//! - **Leak-free** - Every request leaves its directory as it found it, whatever happens
//! - **Library-first** - No bot, no UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to lifecycle events, no polling required
//!
//! yt-dlp does the actual fetching; this crate decides who may run it, how often, with
//! which format ceilings, and what to hand back.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, MediaDownloader, MediaKind, RequesterId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = MediaDownloader::new(Config::from_env()?).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = downloader.request(
//!         RequesterId(42),
//!         "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
//!         MediaKind::Video,
//!     )?;
//!
//!     match downloader.download_single(&request).await {
//!         Ok(artifact) => {
//!             // The file is deleted once the upload finishes, even if it fails
//!             artifact
//!                 .consume(|path| async move { println!("uploading {}", path.display()) })
//!                 .await;
//!         }
//!         Err(e) => println!("{}", e.user_message()),
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded concurrency for retrieval tool runs
pub mod admission;
/// Artifact selection and caller-owned artifact handles
pub mod artifact;
/// Best-effort file and directory removal
pub mod cleanup;
/// Configuration types
pub mod config;
/// Download orchestration (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Per-requester cooldown
pub mod rate_limiter;
/// External retrieval tool integration
pub mod retrieval;
/// Source URL validation and classification
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use admission::{AdmissionGate, AdmissionPermit};
pub use artifact::Artifact;
pub use config::Config;
pub use downloader::MediaDownloader;
pub use error::{DownloadError, Error, Result};
pub use rate_limiter::RateLimiter;
pub use retrieval::{MediaRetriever, RetrievalJob, RetrievalOutcome, YtDlpRetriever};
pub use source::SourcePlatform;
pub use types::{
    ActiveRequest, DownloadRequest, DownloadResult, Event, MediaInfo, MediaKind, RequestId,
    RequestState, RequesterId,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{MediaDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let downloader = MediaDownloader::new(config).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let listen = |kind: SignalKind, name: &'static str| match signal(kind) {
        Ok(stream) => Some((stream, name)),
        Err(e) => {
            tracing::warn!(error = %e, signal = name, "could not register signal handler");
            None
        }
    };

    match (
        listen(SignalKind::terminate(), "SIGTERM"),
        listen(SignalKind::interrupt(), "SIGINT"),
    ) {
        (Some((mut term, _)), Some((mut int, _))) => {
            tokio::select! {
                _ = term.recv() => tracing::info!("Received SIGTERM signal"),
                _ = int.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Some((mut only, name)), None) | (None, Some((mut only, name))) => {
            only.recv().await;
            tracing::info!(signal = name, "Received shutdown signal");
        }
        (None, None) => {
            tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        return;
    }
    tracing::info!("Received Ctrl+C signal");
}
