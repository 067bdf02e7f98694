//! Media retrieval through an external tool
//!
//! - [`process`] runs one tool invocation with timeout, cancellation and output capture
//! - [`format`] builds the tool's format selectors and arguments
//! - [`traits`] defines the [`MediaRetriever`] seam the downloader depends on
//! - [`ytdlp`] is the yt-dlp implementation

pub mod format;
pub mod process;
pub mod traits;
pub mod ytdlp;

pub use format::{DownloadMode, FormatSelector};
pub use process::{Invocation, RetrievalOutcome, RetrievalProcess};
pub use traits::{MediaRetriever, RetrievalJob};
pub use ytdlp::{ToolCommand, YtDlpRetriever};
