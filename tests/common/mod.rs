//! Common test utilities for media-dl integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use media_dl::config::FormatConfig;
use media_dl::retrieval::ToolCommand;
use media_dl::{Config, Event, MediaDownloader, RequestId, RequestState, YtDlpRetriever};

/// Shell script that speaks enough of yt-dlp's command line for the downloader
///
/// Behaviour depends on the URL:
/// - `*slow*` sleeps for 30 seconds
/// - `*broken*` prints an error and exits 1
/// - `*helper*` starts a background helper that writes `late.mp4` after a second, then
///   sleeps for 30 seconds
/// - playlist mode writes two entries, then fails on a third (exit 1)
/// - otherwise writes the merged file plus the two unmerged streams
/// - `--dump-json` prints one metadata object
pub const FAKE_YTDLP: &str = r#"#!/bin/sh
template=""
playlist=0
info=0
url=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) template="$2"; shift 2; continue ;;
    -f|--merge-output-format) shift 2; continue ;;
    --yes-playlist) playlist=1 ;;
    --dump-json) info=1 ;;
    --) url="$2"; break ;;
  esac
  shift
done

if [ "$info" = 1 ]; then
  echo '{"id":"fake123","title":"Fake clip","duration":3.5,"extractor":"fake","filesize_approx":2048}'
  exit 0
fi

case "$url" in
  *slow*) sleep 30 ;;
  *broken*) echo "ERROR: [fake] video unavailable" >&2; exit 1 ;;
  *helper*) dir=$(dirname "$template"); (sleep 1; printf x > "$dir/late.mp4") & sleep 30 ;;
esac

out() {
  name=$(printf '%s' "$template" | sed -e "s/%(playlist_index)s/$1/" -e "s/%(title)s/$2/" -e "s/%(ext)s/$3/")
  printf 'fake media payload' > "$name"
}

if [ "$playlist" = 1 ]; then
  out 1 "First" mp4
  out 2 "Second" mp4
  echo "ERROR: [fake] entry 3 unavailable" >&2
  exit 1
fi

out NA "Fake clip" f137.mp4
out NA "Fake clip" f140.m4a
out NA "Fake clip" mp4
"#;

/// Write [`FAKE_YTDLP`] into `dir` and return its path
pub fn write_fake_ytdlp(dir: &Path) -> PathBuf {
    let path = dir.join("fake-yt-dlp");
    std::fs::write(&path, FAKE_YTDLP).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Configuration rooted in `root`, with a one second cooldown
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.timeout = Duration::from_secs(10);
    config.rate_limit.cooldown = Duration::from_secs(1);
    config.tools.search_path = false;
    config
}

/// Downloader running the fake script through `sh`
///
/// Going through the shell avoids executing a file that was just written, which can
/// fail with "text file busy" while other tests fork.
pub fn create_fake_downloader(adjust: impl FnOnce(&mut Config)) -> (MediaDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let script = write_fake_ytdlp(temp_dir.path());

    let mut config = test_config(temp_dir.path());
    adjust(&mut config);
    std::fs::create_dir_all(config.download_dir()).unwrap();

    let command = ToolCommand {
        program: PathBuf::from("sh"),
        prefix_args: vec![script.to_string_lossy().into_owned()],
    };
    let retriever = YtDlpRetriever::with_command(command, FormatConfig::default());
    let downloader = MediaDownloader::with_retriever(config, Arc::new(retriever)).unwrap();
    (downloader, temp_dir)
}

/// Wait until request `id` reports `state`
pub async fn wait_for_state(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: RequestId,
    state: RequestState,
    timeout: Duration,
) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::StateChanged {
                    id: event_id,
                    state: event_state,
                    ..
                }) if event_id == id && event_state == state => return true,
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}
