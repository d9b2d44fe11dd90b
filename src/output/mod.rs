use anyhow::Result;
use std::path::Path;
use std::time::Duration;

use crate::cancel::CancelSignal;
use crate::pipeline::{PartialKey, PipelineError, Reporter};
use crate::provider::VideoInfo;
use crate::utils::format_duration;

/// Render the report for one video
pub fn render_markdown(info: &VideoInfo, transcript: &str) -> String {
    let mut markdown = format!("# {}\n\n", info.title);

    if let Some(cover) = &info.cover_url {
        markdown.push_str(&format!("![cover]({})\n\n", cover));
    }

    markdown.push_str(&format!("- **Author**: {}\n", info.author));
    markdown.push_str(&format!("- **Duration**: {}\n", describe_duration(info.duration)));
    markdown.push_str(&format!("- **Video ID**: {}\n", info.external_id));
    markdown.push_str("\n---\n\n## Transcript\n\n");
    markdown.push_str(transcript.trim());
    markdown.push('\n');

    markdown
}

/// `12.5s`, or `125s (2m 5s)` past a minute
fn describe_duration(seconds: f64) -> String {
    if seconds >= 60.0 {
        format!("{}s ({})", seconds, format_duration(seconds))
    } else {
        format!("{}s", seconds)
    }
}

/// Split into pieces of at most `size` characters
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|chunk| chunk.iter().collect()).collect()
}

/// Stream `markdown` as partial events.
///
/// The first chunk replaces whatever the consumer holds, the rest append.
/// Cancellation is checked before every chunk.
pub async fn stream_markdown(
    markdown: &str,
    chunk_size: usize,
    delay: Duration,
    signal: &CancelSignal,
    reporter: &Reporter,
) -> Result<(), PipelineError> {
    for (position, chunk) in chunk_text(markdown, chunk_size).into_iter().enumerate() {
        signal.checkpoint()?;

        if position > 0 && !delay.is_zero() {
            tokio::select! {
                biased;

                _ = signal.cancelled() => return signal.checkpoint(),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        reporter.partial(PartialKey::Markdown, chunk, position > 0);
    }

    Ok(())
}

/// Save the markdown report to file
pub async fn save_to_file(markdown: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, markdown)?;
    Ok(())
}
