//! Terminal-based file dialog
//!
//! Prompts on stderr and reads a path from the host's stdin. The client's
//! stdio is the protocol channel, so the host's own terminal is free for this.

use async_trait::async_trait;
use capbridge_core::host::normalize_path;
use capbridge_core::FileDialog;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 3;

pub struct TerminalDialog<R> {
    input: Mutex<Lines<BufReader<R>>>,
    patterns: Vec<glob::Pattern>,
}

impl TerminalDialog<tokio::io::Stdin> {
    pub fn stdin(patterns: Vec<glob::Pattern>) -> Self {
        Self::new(tokio::io::stdin(), patterns)
    }
}

impl<R: AsyncRead + Unpin + Send> TerminalDialog<R> {
    pub fn new(reader: R, patterns: Vec<glob::Pattern>) -> Self {
        Self {
            input: Mutex::new(BufReader::new(reader).lines()),
            patterns,
        }
    }

    fn prompt(&self) -> String {
        if self.patterns.is_empty() {
            "Select a file (empty to cancel): ".to_string()
        } else {
            let filters: Vec<&str> = self.patterns.iter().map(|p| p.as_str()).collect();
            format!("Select a file [{}] (empty to cancel): ", filters.join(", "))
        }
    }

    /// Resolve and vet one answer
    fn check(&self, raw: &str) -> Result<PathBuf, String> {
        let path = normalize_path(Path::new(raw)).map_err(|e| e.to_string())?;
        if !path.is_file() {
            return Err(format!("Not a file: {}", path.display()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.matches(&name)) {
            return Err(format!("{} does not match the dialog filters", name));
        }

        Ok(path)
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> FileDialog for TerminalDialog<R> {
    async fn pick_file(&self) -> capbridge_core::Result<Option<PathBuf>> {
        let mut input = self.input.lock().await;

        for _ in 0..MAX_ATTEMPTS {
            eprint!("{}", self.prompt());
            let Some(line) = input.next_line().await? else {
                debug!("Dialog input closed");
                return Ok(None);
            };

            let raw = line.trim();
            if raw.is_empty() {
                return Ok(None);
            }

            match self.check(raw) {
                Ok(path) => return Ok(Some(path)),
                Err(reason) => eprintln!("{}", reason),
            }
        }

        warn!("No valid selection after {} attempts", MAX_ATTEMPTS);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn vrm_only() -> Vec<glob::Pattern> {
        vec![glob::Pattern::new("*.vrm").unwrap()]
    }

    #[tokio::test]
    async fn test_empty_line_cancels() {
        let dialog = TerminalDialog::new(Cursor::new(b"\n".to_vec()), vrm_only());
        assert_eq!(dialog.pick_file().await.unwrap(), None);
    }

    #[test]
    fn test_closed_input_cancels() {
        let dialog = TerminalDialog::new(Cursor::new(Vec::new()), vrm_only());
        let picked = tokio_test::block_on(dialog.pick_file());
        assert_eq!(tokio_test::assert_ok!(picked), None);
    }

    #[tokio::test]
    async fn test_reprompts_until_valid() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("avatar.vrm");
        let texture = dir.path().join("skin.png");
        std::fs::write(&model, b"glTF").unwrap();
        std::fs::write(&texture, b"png").unwrap();

        let input = format!(
            "{}\n{}\n{}\n",
            dir.path().join("missing.vrm").display(),
            texture.display(),
            model.display()
        );
        let dialog = TerminalDialog::new(Cursor::new(input.into_bytes()), vrm_only());

        let picked = dialog.pick_file().await.unwrap().unwrap();
        assert_eq!(picked, model.canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let input = "/nope/a.vrm\n/nope/b.vrm\n/nope/c.vrm\n/nope/d.vrm\n";
        let dialog = TerminalDialog::new(Cursor::new(input.as_bytes().to_vec()), vrm_only());
        assert_eq!(dialog.pick_file().await.unwrap(), None);
    }

    #[test]
    fn test_prompt_lists_filters() {
        let dialog = TerminalDialog::new(Cursor::new(Vec::new()), vrm_only());
        assert!(dialog.prompt().contains("*.vrm"));
    }
}
