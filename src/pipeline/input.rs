//! Input resolution: read a user-supplied path (or `-` for stdin) into a
//! Markdown document.
//!
//! The whole document is needed up front: block spans are byte offsets into
//! it and the segmenter looks at it as a whole. Documents are text, so
//! reading them eagerly is cheap.

use crate::error::Md2ThreadError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A local file.
    File(PathBuf),
    /// Standard input (`-`).
    Stdin,
}

impl InputSource {
    /// `-` means stdin; anything else is a path.
    pub fn parse(input: &str) -> Self {
        if input == "-" {
            InputSource::Stdin
        } else {
            InputSource::File(PathBuf::from(input))
        }
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> String {
        match self {
            InputSource::File(p) => p.display().to_string(),
            InputSource::Stdin => "<stdin>".to_string(),
        }
    }
}

/// Read the document named by `input`.
pub fn read_input(input: &InputSource) -> Result<String, Md2ThreadError> {
    match input {
        InputSource::File(path) => read_markdown_file(path),
        InputSource::Stdin => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .map_err(|source| Md2ThreadError::StdinReadFailed { source })?;
            decode_utf8(bytes, Path::new("<stdin>"))
        }
    }
}

/// Read a local Markdown file, validating existence, permissions and UTF-8.
pub fn read_markdown_file(path: &Path) -> Result<String, Md2ThreadError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Md2ThreadError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(Md2ThreadError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    decode_utf8(bytes, path)
}

fn decode_utf8(bytes: Vec<u8>, path: &Path) -> Result<String, Md2ThreadError> {
    String::from_utf8(bytes).map_err(|e| Md2ThreadError::NotUtf8 {
        path: path.to_path_buf(),
        offset: e.utf8_error().valid_up_to(),
    })
}
