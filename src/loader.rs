use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::LoadError;
use crate::memory::MEMORY_SIZE;

/// Parse a program listing into a memory image.
///
/// One 8-bit binary literal per line, optionally prefixed with `0b`.
/// Anything after `#` is a comment; blank and comment-only lines are
/// skipped. Line numbers in errors are 1-based.
pub fn parse_program(text: &str) -> Result<Vec<u8>, LoadError> {
    let mut image = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let code = raw.split('#').next().unwrap_or("").trim();
        if code.is_empty() {
            continue;
        }
        let digits = code.strip_prefix("0b").unwrap_or(code);
        let byte = u8::from_str_radix(digits, 2).map_err(|_| LoadError::Malformed {
            line: idx + 1,
            text: code.to_string(),
        })?;
        image.push(byte);
    }
    if image.len() > MEMORY_SIZE {
        return Err(LoadError::TooLarge { len: image.len() });
    }
    Ok(image)
}

/// Read and parse a program listing from disk.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<u8>, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let image = parse_program(&text)?;
    debug!(path = %path.display(), bytes = image.len(), "parsed program");
    Ok(image)
}
