use std::fmt;

//===============
// Path Handling
//===============
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathValidationError {
    ContainsParentDir,
    ContainsSeparator,
    NullByte,
    Empty,
}

impl fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathValidationError::ContainsParentDir => {
                write!(f, "Path contains parent directory (..)")
            }
            PathValidationError::ContainsSeparator => {
                write!(f, "File name contains a path separator")
            }
            PathValidationError::NullByte => write!(f, "Path contains null byte"),
            PathValidationError::Empty => write!(f, "Path is empty"),
        }
    }
}

impl std::error::Error for PathValidationError {}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

// Collapse a client or config supplied path into a backend-relative key.
// Backslashes count as separators, empty and "." segments vanish,
// ".." is refused outright rather than resolved.
// The empty string is the backend root.
pub fn normalize_path(path: &str) -> Result<String, PathValidationError> {
    // rust uses C-style APIs so \0 can end str early
    if path.contains('\0') {
        return Err(PathValidationError::NullByte);
    }

    let mut segments = Vec::new();
    for segment in path.split(is_separator) {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathValidationError::ContainsParentDir),
            other => segments.push(other),
        }
    }

    Ok(segments.join("/"))
}

// Join a directory key and a child name, both normalized.
pub fn join_path(dir: &str, name: &str) -> Result<String, PathValidationError> {
    let dir = normalize_path(dir)?;
    let name = normalize_path(name)?;
    if dir.is_empty() {
        return Ok(name);
    }
    if name.is_empty() {
        return Ok(dir);
    }
    Ok(format!("{dir}/{name}"))
}

// A display name is a single path component: no separators,
// no null bytes, not "." or "..".
pub fn validate_file_name(name: &str) -> Result<(), PathValidationError> {
    if name.is_empty() {
        return Err(PathValidationError::Empty);
    }
    if name.contains('\0') {
        return Err(PathValidationError::NullByte);
    }
    if name.contains(is_separator) {
        return Err(PathValidationError::ContainsSeparator);
    }
    if name == "." || name == ".." {
        return Err(PathValidationError::ContainsParentDir);
    }
    Ok(())
}

// Browsers may send a full client path as the multipart filename.
// Keep only the last component, then validate it.
pub fn sanitize_upload_name(raw: &str) -> Result<String, PathValidationError> {
    let base = raw.rsplit(is_separator).next().unwrap_or(raw).trim();
    validate_file_name(base)?;
    Ok(base.to_string())
}

// Final component of a backend key.
pub fn basename(path: &str) -> &str {
    path.rsplit(is_separator).next().unwrap_or(path)
}
