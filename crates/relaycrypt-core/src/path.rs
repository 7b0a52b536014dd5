//! Validation of relay-supplied relative paths before they touch the disk.

use std::path::{Component, Path, PathBuf};

use crate::error::{TransferError, TransferResult};

fn invalid(path: &str, reason: &str) -> TransferError {
    TransferError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Accept only plain relative paths: no `..`, no root, no drive prefix, no NUL.
pub fn validate_relative_path(path: &str) -> TransferResult<()> {
    if path.is_empty() {
        return Err(invalid(path, "empty"));
    }
    if path.contains('\0') {
        return Err(invalid(path, "contains NUL byte"));
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(invalid(path, "drive prefix"));
    }
    // Normalise Windows separators so `..\x` is caught on every platform
    let normalised = path.replace('\\', "/");
    let mut named = false;
    for component in Path::new(&normalised).components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid(path, "contains parent directory (..)")),
            Component::RootDir => return Err(invalid(path, "absolute path")),
            Component::Prefix(_) => return Err(invalid(path, "platform path prefix")),
        }
    }
    if !named {
        return Err(invalid(path, "names no file"));
    }
    Ok(())
}

/// Join a validated relative path onto `root`.
pub fn resolve_under(root: &Path, relative: &str) -> TransferResult<PathBuf> {
    validate_relative_path(relative)?;
    let mut out = root.to_path_buf();
    for part in relative.split(['/', '\\']).filter(|p| !p.is_empty() && *p != ".") {
        out.push(part);
    }
    Ok(out)
}

/// Final path component, used as the multipart `fileName` field.
pub fn file_name(relative: &str) -> &str {
    relative
        .rsplit(['/', '\\'])
        .find(|p| !p.is_empty())
        .unwrap_or(relative)
}
