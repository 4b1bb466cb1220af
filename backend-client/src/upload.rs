use std::path::Path;
use std::path::PathBuf;

use walkdir::DirEntry;
use walkdir::WalkDir;

use crate::backend::UploadFile;
use crate::error::BackendError;
use crate::error::Result;

/// Read a single file for `upload-file`.
pub async fn read_upload_file(path: &Path) -> Result<UploadFile> {
    let contents = tokio::fs::read(path).await.map_err(|source| BackendError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let relative_path = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    Ok(UploadFile {
        relative_path,
        contents,
    })
}

/// Read every regular file below `root` for `upload-folder`. Paths are
/// relative to the parent of `root`, so they start with the folder's own
/// name. Hidden files and directories are skipped.
pub async fn read_upload_folder(root: &Path) -> Result<Vec<UploadFile>> {
    let root = root.to_path_buf();
    let paths = tokio::task::spawn_blocking({
        let root = root.clone();
        move || collect_folder_paths(&root)
    })
    .await
    .map_err(|e| BackendError::Io {
        path: root.clone(),
        source: std::io::Error::other(e),
    })??;

    let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|source| BackendError::Io {
                path: path.clone(),
                source,
            })?;
        files.push(UploadFile {
            relative_path: relative_slash_path(&base, &path),
            contents,
        });
    }
    Ok(files)
}

fn collect_folder_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        let entry = entry.map_err(|e| BackendError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
        })?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn relative_slash_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
