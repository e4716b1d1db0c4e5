use std::fs;
use std::io::Write;
use std::path::Path;

use uuid::Uuid;

pub(crate) const SCRATCH_SUFFIX: &str = ".tmp";

/// Write `content` so readers see either the old file or the new one:
/// temp file in the same directory, fsync, then rename over the target.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("record.json");
    let temp_path = parent.join(format!(
        ".{file_name}.{}{SCRATCH_SUFFIX}",
        Uuid::new_v4()
    ));

    let written = fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(content)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

pub(crate) fn is_scratch_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(SCRATCH_SUFFIX)
}
