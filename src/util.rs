use std::{fs, io, path::Path};

pub fn read_trimmed(path: &Path) -> io::Result<String> {
    let content = fs::read_to_string(path)?;
    log::trace!("read {}: \"\"\"{}\"\"\"", path.display(), content.trim());
    Ok(content.trim().to_string())
}

pub fn write_value(path: &Path, value: &str) -> io::Result<()> {
    log::trace!("write {}: {:?}", path.display(), value);
    fs::write(path, value)
}
