//! Persistence of per-node activity logs.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::message::NodeId;

/// File name of a node's log record inside the output directory.
///
/// Path separators and `%` are percent-encoded, so every node maps to its own
/// file directly under the output directory and distinct ids never share one.
pub fn log_file_name(id: &NodeId) -> String {
    let mut name = String::with_capacity(id.as_str().len() + 4);
    for c in id.as_str().chars() {
        match c {
            '%' => name.push_str("%25"),
            '/' => name.push_str("%2F"),
            '\\' => name.push_str("%5C"),
            ':' => name.push_str("%3A"),
            c => name.push(c),
        }
    }
    name.push_str(".log");
    name
}

/// Writes one `<id>.log` file per node, lines joined by `\n` in append order.
pub(crate) fn write_logs<'a>(
    dir: &Path,
    logs: impl IntoIterator<Item = (&'a NodeId, &'a [String])>,
) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (id, lines) in logs {
        let path = dir.join(log_file_name(id));
        let mut file = io::BufWriter::new(fs::File::create(&path)?);
        file.write_all(lines.join("\n").as_bytes())?;
        file.flush()?;
        tracing::debug!(%id, lines = lines.len(), path = %path.display(), "Wrote node log");
        written.push(path);
    }
    Ok(written)
}
