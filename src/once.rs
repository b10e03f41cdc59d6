use std::path::{Path, PathBuf};

use directories::BaseDirs;

/// The once-per-day timestamp file: first line is the DSE serial of the
/// last day the file was processed, the rest is a human comment.  A
/// parse failure reads as day 0, so a torn write is harmless.
pub fn read_once_date(path: &Path) -> i32 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| {
            text.lines().next().and_then(|line| line.trim().parse().ok())
        })
        .unwrap_or(0)
}

pub fn write_once_date(path: &Path, serial: i32) -> std::io::Result<()> {
    let contents = format!(
        "{}\nLast day this reminder file was processed.\n",
        serial
    );
    std::fs::write(path, contents)
}

pub fn default_once_file() -> PathBuf {
    let name = "remindee_once";
    match BaseDirs::new() {
        Some(base_dirs) => base_dirs.data_dir().join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_and_torn_reads() {
        let dir = std::env::temp_dir().join("remindee-once-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("once");
        write_once_date(&path, 14610).unwrap();
        assert_eq!(read_once_date(&path), 14610);
        std::fs::write(&path, "garbage\n").unwrap();
        assert_eq!(read_once_date(&path), 0);
        assert_eq!(read_once_date(&dir.join("absent")), 0);
    }
}
