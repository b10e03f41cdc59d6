use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use crate::err::Error;

pub const INCLUDE_NEST: usize = 9;
pub const DEFAULT_MAX_LINE_LEN: usize = 16384;

/// A cached source file: interned name plus its non-blank non-comment
/// logical lines.  Never mutated after caching.
#[derive(Debug)]
pub struct CachedFile {
    pub name: String,
    pub lines: Vec<(u32, String)>,
    /// Owner wasn't the effective uid or a trusted user; RUN must stay
    /// disabled while lines from this file execute.
    pub run_notowner: bool,
}

#[derive(Debug)]
struct Frame {
    files: Vec<Rc<CachedFile>>,
    file_idx: usize,
    line_idx: usize,
    base_if_depth: usize,
}

/// What the engine gets out of the source on each step.
#[derive(Debug, PartialEq)]
pub enum SourceEvent {
    Line {
        file: String,
        line_no: u32,
        text: String,
        run_notowner: bool,
    },
    /// An include frame finished; the engine re-balances the IF stack
    /// against `base_if_depth`.
    PopInclude {
        file: String,
        base_if_depth: usize,
    },
    Eof,
}

#[derive(Debug, Default)]
pub struct FileState {
    cache: HashMap<String, Rc<CachedFile>>,
    stack: Vec<Frame>,
    pub max_line_len: usize,
    pub sys_dir: Option<PathBuf>,
    pub trusted_users: Vec<u32>,
}

fn effective_uid() -> u32 {
    // SAFETY: geteuid has no failure modes.
    unsafe { libc::geteuid() }
}

impl FileState {
    pub fn new() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            ..Default::default()
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn check_safety(&self, path: &Path) -> Result<bool, Error> {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};
        let meta = std::fs::metadata(path)
            .map_err(|_| Error::CantAccess(path.display().to_string()))?;
        let euid = effective_uid();
        if euid == 0 && meta.uid() != 0 {
            return Err(Error::CantOpen(format!(
                "{}: not owned by root",
                path.display()
            )));
        }
        let ft = meta.file_type();
        let is_device =
            ft.is_char_device() || ft.is_block_device() || ft.is_fifo();
        if meta.mode() & 0o002 != 0 && !is_device {
            return Err(Error::CantOpen(format!(
                "{}: world-writable",
                path.display()
            )));
        }
        let owner_ok = meta.uid() == euid
            || self.trusted_users.contains(&meta.uid());
        Ok(!owner_ok)
    }

    /// Split raw text into cached logical lines: strip blanks and
    /// comments, join backslash continuations, stop at `__EOF__`.
    fn cook(&self, name: &str, raw: &str) -> Result<Vec<(u32, String)>, Error> {
        let mut lines = Vec::new();
        let mut pending: Option<(u32, String)> = None;
        let mut line_no = 0u32;
        for raw_line in raw.lines() {
            line_no += 1;
            let (start_no, mut text) = match pending.take() {
                Some((no, mut acc)) => {
                    acc.push('\n');
                    acc.push_str(raw_line);
                    (no, acc)
                }
                None => (line_no, raw_line.to_owned()),
            };
            if text.len() > self.max_line_len {
                log::error!("{}({}): line too long", name, start_no);
                return Err(Error::LineTooLong);
            }
            if let Some(stripped) = text.strip_suffix('\\') {
                text = stripped.to_owned();
                pending = Some((start_no, text));
                continue;
            }
            let trimmed = text.trim_start();
            if trimmed.is_empty()
                || trimmed.starts_with('#')
                || trimmed.starts_with(';')
            {
                continue;
            }
            if trimmed == "__EOF__" {
                break;
            }
            lines.push((start_no, text));
        }
        if let Some((no, text)) = pending {
            // Trailing continuation: keep what we have.
            let trimmed = text.trim_start();
            if !trimmed.is_empty()
                && !trimmed.starts_with('#')
                && !trimmed.starts_with(';')
                && trimmed != "__EOF__"
            {
                lines.push((no, text));
            }
        }
        Ok(lines)
    }

    fn load_file(&mut self, path: &Path) -> Result<Rc<CachedFile>, Error> {
        let name = path.display().to_string();
        if let Some(cached) = self.cache.get(&name) {
            return Ok(Rc::clone(cached));
        }
        let (raw, run_notowner) = if name == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|_| Error::CantOpen(name.clone()))?;
            (buf, false)
        } else {
            let run_notowner = self.check_safety(path)?;
            let raw = std::fs::read_to_string(path)
                .map_err(|_| Error::CantOpen(name.clone()))?;
            (raw, run_notowner)
        };
        let lines = self.cook(&name, &raw)?;
        let cached = Rc::new(CachedFile {
            name: name.clone(),
            lines,
            run_notowner,
        });
        self.cache.insert(name, Rc::clone(&cached));
        Ok(cached)
    }

    fn load_cmd_output(&mut self, cmd: &str) -> Result<Rc<CachedFile>, Error> {
        let name = format!("|{}", cmd);
        if let Some(cached) = self.cache.get(&name) {
            return Ok(Rc::clone(cached));
        }
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|_| Error::CantOpen(name.clone()))?;
        let raw = String::from_utf8_lossy(&output.stdout).into_owned();
        let lines = self.cook(&name, &raw)?;
        let cached = Rc::new(CachedFile {
            name: name.clone(),
            lines,
            run_notowner: false,
        });
        self.cache.insert(name, Rc::clone(&cached));
        Ok(cached)
    }

    /// Expand a directory include into its `*.rem` members in
    /// lexicographic order.
    fn expand_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|_| Error::CantOpen(dir.display().to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension().map(|e| e == "rem").unwrap_or(false)
                    && p.is_file()
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn push_frame(
        &mut self,
        paths: Vec<PathBuf>,
        base_if_depth: usize,
    ) -> Result<(), Error> {
        if self.stack.len() >= INCLUDE_NEST {
            return Err(Error::NestedIncludeTooDeep);
        }
        let mut files = Vec::with_capacity(paths.len());
        for p in paths {
            files.push(self.load_file(&p)?);
        }
        self.stack.push(Frame {
            files,
            file_idx: 0,
            line_idx: 0,
            base_if_depth,
        });
        Ok(())
    }

    pub fn open_initial(&mut self, path: &str) -> Result<(), Error> {
        self.stack.clear();
        self.include(path, 0)
    }

    pub fn include(
        &mut self,
        path: &str,
        base_if_depth: usize,
    ) -> Result<(), Error> {
        let p = PathBuf::from(path);
        if path != "-" && p.is_dir() {
            let members = self.expand_dir(&p)?;
            self.push_frame(members, base_if_depth)
        } else {
            self.push_frame(vec![p], base_if_depth)
        }
    }

    /// INCLUDER: relative to the directory of the including file.
    pub fn include_relative(
        &mut self,
        path: &str,
        base_if_depth: usize,
    ) -> Result<(), Error> {
        let dir = self
            .current_filename()
            .map(PathBuf::from)
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        self.include(&dir.join(path).display().to_string(), base_if_depth)
    }

    /// INCLUDESYS: relative to the system include directory.
    pub fn include_sys(
        &mut self,
        name: &str,
        base_if_depth: usize,
    ) -> Result<(), Error> {
        let dir = self
            .sys_dir
            .clone()
            .ok_or_else(|| Error::CantOpen(name.to_owned()))?;
        self.include(&dir.join(name).display().to_string(), base_if_depth)
    }

    pub fn include_cmd(
        &mut self,
        cmd: &str,
        base_if_depth: usize,
    ) -> Result<(), Error> {
        if self.stack.len() >= INCLUDE_NEST {
            return Err(Error::NestedIncludeTooDeep);
        }
        let cached = self.load_cmd_output(cmd)?;
        self.stack.push(Frame {
            files: vec![cached],
            file_idx: 0,
            line_idx: 0,
            base_if_depth,
        });
        Ok(())
    }

    pub fn current_filename(&self) -> Option<&str> {
        let frame = self.stack.last()?;
        frame
            .files
            .get(frame.file_idx)
            .map(|f| f.name.as_str())
    }

    pub fn next_event(&mut self) -> SourceEvent {
        loop {
            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => return SourceEvent::Eof,
            };
            match frame.files.get(frame.file_idx) {
                Some(file) => match file.lines.get(frame.line_idx) {
                    Some((line_no, text)) => {
                        let ev = SourceEvent::Line {
                            file: file.name.clone(),
                            line_no: *line_no,
                            text: text.clone(),
                            run_notowner: file.run_notowner,
                        };
                        frame.line_idx += 1;
                        return ev;
                    }
                    None => {
                        frame.file_idx += 1;
                        frame.line_idx = 0;
                    }
                },
                None => {
                    let frame = self.stack.pop().unwrap();
                    let file = frame
                        .files
                        .last()
                        .map(|f| f.name.clone())
                        .unwrap_or_default();
                    return SourceEvent::PopInclude {
                        file,
                        base_if_depth: frame.base_if_depth,
                    };
                }
            }
        }
    }
}
