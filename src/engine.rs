use std::path::PathBuf;

use chrono::{Datelike, Local, Timelike};
use remindee_script::{date, TimeTrig, Trigger, Value};

use crate::cli::Cli;
use crate::dedupe::DedupeSet;
use crate::err::Error;
use crate::files::{FileState, SourceEvent};
use crate::ifstack::IfStack;
use crate::omit::OmitState;
use crate::once;
use crate::queue::QueueEntry;
use crate::sortbuf::SortBuffer;
use crate::translate::TranslationTable;
use crate::userfns::{FuncStore, UserFunc};
use crate::vars::VarStore;

/// RUN-disabling reasons, a bitmask so a file-scoped reason can't
/// accidentally clear a command-line one.
pub const RUN_CMDLINE: u8 = 1;
pub const RUN_SCRIPT: u8 = 2;
pub const RUN_NOTOWNER: u8 = 4;

/// Debug bitmask, set from `-d` or the DEBUG command.
pub const DB_ECHO_LINE: u8 = 1;
pub const DB_PRTTRIG: u8 = 2;
pub const DB_PRTEXPR: u8 = 4;
pub const DB_TRACE_FILES: u8 = 8;

pub const TRIG_ATTEMPTS: i32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    /// `-n`: print each reminder's next trigger date.
    Next,
    /// `-s[N]`: machine-readable calendar, levels 1..=3.
    SimpleCal { level: u8, months: u32 },
}

/// The tunables behind the `$`-variables.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub max_string_len: Option<usize>,
    pub max_sat_iter: i32,
    pub max_late_minutes: i32,
    pub dedupe_reminders: bool,
    pub form_width: i64,
    pub first_indent: i64,
    pub subs_indent: i64,
    pub end_sent: String,
    pub end_sent_ig: String,
    pub once_file: Option<PathBuf>,
    pub warning_level: i64,
    pub max_recursion_level: i64,
    pub expr_nodes_limit: u64,
    pub expr_time_limit_ms: u64,
    pub default_priority: u32,
    pub default_delta: i32,
    pub default_tdelta: i32,
    pub date_sep: char,
    pub time_sep: char,
    pub dont_fork: bool,
    pub dont_queue: bool,
    pub dont_trig_ats: bool,
    pub ignore_once: bool,
    pub prefix_line_no: bool,
    pub suppress_implicit_warnings: bool,
    pub untimed_first: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_string_len: None,
            max_sat_iter: 1000,
            max_late_minutes: 0,
            dedupe_reminders: false,
            form_width: 72,
            first_indent: 0,
            subs_indent: 0,
            end_sent: ".!?".to_owned(),
            end_sent_ig: "\"')]}".to_owned(),
            once_file: None,
            warning_level: 0,
            max_recursion_level: 10,
            expr_nodes_limit: 10_000_000,
            expr_time_limit_ms: 0,
            default_priority: 5000,
            default_delta: 0,
            default_tdelta: 0,
            date_sep: '-',
            time_sep: ':',
            dont_fork: false,
            dont_queue: false,
            dont_trig_ats: false,
            ignore_once: false,
            prefix_line_no: false,
            suppress_implicit_warnings: false,
            untimed_first: false,
        }
    }
}

/// Fields of the most recently computed trigger, backing `trigdate()`
/// and friends.
#[derive(Debug, Clone)]
pub struct LastTrigger {
    pub trig: Trigger,
    pub tt: TimeTrig,
    pub date: Option<i32>,
    pub time: Option<u16>,
    pub valid: bool,
}

/// One collected calendar entry, for the `-s` modes.
#[derive(Debug, Clone)]
pub struct CalEntry {
    pub date: i32,
    pub passthru: Option<String>,
    pub tags: Vec<String>,
    pub infos: Vec<(String, String)>,
    pub duration: Option<i32>,
    pub time: Option<u16>,
    pub priority: u32,
    pub rawbody: String,
    pub body: String,
    pub calendar_body: Option<String>,
    pub plain_body: String,
    pub nonconst_expr: bool,
    pub if_depth: usize,
}

/// All engine state, threaded through every call.
pub struct Engine {
    pub filename: String,
    pub today: i32,
    pub real_today: i32,
    pub now_min: u16,
    pub mode: OutputMode,
    pub vars: VarStore,
    pub funcs: FuncStore,
    pub omits: OmitState,
    pub ifstack: IfStack,
    pub files: FileState,
    pub translations: TranslationTable,
    pub dedupe: DedupeSet,
    pub sortbuf: SortBuffer,
    pub tunables: Tunables,
    pub queue: Vec<QueueEntry>,
    pub next_qid: u64,
    pub last_trigger: Option<LastTrigger>,
    pub cur_file: String,
    pub cur_line: u32,
    pub cur_line_notowner: bool,
    pub run_disabled: u8,
    pub expr_enabled: bool,
    pub expr_hard_disabled: bool,
    pub nodes_this_line: u64,
    pub expr_deadline: Option<std::time::Instant>,
    pub eval_depth: i64,
    pub nonconst_flag: bool,
    pub last_error: Option<String>,
    pub banner: String,
    pub banner_done: bool,
    pub debug_flags: u8,
    pub num_triggered: u32,
    pub once_date: i32,
    pub saw_once: bool,
    pub json_mode: bool,
    pub test_mode: bool,
    /// When set, triggered reminders are collected instead of printed.
    pub cal_collect: Option<Vec<CalEntry>>,
    /// When set, emitted lines are captured instead of written, for
    /// tests.
    pub capture: Option<Vec<String>>,
}

impl Engine {
    pub fn new(filename: &str) -> Self {
        let now = Local::now();
        let today = date::dse(
            now.year(),
            now.month(),
            now.day(),
        )
        .unwrap_or(0);
        let now_min = (now.hour() * 60 + now.minute()) as u16;
        Self {
            filename: filename.to_owned(),
            today,
            real_today: today,
            now_min,
            mode: OutputMode::Normal,
            vars: VarStore::new(),
            funcs: FuncStore::new(),
            omits: OmitState::new(),
            ifstack: IfStack::new(),
            files: FileState::new(),
            translations: TranslationTable::new(),
            dedupe: DedupeSet::new(),
            sortbuf: SortBuffer::new(),
            tunables: Tunables::default(),
            queue: vec![],
            next_qid: 1,
            last_trigger: None,
            cur_file: String::new(),
            cur_line: 0,
            cur_line_notowner: false,
            run_disabled: 0,
            expr_enabled: true,
            expr_hard_disabled: false,
            nodes_this_line: 0,
            expr_deadline: None,
            eval_depth: 0,
            nonconst_flag: false,
            last_error: None,
            banner: "Reminders for %w, %1 %C, %f:".to_owned(),
            banner_done: false,
            debug_flags: 0,
            num_triggered: 0,
            once_date: 0,
            saw_once: false,
            json_mode: false,
            test_mode: false,
            cal_collect: None,
            capture: None,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, Error> {
        let mut engine = Self::new(&cli.filename);
        if cli.no_run > 0 {
            engine.run_disabled |= RUN_CMDLINE;
        }
        if cli.no_run > 1 {
            engine.expr_enabled = false;
            engine.expr_hard_disabled = true;
        }
        engine.tunables.dont_queue = cli.no_queue;
        engine.tunables.dont_trig_ats = cli.no_ats;
        engine.tunables.dont_fork = cli.dont_fork;
        engine.tunables.ignore_once = cli.ignore_once;
        engine.tunables.prefix_line_no = cli.prefix_line_no;
        engine.test_mode = cli.test_mode;
        engine.json_mode = cli.json;
        for flag in cli.debug.chars() {
            match flag {
                'e' => engine.debug_flags |= DB_ECHO_LINE,
                't' => engine.debug_flags |= DB_PRTTRIG,
                'x' => engine.debug_flags |= DB_PRTEXPR,
                'f' => engine.debug_flags |= DB_TRACE_FILES,
                other => {
                    return Err(Error::BadCommandLineArg(format!(
                        "-d{}",
                        other
                    )))
                }
            }
        }
        if let Some(ref date_arg) = cli.date {
            engine.today = Value::parse_date_str(date_arg)
                .or_else(|| parse_spelled_date(date_arg))
                .ok_or_else(|| {
                    Error::BadCommandLineArg(date_arg.clone())
                })?;
        }
        if let Some(ref time_arg) = cli.time {
            engine.now_min = Value::parse_time_str(time_arg)
                .ok_or_else(|| {
                    Error::BadCommandLineArg(time_arg.clone())
                })?;
        }
        match (cli.next_mode, cli.simple) {
            (true, _) => engine.mode = OutputMode::Next,
            (false, Some(level)) => {
                engine.mode = OutputMode::SimpleCal {
                    level: level.clamp(1, 3),
                    months: cli.months.unwrap_or(1),
                }
            }
            _ => {}
        }
        engine.tunables.once_file = Some(cli.once_file.clone());
        engine.files.sys_dir =
            cli.sys_dir.as_ref().map(PathBuf::from);
        engine.files.trusted_users = cli.trusted_users.clone();
        // Preset variables from -i var=expr.
        for spec in &cli.init_vars {
            let (name, expr_src) =
                spec.split_once('=').ok_or_else(|| {
                    Error::BadCommandLineArg(spec.clone())
                })?;
            let value = engine.eval_str(expr_src.trim())?;
            if let Some(sysname) = name.trim().strip_prefix('$') {
                engine.set_sys_var(sysname, value)?;
            } else {
                engine.vars.set(
                    name.trim(),
                    value,
                    true,
                    "[cmdline]",
                    0,
                )?;
                engine.vars.preserve(name.trim());
            }
        }
        engine.seed_translations_from_env();
        Ok(engine)
    }

    fn seed_translations_from_env(&mut self) {
        let lang = std::env::var("REMINDEE_LANG")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_default();
        if !lang.is_empty() {
            log::debug!("language hint from environment: {}", lang);
        }
    }

    pub fn emit(&mut self, text: &str) {
        match self.cal_collect {
            Some(_) => {}
            None => match self.capture {
                Some(ref mut lines) => lines.push(text.to_owned()),
                None => println!("{}", text),
            },
        }
    }

    pub fn warn(&mut self, msg: &str) {
        let prefix =
            format!("{}({}): {}", self.cur_file, self.cur_line, msg);
        if self.capture.is_some() {
            self.emit(&prefix);
        } else {
            eprintln!("{}", prefix);
        }
    }

    pub fn error(&mut self, err: &Error) {
        let msg = format!("{}", err);
        self.warn(&msg);
    }

    /// Per-iteration init, at the top of each processed day.
    pub fn init_iteration(&mut self) {
        self.vars.clear_unpreserved();
        self.dedupe.clear();
        self.ifstack = IfStack::new();
        self.omits = OmitState::new();
        self.num_triggered = 0;
        self.banner_done = false;
        self.last_trigger = None;
        self.last_error = None;
    }

    /// Process the whole file for the current `today`.  Returns the
    /// EXIT code when the script requested one.
    pub fn run_iteration(&mut self) -> Result<(), Error> {
        self.init_iteration();
        if let Some(ref path) = self.tunables.once_file {
            self.once_date = once::read_once_date(path);
        }
        let filename = self.filename.clone();
        self.files.open_initial(&filename)?;
        loop {
            match self.files.next_event() {
                SourceEvent::Line {
                    file,
                    line_no,
                    text,
                    run_notowner,
                } => {
                    self.cur_file = file;
                    self.cur_line = line_no;
                    self.cur_line_notowner = run_notowner;
                    self.nodes_this_line = 0;
                    self.arm_expr_timer();
                    if self.debug_flags & DB_ECHO_LINE != 0 {
                        self.warn(&text);
                    }
                    match self.process_line(&text) {
                        Ok(()) => {}
                        Err(Error::ExitRequested(code)) => {
                            return Err(Error::ExitRequested(code))
                        }
                        Err(err) => self.error(&err),
                    }
                }
                SourceEvent::PopInclude {
                    file,
                    base_if_depth,
                } => {
                    let leftover = self.ifstack.unwind_to(base_if_depth);
                    if leftover > 0 {
                        self.cur_file = file;
                        self.warn(&format!(
                            "Missing ENDIF ({} unclosed)",
                            leftover
                        ));
                    }
                    if self.debug_flags & DB_TRACE_FILES != 0 {
                        log::debug!("finished {}", self.cur_file);
                    }
                }
                SourceEvent::Eof => break,
            }
        }
        self.flush_sortbuf();
        if self.saw_once {
            if let Some(path) = self.tunables.once_file.clone() {
                if let Err(err) = once::write_once_date(&path, self.today)
                {
                    self.warn(&format!(
                        "Can't update once file {}: {}",
                        path.display(),
                        err
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn flush_sortbuf(&mut self) {
        if !self.sortbuf.is_active() {
            return;
        }
        for entry in self.sortbuf.drain_sorted() {
            self.emit(&entry.body);
        }
    }

    fn arm_expr_timer(&mut self) {
        self.expr_deadline = if self.tunables.expr_time_limit_ms > 0 {
            Some(
                std::time::Instant::now()
                    + std::time::Duration::from_millis(
                        self.tunables.expr_time_limit_ms,
                    ),
            )
        } else {
            None
        };
    }

    /// Dispatch one logical line on its first token.
    pub fn process_line(&mut self, text: &str) -> Result<(), Error> {
        let trimmed = text.trim_start();
        if trimmed.is_empty() {
            return Ok(());
        }
        let (first, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest),
            None => (trimmed, ""),
        };
        let cmd = first.to_ascii_uppercase();
        let active = self.ifstack.active();
        if !active {
            // Inside a false branch only the structural commands and
            // the constness-poisoning ones are interpreted.
            return match cmd.as_str() {
                "IF" => self.do_if(rest, false),
                "IFTRIG" => self.do_iftrig(rest, false),
                "ELSE" => self.ifstack.flip_else(),
                "ENDIF" => self.ifstack.pop(),
                "SET" => {
                    if let Some(name) = first_ident(rest) {
                        self.vars.poison_constness(&name);
                    }
                    Ok(())
                }
                "FSET" => {
                    if let Some(name) = first_ident(rest) {
                        if let Some(f) = self.funcs.get_mut(&name) {
                            f.is_constant = false;
                        }
                    }
                    Ok(())
                }
                _ => Ok(()),
            };
        }
        match cmd.as_str() {
            "REM" => self.do_rem(rest, false),
            "IF" => self.do_if(rest, true),
            "IFTRIG" => self.do_iftrig(rest, true),
            "ELSE" => self.ifstack.flip_else(),
            "ENDIF" => self.ifstack.pop(),
            "INCLUDE" => {
                let depth = self.ifstack.depth();
                self.files.include(rest.trim(), depth)
            }
            "INCLUDER" => {
                let depth = self.ifstack.depth();
                self.files.include_relative(rest.trim(), depth)
            }
            "INCLUDESYS" => {
                let depth = self.ifstack.depth();
                self.files.include_sys(rest.trim(), depth)
            }
            "INCLUDECMD" => {
                if self.run_allowed() {
                    let depth = self.ifstack.depth();
                    self.files.include_cmd(rest.trim(), depth)
                } else {
                    Err(Error::RunDisabled)
                }
            }
            "OMIT" => self.do_omit(rest),
            "PUSH-OMIT-CONTEXT" => {
                self.omits.push();
                Ok(())
            }
            "POP-OMIT-CONTEXT" => self.omits.pop(),
            "CLEAR-OMIT-CONTEXT" => {
                self.omits.clear();
                Ok(())
            }
            "PUSH-VARS" => {
                let names = ident_list(rest);
                if names.is_empty() {
                    self.vars.push_all();
                } else {
                    self.vars.push(&names);
                }
                Ok(())
            }
            "POP-VARS" => self.vars.pop(),
            "PUSH-FUNCS" => {
                let names = ident_list(rest);
                if names.is_empty() {
                    self.funcs.push_all();
                } else {
                    self.funcs.push(&names);
                }
                Ok(())
            }
            "POP-FUNCS" => self.funcs.pop(),
            "SET" => self.do_set(rest),
            "UNSET" => self.do_unset(rest),
            "PRESERVE" => self.do_preserve(rest),
            "FSET" => self.do_fset(rest),
            "FUNSET" => self.do_funset(rest),
            "FRENAME" => self.do_frename(rest),
            "BANNER" => {
                self.banner = rest.to_owned();
                Ok(())
            }
            "DEBUG" => self.do_debug(rest),
            "DUMP" | "DUMPVARS" => self.do_dump(rest),
            "FLUSH" => {
                use std::io::Write;
                let _ = std::io::stdout().flush();
                let _ = std::io::stderr().flush();
                Ok(())
            }
            "EXIT" => {
                let code = rest.trim().parse().unwrap_or(0);
                Err(Error::ExitRequested(code))
            }
            "ERRMSG" => self.do_errmsg(rest),
            "RUN" => self.do_run_toggle(rest),
            "EXPR" => self.do_expr_toggle(rest),
            "TRANSLATE" => self.do_translate(rest),
            _ => {
                // An unknown leading token reads as an implicit REM.
                if !self.tunables.suppress_implicit_warnings {
                    self.warn(&format!(
                        "Unknown command '{}'; assuming REM",
                        first
                    ));
                }
                self.do_rem(trimmed, false)
            }
        }
    }

    pub fn run_allowed(&self) -> bool {
        let mask = self.run_disabled
            | if self.cur_line_notowner {
                RUN_NOTOWNER
            } else {
                0
            };
        mask == 0
    }

    fn do_if(&mut self, rest: &str, evaluate: bool) -> Result<(), Error> {
        if !evaluate {
            return self.ifstack.push(false, true);
        }
        self.nonconst_flag = false;
        let value = self.eval_str(rest.trim())?;
        let constant = !self.nonconst_flag;
        self.ifstack.push(value.is_true(), constant)
    }

    fn do_iftrig(&mut self, rest: &str, evaluate: bool) -> Result<(), Error> {
        if !evaluate {
            return self.ifstack.push(false, true);
        }
        let (mut trig, mut tt, body) = self.parse_rem_clause(rest)?;
        if body.is_some() {
            self.warn("IFTRIG takes no reminder body");
        }
        let base = trig.scanfrom.unwrap_or(self.today);
        let computed = self.compute_trigger(base, &mut trig, &mut tt, true);
        let taken = match computed {
            Ok(Some(d)) => d == self.today,
            Ok(None) => false,
            Err(err) => {
                if !trig.maybe_uncomputable {
                    self.error(&err);
                }
                false
            }
        };
        self.ifstack.push(taken, false)
    }

    fn do_set(&mut self, rest: &str) -> Result<(), Error> {
        let rest = rest.trim_start();
        let name = first_ident(rest)
            .ok_or(Error::Parse(
                remindee_script::ParseError::Expected("variable name"),
            ))?;
        let after = rest[name_span(rest, &name)..].trim_start();
        let after = after.strip_prefix('=').unwrap_or(after).trim_start();
        self.nonconst_flag = false;
        let value = self.eval_bracketed_or_bare(after)?;
        let constant = !self.nonconst_flag;
        if let Some(sysname) = name.strip_prefix('$') {
            return self.set_sys_var(sysname, value);
        }
        let (file, line) = (self.cur_file.clone(), self.cur_line);
        self.vars.set(&name, value, constant, &file, line)
    }

    fn do_unset(&mut self, rest: &str) -> Result<(), Error> {
        for name in ident_list(rest) {
            if !self.vars.unset(&name) {
                let err = Error::UndefinedVariable(name);
                self.error(&err);
            }
        }
        Ok(())
    }

    fn do_preserve(&mut self, rest: &str) -> Result<(), Error> {
        for name in ident_list(rest) {
            if !self.vars.preserve(&name) {
                let err = Error::UndefinedVariable(name);
                self.error(&err);
            }
        }
        Ok(())
    }

    fn do_fset(&mut self, rest: &str) -> Result<(), Error> {
        let rest = rest.trim_start();
        let open = rest.find('(').ok_or(Error::Parse(
            remindee_script::ParseError::Expected("argument list"),
        ))?;
        let name = rest[..open].trim().to_owned();
        if name.is_empty() || !is_ident(&name) {
            return Err(Error::Parse(
                remindee_script::ParseError::BadIdentifier(name),
            ));
        }
        if crate::funcs::is_builtin(&name) {
            return Err(Error::Other(format!(
                "Can't redefine built-in function '{}'",
                name
            )));
        }
        let close = rest[open..].find(')').ok_or(Error::Parse(
            remindee_script::ParseError::Expected(")"),
        ))? + open;
        let args: Vec<String> = rest[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        for arg in &args {
            if !is_ident(arg) {
                return Err(Error::Parse(
                    remindee_script::ParseError::BadIdentifier(
                        arg.clone(),
                    ),
                ));
            }
        }
        let body_src = rest[close + 1..].trim_start();
        let body_src =
            body_src.strip_prefix('=').unwrap_or(body_src).trim_start();
        let body = remindee_script::parse_expr(body_src)?;
        let (file, line) = (self.cur_file.clone(), self.cur_line);
        self.funcs.define(UserFunc {
            name,
            args,
            body,
            is_constant: true,
            filename: file,
            line,
            recursing: false,
        });
        Ok(())
    }

    fn do_funset(&mut self, rest: &str) -> Result<(), Error> {
        for name in ident_list(rest) {
            if !self.funcs.undefine(&name) {
                let err = Error::UndefinedFunction(name);
                self.error(&err);
            }
        }
        Ok(())
    }

    fn do_frename(&mut self, rest: &str) -> Result<(), Error> {
        let names = ident_list(rest);
        match names.as_slice() {
            [old, new] => self.funcs.rename(old, new),
            _ => Err(Error::Parse(
                remindee_script::ParseError::Expected("FRENAME old new"),
            )),
        }
    }

    fn do_omit(&mut self, rest: &str) -> Result<(), Error> {
        let mut day = None;
        let mut month = None;
        let mut year = None;
        let mut wd_mask = date::Weekdays::none();
        for tok in rest.split_whitespace() {
            if let Some(serial) = Value::parse_date_str(tok) {
                let (y, m, d) = date::from_dse(serial);
                year = Some(y);
                month = Some(m);
                day = Some(d);
                continue;
            }
            if let Some(wd) = date::weekday_from_name(tok) {
                wd_mask |= date::Weekdays::from(1u8 << wd);
                continue;
            }
            if let Some(m) = date::month_from_name(tok) {
                month = Some(m);
                continue;
            }
            if let Ok(n) = tok.parse::<i32>() {
                if (1..=31).contains(&n) {
                    day = Some(n as u32);
                } else if n >= 100 {
                    year = Some(n);
                } else {
                    return Err(Error::BadDate);
                }
                continue;
            }
            return Err(Error::BadDate);
        }
        if wd_mask != date::Weekdays::none() {
            self.omits.add_weekdays(wd_mask);
        }
        match (year, month, day) {
            (Some(y), Some(m), Some(d)) => {
                let serial =
                    date::dse(y, m, d).ok_or(Error::BadDate)?;
                self.omits.add_full(serial)
            }
            (None, Some(m), Some(d)) => {
                if d > date::max_days_in_month(m) {
                    return Err(Error::BadDate);
                }
                self.omits.add_partial(m, d)
            }
            (None, None, None)
                if wd_mask != date::Weekdays::none() =>
            {
                Ok(())
            }
            _ => Err(Error::BadDate),
        }
    }

    fn do_debug(&mut self, rest: &str) -> Result<(), Error> {
        let mut enable = true;
        for c in rest.trim().chars() {
            match c {
                '+' => enable = true,
                '-' => enable = false,
                'e' => self.toggle_debug(DB_ECHO_LINE, enable),
                't' => self.toggle_debug(DB_PRTTRIG, enable),
                'x' => self.toggle_debug(DB_PRTEXPR, enable),
                'f' => self.toggle_debug(DB_TRACE_FILES, enable),
                c if c.is_whitespace() => {}
                other => {
                    self.warn(&format!("Unknown debug flag '{}'", other))
                }
            }
        }
        Ok(())
    }

    fn toggle_debug(&mut self, bit: u8, enable: bool) {
        if enable {
            self.debug_flags |= bit;
        } else {
            self.debug_flags &= !bit;
        }
    }

    fn do_dump(&mut self, rest: &str) -> Result<(), Error> {
        let names: Vec<String> = ident_list(rest)
            .into_iter()
            .filter(|n| !n.starts_with('-'))
            .collect();
        let mut lines = vec![];
        if names.is_empty() {
            let mut all: Vec<_> = self
                .vars
                .iter()
                .map(|(name, var)| {
                    format!("{}: {}", name, var.value.canonical())
                })
                .collect();
            all.sort();
            lines.extend(all);
        } else {
            for name in names {
                match self.vars.lookup(&name) {
                    Some(var) => lines.push(format!(
                        "{}: {}",
                        name.to_ascii_lowercase(),
                        var.value.canonical()
                    )),
                    None => {
                        lines.push(format!("{}: *UNDEFINED*", name))
                    }
                }
            }
        }
        for line in lines {
            self.emit(&line);
        }
        Ok(())
    }

    fn do_errmsg(&mut self, rest: &str) -> Result<(), Error> {
        let today = self.today;
        let msg = self.substitute_simple(rest, today)?;
        if self.capture.is_some() {
            self.emit(&msg);
        } else {
            eprintln!("{}", msg);
        }
        Ok(())
    }

    fn do_run_toggle(&mut self, rest: &str) -> Result<(), Error> {
        match rest.trim().to_ascii_uppercase().as_str() {
            "ON" => {
                // Can only re-enable what the script itself disabled.
                self.run_disabled &= !RUN_SCRIPT;
                Ok(())
            }
            "OFF" => {
                self.run_disabled |= RUN_SCRIPT;
                Ok(())
            }
            _ => Err(Error::Parse(
                remindee_script::ParseError::Expected("RUN ON or RUN OFF"),
            )),
        }
    }

    fn do_expr_toggle(&mut self, rest: &str) -> Result<(), Error> {
        match rest.trim().to_ascii_uppercase().as_str() {
            "ON" => {
                if !self.expr_hard_disabled {
                    self.expr_enabled = true;
                }
                Ok(())
            }
            "OFF" => {
                self.expr_enabled = false;
                Ok(())
            }
            _ => Err(Error::Parse(
                remindee_script::ParseError::Expected(
                    "EXPR ON or EXPR OFF",
                ),
            )),
        }
    }

    fn do_translate(&mut self, rest: &str) -> Result<(), Error> {
        let rest = rest.trim();
        if rest.eq_ignore_ascii_case("dump") {
            let text = self.translations.dump_text();
            for line in text.lines() {
                let owned = line.to_owned();
                self.emit(&owned);
            }
            return Ok(());
        }
        if rest.eq_ignore_ascii_case("clear") {
            self.translations.clear();
            return Ok(());
        }
        let strings = quoted_strings(rest);
        match strings.as_slice() {
            [english, translated] => {
                self.translations.set(english, translated);
                Ok(())
            }
            [english] => {
                self.translations.unset(english);
                Ok(())
            }
            _ => Err(Error::Parse(
                remindee_script::ParseError::Expected(
                    "TRANSLATE \"english\" [\"translation\"]",
                ),
            )),
        }
    }

    /// Evaluate either a `[bracketed]` expression or a bare one.
    pub fn eval_bracketed_or_bare(
        &mut self,
        src: &str,
    ) -> Result<Value, Error> {
        let src = src.trim();
        if let Some(inner) = src.strip_prefix('[') {
            let (expr, consumed) =
                remindee_script::parse_expr_spliced(inner)?;
            if !inner[consumed..].trim().is_empty() {
                return Err(Error::Parse(
                    remindee_script::ParseError::TrailingGarbage(
                        inner[consumed..].trim().to_owned(),
                    ),
                ));
            }
            self.eval_expr(&expr, None)
        } else {
            let expr = remindee_script::parse_expr(src)?;
            self.eval_expr(&expr, None)
        }
    }
}

/// A spelled-out command-line date like `Jan 1 2030` or `1 Jan 2030`.
fn parse_spelled_date(arg: &str) -> Option<i32> {
    let mut day = None;
    let mut month = None;
    let mut year = None;
    for tok in arg.split_whitespace() {
        if let Some(m) = date::month_from_name(tok) {
            month = Some(m);
        } else if let Ok(n) = tok.parse::<i32>() {
            if (1..=31).contains(&n) && day.is_none() {
                day = Some(n as u32);
            } else {
                year = Some(n);
            }
        } else {
            return None;
        }
    }
    date::dse(year?, month?, day?)
}

pub fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn first_ident(rest: &str) -> Option<String> {
    let tok = rest.split_whitespace().next()?;
    let tok = tok.split('=').next().unwrap_or(tok).trim();
    if is_ident(tok) {
        Some(tok.to_owned())
    } else {
        None
    }
}

fn name_span(rest: &str, name: &str) -> usize {
    rest.find(name).map(|i| i + name.len()).unwrap_or(0)
}

fn ident_list(rest: &str) -> Vec<String> {
    rest.split_whitespace().map(str::to_owned).collect()
}

/// Pull out double-quoted strings, for TRANSLATE.
fn quoted_strings(rest: &str) -> Vec<String> {
    let mut out = vec![];
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut s = String::new();
        for c in chars.by_ref() {
            if c == '"' {
                break;
            }
            s.push(c);
        }
        out.push(s);
    }
    out
}

#[cfg(test)]
pub fn test_engine() -> Engine {
    let mut engine = Engine::new("test.rem");
    engine.capture = Some(vec![]);
    engine.test_mode = true;
    engine.today = date::dse(2030, 1, 1).unwrap();
    engine.real_today = engine.today;
    engine.now_min = 9 * 60;
    engine
}

#[cfg(test)]
mod test {
    use super::*;

    fn run_lines(engine: &mut Engine, lines: &[&str]) {
        for line in lines {
            engine.nodes_this_line = 0;
            if let Err(err) = engine.process_line(line) {
                let e = err.clone();
                engine.error(&e);
            }
        }
    }

    fn output(engine: &mut Engine) -> Vec<String> {
        engine.capture.take().unwrap_or_default()
    }

    #[test]
    fn set_and_dump() {
        let mut engine = test_engine();
        run_lines(&mut engine, &["SET x = [2+3*4]", "DUMP x"]);
        assert_eq!(output(&mut engine), vec!["x: 14"]);
    }

    #[test]
    fn set_without_equals_or_brackets() {
        let mut engine = test_engine();
        run_lines(&mut engine, &["SET x 40+2", "DUMP x"]);
        assert_eq!(output(&mut engine), vec!["x: 42"]);
    }

    #[test]
    fn if_else_endif() {
        let mut engine = test_engine();
        run_lines(
            &mut engine,
            &[
                "IF 1",
                "SET a = 1",
                "ELSE",
                "SET a = 2",
                "ENDIF",
                "DUMP a",
            ],
        );
        assert_eq!(output(&mut engine), vec!["a: 1"]);
    }

    #[test]
    fn false_branch_skips_non_structural() {
        let mut engine = test_engine();
        run_lines(
            &mut engine,
            &["IF 0", "REM Jan 1 2030 MSG nope", "ENDIF"],
        );
        assert_eq!(output(&mut engine), Vec::<String>::new());
    }

    #[test]
    fn nested_if_in_false_branch_balances() {
        let mut engine = test_engine();
        run_lines(
            &mut engine,
            &[
                "IF 0",
                "IF 1",
                "ELSE",
                "ENDIF",
                "ENDIF",
                "SET ok = 1",
                "DUMP ok",
            ],
        );
        assert_eq!(output(&mut engine), vec!["ok: 1"]);
    }

    #[test]
    fn unset_and_preserve_report_unknowns() {
        let mut engine = test_engine();
        run_lines(&mut engine, &["UNSET nosuch"]);
        let out = output(&mut engine);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("Undefined variable"));
    }

    #[test]
    fn translate_set_and_dump() {
        let mut engine = test_engine();
        run_lines(
            &mut engine,
            &["TRANSLATE \"Monday\" \"lundi\"", "TRANSLATE DUMP"],
        );
        let out = output(&mut engine);
        assert_eq!(out, vec!["TRANSLATE \"Monday\" \"lundi\""]);
    }

    #[test]
    fn run_toggle_respects_cmdline_bit() {
        let mut engine = test_engine();
        engine.run_disabled = RUN_CMDLINE;
        run_lines(&mut engine, &["RUN ON"]);
        assert!(!engine.run_allowed());
        engine.run_disabled = RUN_SCRIPT;
        run_lines(&mut engine, &["RUN ON"]);
        assert!(engine.run_allowed());
    }
}
