use std::process::Command;

use chrono::{Datelike, Local, TimeZone, Timelike};
use chrono_tz::Tz;
use remindee_script::{date, Expr, Value};

use crate::engine::Engine;
use crate::err::Error;
use crate::eval::Frame;

/// Names understood by [`call_builtin`].  FSET refuses to shadow any of
/// these.
const BUILTIN_NAMES: &[&str] = &[
    "abs",
    "access",
    "asc",
    "catcherr",
    "char",
    "coerce",
    "date",
    "datepart",
    "datetime",
    "day",
    "daysinmon",
    "defined",
    "evaltrig",
    "filedate",
    "filedatetime",
    "filedir",
    "filename",
    "getenv",
    "hour",
    "index",
    "isleap",
    "isomitted",
    "lower",
    "max",
    "min",
    "minute",
    "mon",
    "monnum",
    "multitrig",
    "now",
    "ord",
    "ostype",
    "plural",
    "realnow",
    "realtoday",
    "sgn",
    "shell",
    "shellescape",
    "soleq",
    "strlen",
    "substr",
    "time",
    "timepart",
    "today",
    "trig",
    "trigback",
    "trigdate",
    "trigdatetime",
    "trigdelta",
    "trigduration",
    "trigeventduration",
    "trigeventstart",
    "trigfrom",
    "trigger",
    "triginfo",
    "trigonce",
    "trigpriority",
    "trigrep",
    "trigscanfrom",
    "trigtags",
    "trigtime",
    "trigtimedelta",
    "trigtimerep",
    "triguntil",
    "trigvalid",
    "typeof",
    "tzconvert",
    "upper",
    "value",
    "version",
    "wkday",
    "wkdaynum",
    "year",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES
        .binary_search(&name.to_ascii_lowercase().as_str())
        .is_ok()
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Error> {
    if args.len() < min || args.len() > max {
        Err(Error::WrongArgCount(name.to_owned()))
    } else {
        Ok(())
    }
}

fn want_int(v: &Value) -> Result<i64, Error> {
    match v {
        Value::Int(n) => Ok(*n),
        _ => Err(Error::Value(remindee_script::ValueError::BadType)),
    }
}

fn want_str(v: &Value) -> Result<&str, Error> {
    match v {
        Value::Str(s) => Ok(s),
        _ => Err(Error::Value(remindee_script::ValueError::BadType)),
    }
}

fn want_date(v: &Value) -> Result<i32, Error> {
    match v {
        Value::Date(d) => Ok(*d),
        Value::DateTime(dt) => {
            Ok(dt.div_euclid(date::MINUTES_PER_DAY as i64) as i32)
        }
        _ => Err(Error::Value(remindee_script::ValueError::BadType)),
    }
}

fn want_time(v: &Value) -> Result<u16, Error> {
    match v {
        Value::Time(t) => Ok(*t),
        Value::DateTime(dt) => {
            Ok(dt.rem_euclid(date::MINUTES_PER_DAY as i64) as u16)
        }
        _ => Err(Error::Value(remindee_script::ValueError::BadType)),
    }
}

fn ordinal_suffix(n: i64) -> &'static str {
    let tens = (n.abs() / 10) % 10;
    let units = n.abs() % 10;
    if tens == 1 {
        "th"
    } else {
        match units {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    }
}

pub fn ordinal(n: i64) -> String {
    format!("{}{}", n, ordinal_suffix(n))
}

/// The AST-receiving built-ins that must short-circuit or introspect
/// rather than receive evaluated arguments.  Returns `Ok(None)` when
/// `name` isn't one of them.
pub fn call_special(
    engine: &mut Engine,
    name: &str,
    args: &[Expr],
    locals: Option<&Frame>,
) -> Result<Option<Value>, Error> {
    match name {
        "iif" => {
            if args.len() < 2 {
                return Err(Error::WrongArgCount(name.to_owned()));
            }
            // Condition/value pairs, with an optional trailing default.
            let mut i = 0;
            while i + 1 < args.len() {
                let cond = engine.eval_node(&args[i], locals)?;
                if cond.is_true() {
                    return engine.eval_node(&args[i + 1], locals).map(Some);
                }
                i += 2;
            }
            if i < args.len() {
                engine.eval_node(&args[i], locals).map(Some)
            } else {
                Ok(Some(Value::Int(0)))
            }
        }
        "choose" => {
            if args.len() < 2 {
                return Err(Error::WrongArgCount(name.to_owned()));
            }
            let n = want_int(&engine.eval_node(&args[0], locals)?)?;
            if n < 1 || n as usize >= args.len() {
                return Err(Error::Other(format!(
                    "choose() index {} out of range",
                    n
                )));
            }
            engine.eval_node(&args[n as usize], locals).map(Some)
        }
        "isany" => {
            if args.is_empty() {
                return Err(Error::WrongArgCount(name.to_owned()));
            }
            let needle = engine.eval_node(&args[0], locals)?;
            for candidate in &args[1..] {
                let v = engine.eval_node(candidate, locals)?;
                if needle
                    .compare(&v)
                    .map(|o| o == std::cmp::Ordering::Equal)
                    .unwrap_or(false)
                {
                    return Ok(Some(Value::Int(1)));
                }
            }
            Ok(Some(Value::Int(0)))
        }
        "isconst" => {
            if args.len() != 1 {
                return Err(Error::WrongArgCount(name.to_owned()));
            }
            let saved = engine.nonconst_flag;
            engine.nonconst_flag = false;
            let result = engine.eval_node(&args[0], locals);
            let constant = !engine.nonconst_flag;
            engine.nonconst_flag = saved || engine.nonconst_flag;
            result?;
            Ok(Some(Value::Int(constant as i64)))
        }
        "catch" => {
            if args.len() != 2 {
                return Err(Error::WrongArgCount(name.to_owned()));
            }
            match engine.eval_node(&args[0], locals) {
                Ok(v) => Ok(Some(v)),
                Err(Error::ExitRequested(code)) => {
                    Err(Error::ExitRequested(code))
                }
                Err(err) => {
                    engine.last_error = Some(format!("{}", err));
                    engine.eval_node(&args[1], locals).map(Some)
                }
            }
        }
        _ => Ok(None),
    }
}

pub fn call_builtin(
    engine: &mut Engine,
    name: &str,
    args: &[Value],
) -> Result<Value, Error> {
    match name {
        "abs" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(want_int(&args[0])?.saturating_abs()))
        }
        "sgn" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(want_int(&args[0])?.signum()))
        }
        "max" | "min" => {
            arity(name, args, 1, usize::MAX)?;
            let mut best = args[0].clone();
            for v in &args[1..] {
                let ord = v.compare(&best)?;
                let better = if name == "max" {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord == std::cmp::Ordering::Less
                };
                if better {
                    best = v.clone();
                }
            }
            Ok(best)
        }
        "asc" => {
            arity(name, args, 1, 1)?;
            let s = want_str(&args[0])?;
            Ok(Value::Int(
                s.chars().next().map(|c| c as i64).unwrap_or(0),
            ))
        }
        "char" => {
            arity(name, args, 1, usize::MAX)?;
            let mut out = String::new();
            for v in args {
                let code = want_int(v)?;
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(Error::Value(
                        remindee_script::ValueError::BadType,
                    ))?;
                out.push(c);
            }
            Ok(Value::Str(out))
        }
        "coerce" => {
            arity(name, args, 2, 2)?;
            let target = want_str(&args[0])?.to_ascii_uppercase();
            let target: &'static str = match target.as_str() {
                "INT" => "INT",
                "STRING" => "STRING",
                "DATE" => "DATE",
                "TIME" => "TIME",
                "DATETIME" => "DATETIME",
                _ => {
                    return Err(Error::Value(
                        remindee_script::ValueError::BadType,
                    ))
                }
            };
            Ok(args[1].coerce_to(target)?)
        }
        "typeof" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Str(args[0].type_name().to_owned()))
        }
        "date" => {
            arity(name, args, 3, 3)?;
            let y = want_int(&args[0])? as i32;
            let m = want_int(&args[1])? as u32;
            let d = want_int(&args[2])? as u32;
            date::dse(y, m, d).map(Value::Date).ok_or(Error::BadDate)
        }
        "time" => {
            arity(name, args, 2, 2)?;
            let h = want_int(&args[0])?;
            let m = want_int(&args[1])?;
            if (0..24).contains(&h) && (0..60).contains(&m) {
                Ok(Value::Time((h * 60 + m) as u16))
            } else {
                Err(Error::Value(
                    remindee_script::ValueError::BadType,
                ))
            }
        }
        "datetime" => match args.len() {
            2 => {
                let d = want_date(&args[0])?;
                let t = want_time(&args[1])?;
                Ok(Value::DateTime(
                    d as i64 * date::MINUTES_PER_DAY as i64 + t as i64,
                ))
            }
            5 => {
                let y = want_int(&args[0])? as i32;
                let mo = want_int(&args[1])? as u32;
                let d = want_int(&args[2])? as u32;
                let h = want_int(&args[3])?;
                let mi = want_int(&args[4])?;
                let serial =
                    date::dse(y, mo, d).ok_or(Error::BadDate)?;
                if !(0..24).contains(&h) || !(0..60).contains(&mi) {
                    return Err(Error::Value(
                        remindee_script::ValueError::BadType,
                    ));
                }
                Ok(Value::DateTime(
                    serial as i64 * date::MINUTES_PER_DAY as i64
                        + (h * 60 + mi),
                ))
            }
            _ => Err(Error::WrongArgCount(name.to_owned())),
        },
        "datepart" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Date(want_date(&args[0])?))
        }
        "timepart" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Time(want_time(&args[0])?))
        }
        "year" => {
            arity(name, args, 1, 1)?;
            let (y, _, _) = date::from_dse(want_date(&args[0])?);
            Ok(Value::Int(y as i64))
        }
        "monnum" => {
            arity(name, args, 1, 1)?;
            let (_, m, _) = date::from_dse(want_date(&args[0])?);
            Ok(Value::Int(m as i64))
        }
        "day" => {
            arity(name, args, 1, 1)?;
            let (_, _, d) = date::from_dse(want_date(&args[0])?);
            Ok(Value::Int(d as i64))
        }
        "mon" => {
            arity(name, args, 1, 1)?;
            let m = match args[0] {
                Value::Int(n) if (1..=12).contains(&n) => n as u32,
                ref v => {
                    let (_, m, _) = date::from_dse(want_date(v)?);
                    m
                }
            };
            let translated =
                engine.translations.tr(date::month_name(m)).to_owned();
            Ok(Value::Str(translated))
        }
        "wkday" => {
            arity(name, args, 1, 1)?;
            let idx = match args[0] {
                Value::Int(n) if (0..=6).contains(&n) => {
                    // 0 = Sunday in the user-visible numbering.
                    ((n + 6) % 7) as usize
                }
                ref v => {
                    let serial = want_date(v)?;
                    date::monday_index(serial) as usize
                }
            };
            let translated = engine
                .translations
                .tr(date::DAY_NAMES[idx])
                .to_owned();
            Ok(Value::Str(translated))
        }
        "wkdaynum" => {
            arity(name, args, 1, 1)?;
            let serial = want_date(&args[0])?;
            Ok(Value::Int(date::weekday(serial) as i64))
        }
        "hour" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int((want_time(&args[0])? / 60) as i64))
        }
        "minute" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int((want_time(&args[0])? % 60) as i64))
        }
        "daysinmon" => {
            arity(name, args, 2, 2)?;
            let m = want_int(&args[0])? as u32;
            let y = want_int(&args[1])? as i32;
            if !(1..=12).contains(&m) {
                return Err(Error::BadDate);
            }
            Ok(Value::Int(date::days_in_month(m, y) as i64))
        }
        "isleap" => {
            arity(name, args, 1, 1)?;
            let y = match args[0] {
                Value::Int(n) => n as i32,
                ref v => date::from_dse(want_date(v)?).0,
            };
            Ok(Value::Int(date::is_leap_year(y) as i64))
        }
        "today" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            Ok(Value::Date(engine.today))
        }
        "now" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            Ok(Value::Time(engine.now_min))
        }
        "realtoday" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            Ok(Value::Date(engine.real_today))
        }
        "realnow" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            let now = Local::now();
            Ok(Value::Time((now.hour() * 60 + now.minute()) as u16))
        }
        "strlen" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(want_str(&args[0])?.chars().count() as i64))
        }
        "upper" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Str(want_str(&args[0])?.to_uppercase()))
        }
        "lower" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Str(want_str(&args[0])?.to_lowercase()))
        }
        "substr" => {
            arity(name, args, 2, 3)?;
            let s = want_str(&args[0])?;
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let start = want_int(&args[1])?.max(1);
            let end = if args.len() == 3 {
                want_int(&args[2])?.min(len)
            } else {
                len
            };
            if start > end || start > len {
                return Ok(Value::Str(String::new()));
            }
            Ok(Value::Str(
                chars[(start - 1) as usize..end as usize]
                    .iter()
                    .collect(),
            ))
        }
        "index" => {
            arity(name, args, 2, 3)?;
            let haystack = want_str(&args[0])?;
            let needle = want_str(&args[1])?;
            let start = if args.len() == 3 {
                (want_int(&args[2])?.max(1) - 1) as usize
            } else {
                0
            };
            let hay: Vec<char> = haystack.chars().collect();
            if start > hay.len() {
                return Ok(Value::Int(0));
            }
            let tail: String = hay[start..].iter().collect();
            match tail.find(needle) {
                Some(byte_pos) => {
                    let char_pos = tail[..byte_pos].chars().count();
                    Ok(Value::Int((start + char_pos + 1) as i64))
                }
                None => Ok(Value::Int(0)),
            }
        }
        "ord" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Str(ordinal(want_int(&args[0])?)))
        }
        "plural" => {
            arity(name, args, 1, 3)?;
            let n = want_int(&args[0])?;
            match args.len() {
                1 => Ok(Value::Str(
                    if n == 1 { "" } else { "s" }.to_owned(),
                )),
                2 => {
                    let s = want_str(&args[1])?;
                    Ok(Value::Str(if n == 1 {
                        s.to_owned()
                    } else {
                        format!("{}s", s)
                    }))
                }
                _ => {
                    let singular = want_str(&args[1])?;
                    let plural = want_str(&args[2])?;
                    Ok(Value::Str(
                        if n == 1 { singular } else { plural }.to_owned(),
                    ))
                }
            }
        }
        "ostype" => {
            arity(name, args, 0, 0)?;
            Ok(Value::Str("UNIX".to_owned()))
        }
        "version" => {
            arity(name, args, 0, 0)?;
            Ok(Value::Str(env!("CARGO_PKG_VERSION").to_owned()))
        }
        "getenv" => {
            arity(name, args, 1, 1)?;
            engine.nonconst_flag = true;
            Ok(Value::Str(
                std::env::var(want_str(&args[0])?).unwrap_or_default(),
            ))
        }
        "defined" => {
            arity(name, args, 1, 1)?;
            engine.nonconst_flag = true;
            let name_arg = want_str(&args[0])?;
            Ok(Value::Int(
                engine.vars.lookup(name_arg).is_some() as i64,
            ))
        }
        "value" => {
            arity(name, args, 1, 2)?;
            engine.nonconst_flag = true;
            let name_arg = want_str(&args[0])?.to_owned();
            match engine.vars.get(&name_arg) {
                Some(v) => Ok(v.clone()),
                None if args.len() == 2 => Ok(args[1].clone()),
                None => Err(Error::UndefinedVariable(name_arg)),
            }
        }
        "filename" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            Ok(Value::Str(engine.cur_file.clone()))
        }
        "filedir" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            let dir = std::path::Path::new(&engine.cur_file)
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_owned());
            Ok(Value::Str(if dir.is_empty() {
                ".".to_owned()
            } else {
                dir
            }))
        }
        "filedate" | "filedatetime" => {
            arity(name, args, 1, 1)?;
            engine.nonconst_flag = true;
            let path = want_str(&args[0])?;
            let mtime = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok();
            let dt = match mtime {
                Some(t) => {
                    let local: chrono::DateTime<Local> = t.into();
                    let serial = date::dse(
                        local.year(),
                        local.month(),
                        local.day(),
                    )
                    .unwrap_or(0);
                    serial as i64 * date::MINUTES_PER_DAY as i64
                        + (local.hour() * 60 + local.minute()) as i64
                }
                None => 0,
            };
            if name == "filedate" {
                Ok(Value::Date(
                    dt.div_euclid(date::MINUTES_PER_DAY as i64) as i32,
                ))
            } else {
                Ok(Value::DateTime(dt))
            }
        }
        "access" => {
            arity(name, args, 2, 2)?;
            engine.nonconst_flag = true;
            let path = want_str(&args[0])?;
            let mode = match args[1] {
                Value::Int(n) => n as i32,
                ref v => {
                    let mut m = 0;
                    for c in want_str(v)?.chars() {
                        m |= match c {
                            'r' => libc::R_OK,
                            'w' => libc::W_OK,
                            'x' => libc::X_OK,
                            'f' => libc::F_OK,
                            _ => {
                                return Err(Error::Value(
                                    remindee_script::ValueError::BadType,
                                ))
                            }
                        };
                    }
                    m
                }
            };
            let cpath = std::ffi::CString::new(path)
                .map_err(|_| Error::CantAccess(path.to_owned()))?;
            // SAFETY: cpath is a valid NUL-terminated string.
            let rc = unsafe { libc::access(cpath.as_ptr(), mode) };
            Ok(Value::Int(if rc == 0 { 0 } else { -1 }))
        }
        "shell" => {
            arity(name, args, 1, 2)?;
            engine.nonconst_flag = true;
            if !engine.run_allowed() {
                return Err(Error::RunDisabled);
            }
            let cmd = want_str(&args[0])?;
            let max_len = if args.len() == 2 {
                Some(want_int(&args[1])?.max(0) as usize)
            } else {
                engine.tunables.max_string_len
            };
            let output = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .output()
                .map_err(|_| {
                    Error::Other(format!("Can't run '{}'", cmd))
                })?;
            let mut text = String::from_utf8_lossy(&output.stdout)
                .replace(['\n', '\r'], " ");
            while text.ends_with(' ') {
                text.pop();
            }
            if let Some(max) = max_len {
                if text.len() > max {
                    text.truncate(max);
                }
            }
            Ok(Value::Str(text))
        }
        "shellescape" => {
            arity(name, args, 1, 1)?;
            let s = want_str(&args[0])?;
            Ok(Value::Str(format!(
                "'{}'",
                s.replace('\'', "'\\''")
            )))
        }
        "isomitted" => {
            arity(name, args, 1, 1)?;
            engine.nonconst_flag = true;
            let serial = want_date(&args[0])?;
            Ok(Value::Int(engine.omits.is_omitted(
                serial,
                date::Weekdays::none(),
            ) as i64))
        }
        "tzconvert" => {
            arity(name, args, 2, 3)?;
            engine.nonconst_flag = true;
            let dt = match args[0] {
                Value::DateTime(dt) => dt,
                _ => {
                    return Err(Error::Value(
                        remindee_script::ValueError::BadType,
                    ))
                }
            };
            let from: Tz = want_str(&args[1])?.parse().map_err(|_| {
                Error::TimezoneConversion(
                    want_str(&args[1]).unwrap_or("?").to_owned(),
                )
            })?;
            let naive = naive_from_datetime(dt)?;
            let zoned = from
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| {
                    Error::TimezoneConversion(from.to_string())
                })?;
            let out_naive = if args.len() == 3 {
                let to: Tz =
                    want_str(&args[2])?.parse().map_err(|_| {
                        Error::TimezoneConversion(
                            want_str(&args[2]).unwrap_or("?").to_owned(),
                        )
                    })?;
                zoned.with_timezone(&to).naive_local()
            } else {
                zoned.with_timezone(&Local).naive_local()
            };
            datetime_from_naive(out_naive)
        }
        "soleq" => {
            arity(name, args, 1, 2)?;
            let which = want_int(&args[0])?;
            if !(0..=3).contains(&which) {
                return Err(Error::Value(
                    remindee_script::ValueError::BadType,
                ));
            }
            let reference = if args.len() == 2 {
                match args[1] {
                    Value::Date(d) => {
                        d as i64 * date::MINUTES_PER_DAY as i64
                    }
                    Value::DateTime(dt) => dt,
                    _ => {
                        return Err(Error::Value(
                            remindee_script::ValueError::BadType,
                        ))
                    }
                }
            } else {
                engine.nonconst_flag = true;
                engine.today as i64 * date::MINUTES_PER_DAY as i64
            };
            Ok(Value::DateTime(next_solstice_equinox(
                which as usize,
                reference,
            )))
        }
        "trigvalid" => {
            arity(name, args, 0, 0)?;
            engine.nonconst_flag = true;
            Ok(Value::Int(
                engine
                    .last_trigger
                    .as_ref()
                    .map(|lt| lt.valid)
                    .unwrap_or(false) as i64,
            ))
        }
        "trigdate" | "trigtime" | "trigdatetime" | "trigback"
        | "trigdelta" | "trigrep" | "trigtimedelta" | "trigtimerep"
        | "trigduration" | "trigeventstart" | "trigeventduration"
        | "trigpriority" | "trigonce" | "trigtags" | "trigfrom"
        | "trigscanfrom" | "triguntil" | "trigger" | "triginfo" => {
            trigger_accessor(engine, name, args)
        }
        "evaltrig" => {
            arity(name, args, 1, 2)?;
            engine.nonconst_flag = true;
            let src = want_str(&args[0])?.to_owned();
            let start = if args.len() == 2 {
                want_date(&args[1])?
            } else {
                engine.today
            };
            engine.evaltrig(&src, start)
        }
        "trig" => {
            arity(name, args, 1, usize::MAX)?;
            engine.nonconst_flag = true;
            let spec = args
                .iter()
                .map(Value::plain_string)
                .collect::<Vec<_>>()
                .join(" ");
            let today = engine.today;
            engine.evaltrig(&spec, today)
        }
        "multitrig" => {
            arity(name, args, 1, usize::MAX)?;
            engine.nonconst_flag = true;
            let mut best: Option<i32> = None;
            for v in args {
                let spec = want_str(v)?.to_owned();
                let today = engine.today;
                if let Value::Date(d) = engine.evaltrig(&spec, today)? {
                    best = Some(match best {
                        Some(b) => b.min(d),
                        None => d,
                    });
                }
            }
            best.map(Value::Date).ok_or(Error::CantComputeTrigger)
        }
        "catcherr" => {
            arity(name, args, 0, 0)?;
            Ok(Value::Str(
                engine.last_error.clone().unwrap_or_default(),
            ))
        }
        _ => Err(Error::UndefinedFunction(name.to_owned())),
    }
}

fn trigger_accessor(
    engine: &mut Engine,
    name: &str,
    args: &[Value],
) -> Result<Value, Error> {
    engine.nonconst_flag = true;
    if name == "triginfo" {
        arity(name, args, 1, 1)?;
    } else {
        arity(name, args, 0, 0)?;
    }
    let lt = engine
        .last_trigger
        .as_ref()
        .ok_or(Error::CantComputeTrigger)?;
    let out = match name {
        "trigdate" => {
            Value::Date(lt.date.ok_or(Error::CantComputeTrigger)?)
        }
        "trigtime" => match lt.time {
            Some(t) => Value::Time(t),
            None => Value::Int(0),
        },
        "trigdatetime" => {
            let d = lt.date.ok_or(Error::CantComputeTrigger)?;
            let t = lt.time.unwrap_or(0);
            Value::DateTime(
                d as i64 * date::MINUTES_PER_DAY as i64 + t as i64,
            )
        }
        "trigback" => Value::Int(lt.trig.back.unwrap_or(0) as i64),
        "trigdelta" => Value::Int(lt.trig.delta.unwrap_or(0) as i64),
        "trigrep" => Value::Int(lt.trig.rep.unwrap_or(0) as i64),
        "trigtimedelta" => Value::Int(lt.tt.delta.unwrap_or(0) as i64),
        "trigtimerep" => Value::Int(lt.tt.rep.unwrap_or(0) as i64),
        "trigduration" => Value::Int(lt.tt.duration.unwrap_or(0) as i64),
        "trigeventstart" => match lt.trig.eventstart {
            Some(dt) => Value::DateTime(dt),
            None => Value::Int(0),
        },
        "trigeventduration" => {
            Value::Int(lt.trig.eventduration.unwrap_or(0) as i64)
        }
        "trigpriority" => Value::Int(lt.trig.priority as i64),
        "trigonce" => Value::Int(lt.trig.once as i64),
        "trigtags" => Value::Str(lt.trig.tags.join(",")),
        "trigfrom" => match lt.trig.from {
            Some(d) => Value::Date(d),
            None => Value::Int(0),
        },
        "trigscanfrom" => match lt.trig.scanfrom {
            Some(d) => Value::Date(d),
            None => Value::Int(0),
        },
        "triguntil" => match lt.trig.until {
            Some(d) => Value::Date(d),
            None => Value::Int(0),
        },
        "trigger" => {
            let d = lt.date.ok_or(Error::CantComputeTrigger)?;
            let base = Value::Date(d).plain_string();
            match lt.time {
                Some(t) => Value::Str(format!(
                    "{} AT {}",
                    base,
                    Value::Time(t).plain_string()
                )),
                None => Value::Str(base),
            }
        }
        "triginfo" => {
            let header = want_str(&args[0])?.to_ascii_lowercase();
            let found = lt
                .trig
                .infos
                .iter()
                .find(|(h, _)| h.to_ascii_lowercase() == header)
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            Value::Str(found)
        }
        _ => unreachable!(),
    };
    Ok(out)
}

fn naive_from_datetime(dt: i64) -> Result<chrono::NaiveDateTime, Error> {
    let serial = dt.div_euclid(date::MINUTES_PER_DAY as i64) as i32;
    let minute = dt.rem_euclid(date::MINUTES_PER_DAY as i64) as u32;
    let (y, m, d) = date::from_dse(serial);
    chrono::NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|nd| nd.and_hms_opt(minute / 60, minute % 60, 0))
        .ok_or(Error::DateOutOfRange)
}

fn datetime_from_naive(
    naive: chrono::NaiveDateTime,
) -> Result<Value, Error> {
    let serial =
        date::dse(naive.year(), naive.month(), naive.day())
            .ok_or(Error::DateOutOfRange)?;
    Ok(Value::DateTime(
        serial as i64 * date::MINUTES_PER_DAY as i64
            + (naive.hour() * 60 + naive.minute()) as i64,
    ))
}

/// Julian day of the epoch serial 0 at midnight UTC.
const EPOCH_JD: f64 = 2447892.5;

/// Mean-event polynomials and periodic corrections for the solstices
/// and equinoxes (March, June, September, December).
fn next_solstice_equinox(which: usize, reference: i64) -> i64 {
    let (ref_year, _, _) = date::from_dse(
        reference.div_euclid(date::MINUTES_PER_DAY as i64) as i32,
    );
    let mut year = ref_year;
    loop {
        let dt = solstice_equinox_datetime(which, year);
        if dt > reference {
            return dt;
        }
        year += 1;
    }
}

fn solstice_equinox_datetime(which: usize, year: i32) -> i64 {
    const MEAN: [[f64; 5]; 4] = [
        [2451623.80984, 365242.37404, 0.05169, -0.00411, -0.00057],
        [2451716.56767, 365241.62603, 0.00325, 0.00888, -0.00030],
        [2451810.21715, 365242.01767, -0.11575, 0.00337, 0.00078],
        [2451900.05952, 365242.74049, -0.06223, -0.00823, 0.00032],
    ];
    const TERMS: [(f64, f64, f64); 24] = [
        (485.0, 324.96, 1934.136),
        (203.0, 337.23, 32964.467),
        (199.0, 342.08, 20.186),
        (182.0, 27.85, 445267.112),
        (156.0, 73.14, 45036.886),
        (136.0, 171.52, 22518.443),
        (77.0, 222.54, 65928.934),
        (74.0, 296.72, 3034.906),
        (70.0, 243.58, 9037.513),
        (58.0, 119.81, 33718.147),
        (52.0, 297.17, 150.678),
        (50.0, 21.02, 2281.226),
        (45.0, 247.54, 29929.562),
        (44.0, 325.15, 31555.956),
        (29.0, 60.93, 4443.417),
        (18.0, 155.12, 67555.328),
        (17.0, 109.57, 4562.452),
        (16.0, 227.73, 62894.029),
        (14.0, 59.28, 31436.921),
        (12.0, 65.09, 14577.848),
        (12.0, 171.03, 31931.756),
        (12.0, 253.56, 60177.521),
        (9.0, 90.55, 25558.212),
        (8.0, 15.45, 71930.506),
    ];
    let y = (year as f64 - 2000.0) / 1000.0;
    let c = &MEAN[which];
    let jde0 =
        c[0] + c[1] * y + c[2] * y * y + c[3] * y * y * y
            + c[4] * y * y * y * y;
    let t = (jde0 - 2451545.0) / 36525.0;
    let w = (35999.373 * t - 2.47).to_radians();
    let dlambda = 1.0 + 0.0334 * w.cos() + 0.0007 * (2.0 * w).cos();
    let s: f64 = TERMS
        .iter()
        .map(|&(a, b, cc)| a * ((b + cc * t).to_radians()).cos())
        .sum();
    let jde = jde0 + 0.00001 * s / dlambda;
    ((jde - EPOCH_JD) * date::MINUTES_PER_DAY as f64).round() as i64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_engine;
    use test_case::test_case;

    #[test]
    fn builtin_names_are_sorted() {
        let mut sorted = BUILTIN_NAMES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, BUILTIN_NAMES);
    }

    #[test_case("abs(-5)" => Value::Int(5))]
    #[test_case("sgn(-3)" => Value::Int(-1))]
    #[test_case("max(1, 9, 4)" => Value::Int(9))]
    #[test_case("min(\"b\", \"a\")" => Value::Str("a".into()))]
    #[test_case("strlen(\"abcd\")" => Value::Int(4))]
    #[test_case("upper(\"aBc\")" => Value::Str("ABC".into()))]
    #[test_case("substr(\"hello\", 2, 4)" => Value::Str("ell".into()))]
    #[test_case("substr(\"hello\", 4)" => Value::Str("lo".into()))]
    #[test_case("index(\"banana\", \"an\")" => Value::Int(2))]
    #[test_case("index(\"banana\", \"an\", 3)" => Value::Int(4))]
    #[test_case("index(\"banana\", \"zz\")" => Value::Int(0))]
    #[test_case("ord(1)" => Value::Str("1st".into()))]
    #[test_case("ord(22)" => Value::Str("22nd".into()))]
    #[test_case("ord(13)" => Value::Str("13th".into()))]
    #[test_case("ord(103)" => Value::Str("103rd".into()))]
    #[test_case("plural(1)" => Value::Str("".into()))]
    #[test_case("plural(2, \"day\")" => Value::Str("days".into()))]
    #[test_case("plural(2, \"ox\", \"oxen\")" => Value::Str("oxen".into()))]
    #[test_case("char(72, 105)" => Value::Str("Hi".into()))]
    #[test_case("asc(\"A\")" => Value::Int(65))]
    #[test_case("typeof(\"x\")" => Value::Str("STRING".into()); "typeof of str")]
    #[test_case("iif(0, 1, 2)" => Value::Int(2))]
    #[test_case("iif(1, 1, 2)" => Value::Int(1))]
    #[test_case("iif(0, 1, 0, 2, 3)" => Value::Int(3))]
    #[test_case("choose(2, \"a\", \"b\", \"c\")" => Value::Str("b".into()))]
    #[test_case("isany(3, 1, 2, 3)" => Value::Int(1))]
    #[test_case("isany(9, 1, 2, 3)" => Value::Int(0))]
    #[test_case("daysinmon(2, 2024)" => Value::Int(29))]
    #[test_case("isleap(1900)" => Value::Int(0))]
    #[test_case("wkdaynum(date(2030,1,1))" => Value::Int(2); "jan 1 2030 tuesday")]
    fn builtins(src: &str) -> Value {
        test_engine().eval_str(src).unwrap()
    }

    #[test]
    fn typeof_time_literal() {
        // Times come from time(), not literals.
        let mut engine = test_engine();
        assert_eq!(
            engine.eval_str("typeof(time(12, 30))").unwrap(),
            Value::Str("TIME".into())
        );
    }

    #[test]
    fn date_decomposition() {
        let mut engine = test_engine();
        assert_eq!(
            engine.eval_str("year(date(2031, 7, 9))").unwrap(),
            Value::Int(2031)
        );
        assert_eq!(
            engine.eval_str("monnum(date(2031, 7, 9))").unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            engine.eval_str("day(date(2031, 7, 9))").unwrap(),
            Value::Int(9)
        );
        assert_eq!(
            engine.eval_str("mon(7)").unwrap(),
            Value::Str("July".into())
        );
        assert_eq!(
            engine.eval_str("hour(time(12, 34))").unwrap(),
            Value::Int(12)
        );
        assert_eq!(
            engine.eval_str("minute(time(12, 34))").unwrap(),
            Value::Int(34)
        );
    }

    #[test]
    fn datetime_construction() {
        let mut engine = test_engine();
        let a = engine
            .eval_str("datetime(date(2030,1,1), time(10,30))")
            .unwrap();
        let b = engine.eval_str("datetime(2030,1,1,10,30)").unwrap();
        assert_eq!(a, b);
        assert_eq!(
            engine.eval_str("timepart(datetime(2030,1,1,10,30))").unwrap(),
            Value::Time(630)
        );
    }

    #[test]
    fn catch_and_catcherr() {
        let mut engine = test_engine();
        assert_eq!(
            engine.eval_str("catch(1/0, 99)").unwrap(),
            Value::Int(99)
        );
        let err_text = engine.eval_str("catcherr()").unwrap();
        assert_eq!(err_text, Value::Str("Division by zero".into()));
    }

    #[test]
    fn isconst_distinguishes() {
        let mut engine = test_engine();
        assert_eq!(engine.eval_str("isconst(1+1)").unwrap(), Value::Int(1));
        assert_eq!(
            engine.eval_str("isconst(today())").unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn value_and_defined() {
        let mut engine = test_engine();
        engine
            .vars
            .set("x", Value::Int(7), true, "test", 1)
            .unwrap();
        assert_eq!(
            engine.eval_str("value(\"x\")").unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            engine.eval_str("value(\"nope\", 42)").unwrap(),
            Value::Int(42)
        );
        assert_eq!(engine.eval_str("defined(\"x\")").unwrap(), Value::Int(1));
        assert_eq!(
            engine.eval_str("defined(\"nope\")").unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    #[serial_test::serial]
    fn getenv_reads_environment() {
        let mut engine = test_engine();
        std::env::set_var("REMINDEE_TEST_VAR", "42");
        assert_eq!(
            engine.eval_str("getenv(\"REMINDEE_TEST_VAR\")").unwrap(),
            Value::Str("42".into())
        );
        std::env::remove_var("REMINDEE_TEST_VAR");
        assert_eq!(
            engine.eval_str("getenv(\"REMINDEE_TEST_VAR\")").unwrap(),
            Value::Str("".into())
        );
    }

    #[test]
    fn tzconvert_between_zones() {
        let mut engine = test_engine();
        // Noon UTC on 2030-01-01 is 07:00 in New York.
        let v = engine
            .eval_str(
                "tzconvert(datetime(2030,1,1,12,0), \"UTC\", \"America/New_York\")",
            )
            .unwrap();
        assert_eq!(
            v,
            engine.eval_str("datetime(2030,1,1,7,0)").unwrap()
        );
    }

    #[test]
    fn shell_is_gated() {
        let mut engine = test_engine();
        engine.run_disabled = crate::engine::RUN_CMDLINE;
        assert_eq!(
            engine.eval_str("shell(\"echo hi\")"),
            Err(Error::RunDisabled)
        );
    }

    #[test]
    fn shellescape_quotes() {
        let mut engine = test_engine();
        assert_eq!(
            engine.eval_str("shellescape(\"a'b\")").unwrap(),
            Value::Str("'a'\\''b'".into())
        );
    }

    #[test]
    fn soleq_march_equinox_2030() {
        let mut engine = test_engine();
        let v = engine
            .eval_str("soleq(0, date(2030, 1, 1))")
            .unwrap();
        match v {
            Value::DateTime(dt) => {
                let serial =
                    dt.div_euclid(date::MINUTES_PER_DAY as i64) as i32;
                let (y, m, d) = date::from_dse(serial);
                assert_eq!((y, m), (2030, 3));
                assert!((19..=21).contains(&d));
            }
            other => panic!("expected datetime, got {:?}", other),
        }
    }

    #[test]
    fn soleq_advances_past_reference() {
        let mut engine = test_engine();
        let v = engine
            .eval_str("soleq(0, date(2030, 6, 1))")
            .unwrap();
        if let Value::DateTime(dt) = v {
            let serial =
                dt.div_euclid(date::MINUTES_PER_DAY as i64) as i32;
            let (y, m, _) = date::from_dse(serial);
            assert_eq!((y, m), (2031, 3));
        } else {
            panic!("expected datetime");
        }
    }
}
