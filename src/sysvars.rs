use remindee_script::{date, Value};

use crate::engine::{Engine, OutputMode, RUN_CMDLINE, RUN_NOTOWNER, RUN_SCRIPT};
use crate::err::Error;
use crate::sortbuf::SortDir;

/// English words whose `$`-variables read and write the translation
/// table.
const TRANS_WORDS: &[&str] = &[
    "Ago", "Am", "And", "April", "At", "August", "December", "February",
    "Friday", "Fromnow", "Hour", "Is", "January", "July", "June", "March",
    "May", "Minute", "Monday", "Now", "November", "October", "On", "Pm",
    "Saturday", "September", "Sunday", "Thursday", "Today", "Tomorrow",
    "Tuesday", "Was", "Wednesday",
];

fn trans_word(name: &str) -> Option<&'static str> {
    TRANS_WORDS
        .iter()
        .find(|w| w.eq_ignore_ascii_case(name))
        .copied()
}

fn as_int(value: &Value) -> Result<i64, Error> {
    match value {
        Value::Int(n) => Ok(*n),
        _ => Err(Error::CantCoerce),
    }
}

fn as_str(value: &Value) -> Result<String, Error> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(Error::CantCoerce),
    }
}

fn bounded(
    name: &str,
    value: &Value,
    min: i64,
    max: i64,
) -> Result<i64, Error> {
    let n = as_int(value).map_err(|_| Error::BadSysVarType(name.to_owned()))?;
    if n < min || n > max {
        return Err(Error::SysVarOutOfRange(name.to_owned()));
    }
    Ok(n)
}

impl Engine {
    pub fn get_sys_var(&mut self, name: &str) -> Result<Value, Error> {
        if let Some(word) = trans_word(name) {
            return Ok(Value::Str(
                self.translations.tr(word).to_owned(),
            ));
        }
        let lname = name.to_ascii_lowercase();
        let t = &self.tunables;
        let out = match lname.as_str() {
            "maxstringlen" => {
                Value::Int(t.max_string_len.map(|v| v as i64).unwrap_or(-1))
            }
            "maxsatiter" => Value::Int(t.max_sat_iter as i64),
            "maxlateminutes" => Value::Int(t.max_late_minutes as i64),
            "dedupereminders" => Value::Int(t.dedupe_reminders as i64),
            "formwidth" => Value::Int(t.form_width),
            "firstindent" => Value::Int(t.first_indent),
            "subsindent" => Value::Int(t.subs_indent),
            "endsent" => Value::Str(t.end_sent.clone()),
            "endsentig" => Value::Str(t.end_sent_ig.clone()),
            "oncefile" => Value::Str(
                t.once_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            "warninglevel" => Value::Int(t.warning_level),
            "maxrecursionlevel" => Value::Int(t.max_recursion_level),
            "expressiontimelimit" => Value::Int(t.expr_time_limit_ms as i64),
            "defaultprio" => Value::Int(t.default_priority as i64),
            "defaultdelta" => Value::Int(t.default_delta as i64),
            "defaulttdelta" => Value::Int(t.default_tdelta as i64),
            "datesep" => Value::Str(t.date_sep.to_string()),
            "timesep" => Value::Str(t.time_sep.to_string()),
            "dontfork" => Value::Int(t.dont_fork as i64),
            "dontqueue" => Value::Int(t.dont_queue as i64),
            "donttrigats" => Value::Int(t.dont_trig_ats as i64),
            "ignoreonce" => Value::Int(t.ignore_once as i64),
            "prefixlineno" => Value::Int(t.prefix_line_no as i64),
            "suppressimplicitwarnings" => {
                Value::Int(t.suppress_implicit_warnings as i64)
            }
            "untimedfirst" => Value::Int(t.untimed_first as i64),
            "sortbydate" => Value::Int(self.sortbuf.by_date.as_int()),
            "sortbytime" => Value::Int(self.sortbuf.by_time.as_int()),
            "sortbyprio" => Value::Int(self.sortbuf.by_prio.as_int()),
            "intmax" => Value::Int(i64::MAX),
            "intmin" => Value::Int(i64::MIN),
            "maxfullomits" => {
                Value::Int(crate::omit::MAX_FULL_OMITS as i64)
            }
            "maxpartialomits" => {
                Value::Int(crate::omit::MAX_PARTIAL_OMITS as i64)
            }
            "runoff" => {
                self.nonconst_flag = true;
                let mask = self.run_disabled
                    | if self.cur_line_notowner {
                        RUN_NOTOWNER
                    } else {
                        0
                    };
                Value::Int((mask & (RUN_CMDLINE | RUN_SCRIPT | RUN_NOTOWNER)
                    != 0) as i64)
            }
            "numfullomits" => {
                self.nonconst_flag = true;
                Value::Int(self.omits.num_full() as i64)
            }
            "numpartialomits" => {
                self.nonconst_flag = true;
                Value::Int(self.omits.num_partial() as i64)
            }
            "numqueued" => {
                self.nonconst_flag = true;
                Value::Int(self.queue.len() as i64)
            }
            "numtrig" => {
                self.nonconst_flag = true;
                Value::Int(self.num_triggered as i64)
            }
            "calmode" => Value::Int(0),
            "simplecal" => Value::Int(matches!(
                self.mode,
                OutputMode::SimpleCal { .. }
            ) as i64),
            "nextmode" => {
                Value::Int((self.mode == OutputMode::Next) as i64)
            }
            "daemon" => Value::Int(0),
            "jsonmode" => Value::Int(self.json_mode as i64),
            // Today's date parts.
            "u" => {
                self.nonconst_flag = true;
                Value::Date(self.today)
            }
            "ud" => {
                self.nonconst_flag = true;
                Value::Int(date::from_dse(self.today).2 as i64)
            }
            "um" => {
                self.nonconst_flag = true;
                Value::Int(date::from_dse(self.today).1 as i64)
            }
            "uy" => {
                self.nonconst_flag = true;
                Value::Int(date::from_dse(self.today).0 as i64)
            }
            "uw" => {
                self.nonconst_flag = true;
                Value::Str(date::day_name(self.today).to_owned())
            }
            // Last-computed-trigger parts.
            "t" | "td" | "tm" | "ty" | "tw" | "tt" | "tu" | "tb" => {
                self.nonconst_flag = true;
                self.trigger_sys_var(&lname)?
            }
            _ => return Err(Error::UnknownSysVar(name.to_owned())),
        };
        Ok(out)
    }

    fn trigger_sys_var(&self, lname: &str) -> Result<Value, Error> {
        let lt = self
            .last_trigger
            .as_ref()
            .ok_or(Error::CantComputeTrigger)?;
        let d = lt.date.ok_or(Error::CantComputeTrigger)?;
        Ok(match lname {
            "t" => Value::Date(d),
            "td" => Value::Int(date::from_dse(d).2 as i64),
            "tm" => Value::Int(date::from_dse(d).1 as i64),
            "ty" => Value::Int(date::from_dse(d).0 as i64),
            "tw" => Value::Str(date::day_name(d).to_owned()),
            "tt" => match lt.time {
                Some(t) => Value::Time(t),
                None => Value::Int(0),
            },
            "tu" => match lt.trig.until {
                Some(u) => Value::Date(u),
                None => Value::Int(0),
            },
            "tb" => Value::Int(lt.trig.back.unwrap_or(0) as i64),
            _ => unreachable!(),
        })
    }

    pub fn set_sys_var(
        &mut self,
        name: &str,
        value: Value,
    ) -> Result<(), Error> {
        if let Some(word) = trans_word(name) {
            let s = as_str(&value)
                .map_err(|_| Error::BadSysVarType(name.to_owned()))?;
            self.translations.set(word, &s);
            return Ok(());
        }
        let lname = name.to_ascii_lowercase();
        match lname.as_str() {
            "maxstringlen" => {
                let n = bounded(name, &value, -1, i64::MAX)?;
                self.tunables.max_string_len =
                    if n < 0 { None } else { Some(n as usize) };
            }
            "maxsatiter" => {
                self.tunables.max_sat_iter =
                    bounded(name, &value, 10, i32::MAX as i64)? as i32;
            }
            "maxlateminutes" => {
                self.tunables.max_late_minutes =
                    bounded(name, &value, 0, date::MINUTES_PER_DAY as i64)?
                        as i32;
            }
            "dedupereminders" => {
                self.tunables.dedupe_reminders =
                    bounded(name, &value, 0, 1)? != 0;
            }
            "formwidth" => {
                self.tunables.form_width = bounded(name, &value, 20, 500)?;
            }
            "firstindent" => {
                self.tunables.first_indent = bounded(name, &value, 0, 132)?;
            }
            "subsindent" => {
                self.tunables.subs_indent = bounded(name, &value, 0, 132)?;
            }
            "endsent" => {
                self.tunables.end_sent = as_str(&value)
                    .map_err(|_| Error::BadSysVarType(name.to_owned()))?;
            }
            "endsentig" => {
                self.tunables.end_sent_ig = as_str(&value)
                    .map_err(|_| Error::BadSysVarType(name.to_owned()))?;
            }
            "oncefile" => {
                let s = as_str(&value)
                    .map_err(|_| Error::BadSysVarType(name.to_owned()))?;
                self.tunables.once_file = if s.is_empty() {
                    None
                } else {
                    Some(std::path::PathBuf::from(s))
                };
            }
            "warninglevel" => {
                self.tunables.warning_level =
                    bounded(name, &value, 0, i64::MAX)?;
            }
            "maxrecursionlevel" => {
                self.tunables.max_recursion_level =
                    bounded(name, &value, 1, 10_000)?;
            }
            "expressiontimelimit" => {
                self.tunables.expr_time_limit_ms =
                    bounded(name, &value, 0, i64::MAX)? as u64;
            }
            "defaultprio" => {
                self.tunables.default_priority =
                    bounded(name, &value, 0, 9999)? as u32;
            }
            "defaultdelta" => {
                self.tunables.default_delta =
                    bounded(name, &value, 0, 10_000)? as i32;
            }
            "defaulttdelta" => {
                self.tunables.default_tdelta = bounded(
                    name,
                    &value,
                    0,
                    date::MINUTES_PER_DAY as i64,
                )? as i32;
            }
            "datesep" => {
                let s = as_str(&value)
                    .map_err(|_| Error::BadSysVarType(name.to_owned()))?;
                self.tunables.date_sep = match s.as_str() {
                    "-" => '-',
                    "/" => '/',
                    _ => {
                        return Err(Error::SysVarOutOfRange(
                            name.to_owned(),
                        ))
                    }
                };
            }
            "timesep" => {
                let s = as_str(&value)
                    .map_err(|_| Error::BadSysVarType(name.to_owned()))?;
                self.tunables.time_sep = match s.as_str() {
                    ":" => ':',
                    "." => '.',
                    _ => {
                        return Err(Error::SysVarOutOfRange(
                            name.to_owned(),
                        ))
                    }
                };
            }
            "suppressimplicitwarnings" => {
                self.tunables.suppress_implicit_warnings =
                    bounded(name, &value, 0, 1)? != 0;
            }
            "untimedfirst" => {
                self.tunables.untimed_first =
                    bounded(name, &value, 0, 1)? != 0;
            }
            "sortbydate" => {
                self.sortbuf.by_date =
                    SortDir::from_int(bounded(name, &value, 0, 2)?)
                        .unwrap();
            }
            "sortbytime" => {
                self.sortbuf.by_time =
                    SortDir::from_int(bounded(name, &value, 0, 2)?)
                        .unwrap();
            }
            "sortbyprio" => {
                self.sortbuf.by_prio =
                    SortDir::from_int(bounded(name, &value, 0, 2)?)
                        .unwrap();
            }
            // Everything else readable is read-only.
            "intmax" | "intmin" | "maxfullomits" | "maxpartialomits"
            | "runoff" | "numfullomits" | "numpartialomits" | "numqueued"
            | "numtrig" | "calmode" | "simplecal" | "nextmode" | "daemon"
            | "jsonmode" | "dontfork" | "dontqueue" | "donttrigats"
            | "ignoreonce" | "prefixlineno" | "u" | "ud" | "um" | "uy"
            | "uw" | "t" | "td" | "tm" | "ty" | "tw" | "tt" | "tu"
            | "tb" => {
                return Err(Error::ReadOnlySysVar(name.to_owned()))
            }
            _ => return Err(Error::UnknownSysVar(name.to_owned())),
        }
        Ok(())
    }
}
