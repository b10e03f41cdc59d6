use crate::date::{self, Weekdays};
use crate::parser::ParseError;
use crate::value::Value;

/// How OMITted dates interact with a computed trigger date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipType {
    #[default]
    None,
    /// Don't trigger on an omitted date at all.
    Skip,
    /// Back up to the nearest earlier non-omitted date.
    Before,
    /// Jump ahead to the nearest later non-omitted date.
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    #[default]
    None,
    Msg,
    Msf,
    Run,
    Cal,
    Sat,
    Ps,
    PsFile,
    Passthru,
}

/// The AT sub-record of a reminder.  All times are minutes past
/// midnight; `ttime == None` means the reminder is untimed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeTrig {
    pub ttime: Option<u16>,
    pub nexttime: Option<u16>,
    /// Advance-warning window in minutes; negative means omitted
    /// minutes are counted too.
    pub delta: Option<i32>,
    pub rep: Option<i32>,
    pub duration: Option<i32>,
}

/// Everything a REM clause says about when (and how) to trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub wd: Weekdays,
    pub d: Option<u32>,
    pub m: Option<u32>,
    pub y: Option<i32>,
    /// Days to pull the trigger earlier; positive counts only
    /// non-omitted days, negative counts every day.
    pub back: Option<i32>,
    /// Advance-warning window in days; negative counts omitted days.
    pub delta: Option<i32>,
    /// Repeat period in days.
    pub rep: Option<i32>,
    pub localomit: Weekdays,
    pub skip: SkipType,
    pub until: Option<i32>,
    pub from: Option<i32>,
    pub scanfrom: Option<i32>,
    pub once: bool,
    pub priority: u32,
    pub tags: Vec<String>,
    pub infos: Vec<(String, String)>,
    pub passthru: Option<String>,
    pub typ: BodyType,
    pub duration_days: i32,
    /// Original AT instant when a multi-day event is folded to today.
    pub eventstart: Option<i64>,
    pub eventduration: Option<i32>,
    pub maybe_uncomputable: bool,
    pub addomit: bool,
    pub noqueue: bool,
    pub sched: Option<String>,
    pub warn: Option<String>,
    pub omitfunc: Option<String>,
    pub expired: bool,
}

impl Trigger {
    pub fn new(priority: u32) -> Self {
        Self {
            wd: Weekdays::none(),
            d: None,
            m: None,
            y: None,
            back: None,
            delta: None,
            rep: None,
            localomit: Weekdays::none(),
            skip: SkipType::None,
            until: None,
            from: None,
            scanfrom: None,
            once: false,
            priority,
            tags: vec![],
            infos: vec![],
            passthru: None,
            typ: BodyType::None,
            duration_days: 0,
            eventstart: None,
            eventduration: None,
            maybe_uncomputable: false,
            addomit: false,
            noqueue: false,
            sched: None,
            warn: None,
            omitfunc: None,
            expired: false,
        }
    }
}

/// Evaluates a `[expr]` splice found inside a trigger clause.  `rest`
/// begins just after the `[`; the implementation reports the expansion
/// text and the byte length consumed including the closing `]`.
pub trait Expander {
    fn splice(&mut self, rest: &str) -> Result<(String, usize), ParseError>;
}

/// Expander that refuses all splices, for contexts where expressions
/// are disabled.
pub struct NoSplice;

impl Expander for NoSplice {
    fn splice(&mut self, _rest: &str) -> Result<(String, usize), ParseError> {
        Err(ParseError::UnknownToken("[".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kw {
    At,
    Through,
    Until,
    From,
    Scanfrom,
    Skip,
    Before,
    After,
    Omit,
    OmitFunc,
    Sched,
    Warn,
    Once,
    Priority,
    Tag,
    Info,
    Duration,
    MaybeUncomputable,
    NoQueue,
    AddOmit,
    Msg,
    Msf,
    Run,
    Cal,
    Satisfy,
    Special,
    Ps,
    PsFile,
}

/// Keyword table with documented minimum abbreviation lengths.
/// Longer names appear before their shorter prefixes.
const KEYWORDS: &[(&str, usize, Kw)] = &[
    ("scanfrom", 4, Kw::Scanfrom),
    ("sched", 5, Kw::Sched),
    ("special", 7, Kw::Special),
    ("satisfy", 7, Kw::Satisfy),
    ("skip", 4, Kw::Skip),
    ("psfile", 6, Kw::PsFile),
    ("priority", 4, Kw::Priority),
    ("ps", 2, Kw::Ps),
    ("at", 2, Kw::At),
    ("through", 4, Kw::Through),
    ("until", 3, Kw::Until),
    ("from", 4, Kw::From),
    ("before", 3, Kw::Before),
    ("after", 3, Kw::After),
    ("omitfunc", 5, Kw::OmitFunc),
    ("omit", 4, Kw::Omit),
    ("once", 4, Kw::Once),
    ("warn", 4, Kw::Warn),
    ("tag", 3, Kw::Tag),
    ("info", 4, Kw::Info),
    ("duration", 3, Kw::Duration),
    ("maybe-uncomputable", 5, Kw::MaybeUncomputable),
    ("noqueue", 7, Kw::NoQueue),
    ("addomit", 7, Kw::AddOmit),
    ("msg", 3, Kw::Msg),
    ("msf", 3, Kw::Msf),
    ("run", 3, Kw::Run),
    ("cal", 3, Kw::Cal),
];

fn match_keyword(tok: &str) -> Option<Kw> {
    let lower = tok.to_ascii_lowercase();
    // Weekday and month names shadow keyword prefixes ("sat" must stay
    // Saturday), so exact keyword matches win and prefixes are only
    // tried for names that are not calendar words.
    for &(name, _, kw) in KEYWORDS {
        if lower == name {
            return Some(kw);
        }
    }
    if date::weekday_from_name(&lower).is_some()
        || date::month_from_name(&lower).is_some()
    {
        return None;
    }
    for &(name, min, kw) in KEYWORDS {
        if lower.len() >= min && name.starts_with(&lower) {
            return Some(kw);
        }
    }
    None
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    /// Splice expansions are re-tokenized; surplus tokens wait here.
    pending: std::collections::VecDeque<String>,
}

type CursorState = (usize, std::collections::VecDeque<String>);

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            pending: std::collections::VecDeque::new(),
        }
    }

    fn save(&self) -> CursorState {
        (self.pos, self.pending.clone())
    }

    fn restore(&mut self, state: CursorState) {
        self.pos = state.0;
        self.pending = state.1;
    }

    fn skip_ws(&mut self) {
        while self.src[self.pos..]
            .chars()
            .next()
            .map(|c| c.is_whitespace())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
    }

    /// Everything not yet consumed, used for the reminder body.
    fn rest(&mut self) -> String {
        let tail = &self.src[self.pos..];
        if self.pending.is_empty() {
            return tail.to_owned();
        }
        let mut out =
            self.pending.drain(..).collect::<Vec<_>>().join(" ");
        if !tail.is_empty() {
            out.push_str(tail);
        }
        out
    }

    /// Next whitespace-delimited token, with `[expr]` splices expanded
    /// and `"..."` tokens kept whole.
    fn next_token(
        &mut self,
        expander: &mut dyn Expander,
    ) -> Result<Option<String>, ParseError> {
        loop {
            if let Some(tok) = self.pending.pop_front() {
                return Ok(Some(tok));
            }
            self.skip_ws();
            if self.pos >= self.src.len() {
                return Ok(None);
            }
            let bytes = self.src.as_bytes();
            if bytes[self.pos] == b'"' {
                let start = self.pos;
                self.pos += 1;
                while self.pos < self.src.len() && bytes[self.pos] != b'"' {
                    self.pos += 1;
                }
                if self.pos >= self.src.len() {
                    return Err(ParseError::MissingQuote);
                }
                self.pos += 1;
                let tok = &self.src[start + 1..self.pos - 1];
                return Ok(Some(tok.to_owned()));
            }
            let mut out = String::new();
            let mut run_start = self.pos;
            while self.pos < self.src.len() {
                let c = bytes[self.pos];
                if c.is_ascii_whitespace() {
                    break;
                }
                if c == b'[' {
                    out.push_str(&self.src[run_start..self.pos]);
                    let (expansion, consumed) =
                        expander.splice(&self.src[self.pos + 1..])?;
                    out.push_str(&expansion);
                    self.pos += 1 + consumed;
                    run_start = self.pos;
                } else {
                    self.pos += 1;
                }
            }
            out.push_str(&self.src[run_start..self.pos]);
            for part in out.split_whitespace() {
                self.pending.push_back(part.to_owned());
            }
            // An all-whitespace expansion yields nothing; read on.
        }
    }
}

fn parse_hhmm(tok: &str) -> Option<u16> {
    Value::parse_time_str(tok)
}

/// Duration values allow more than 23 hours.
fn parse_duration_minutes(tok: &str) -> Option<i32> {
    let (h, m) = tok.split_once(':')?;
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if h >= 0 && (0..60).contains(&m) {
        Some(h * 60 + m)
    } else {
        None
    }
}

fn parse_number(tok: &str) -> Option<i32> {
    tok.parse().ok()
}

struct DateParts {
    d: Option<u32>,
    m: Option<u32>,
    y: Option<i32>,
}

/// Parser state for one REM/IFTRIG clause.
struct TrigParser<'a, 'e> {
    cur: Cursor<'a>,
    expander: &'e mut dyn Expander,
    trig: Trigger,
    tt: TimeTrig,
    saw_at: bool,
}

impl<'a, 'e> TrigParser<'a, 'e> {
    fn dup(&self, what: &str) -> ParseError {
        ParseError::RepeatedKeyword(what.to_owned())
    }

    fn set_day(&mut self, d: u32) -> Result<(), ParseError> {
        if !(1..=31).contains(&d) {
            return Err(ParseError::BadDate);
        }
        if self.trig.d.is_some() {
            return Err(self.dup("day"));
        }
        self.trig.d = Some(d);
        Ok(())
    }

    fn set_month(&mut self, m: u32) -> Result<(), ParseError> {
        if self.trig.m.is_some() {
            return Err(self.dup("month"));
        }
        self.trig.m = Some(m);
        Ok(())
    }

    fn set_year(&mut self, y: i32) -> Result<(), ParseError> {
        if !(date::BASE_YEAR..=date::MAX_YEAR).contains(&y) {
            return Err(ParseError::BadDate);
        }
        if self.trig.y.is_some() {
            return Err(self.dup("year"));
        }
        self.trig.y = Some(y);
        Ok(())
    }

    fn expect_token(&mut self, what: &'static str) -> Result<String, ParseError> {
        self.cur
            .next_token(self.expander)?
            .ok_or(ParseError::Expected(what))
    }

    /// A fully specified date: either one ISO token or a run of
    /// day/month-name/year tokens.
    fn parse_full_date(&mut self) -> Result<i32, ParseError> {
        let mut parts = DateParts {
            d: None,
            m: None,
            y: None,
        };
        loop {
            let save = self.cur.save();
            let tok = match self.cur.next_token(self.expander)? {
                Some(tok) => tok,
                None => break,
            };
            if let Some(serial) = Value::parse_date_str(&tok) {
                if parts.d.is_some() || parts.m.is_some() || parts.y.is_some()
                {
                    return Err(ParseError::BadDate);
                }
                return Ok(serial);
            }
            if let Some(m) = date::month_from_name(&tok) {
                if parts.m.is_some() {
                    return Err(self.dup("month"));
                }
                parts.m = Some(m);
                continue;
            }
            if let Some(n) = parse_number(&tok) {
                if (1..=31).contains(&n) && parts.d.is_none() {
                    parts.d = Some(n as u32);
                    continue;
                }
                if n >= 100 {
                    if parts.y.is_some() {
                        return Err(self.dup("year"));
                    }
                    parts.y = Some(n);
                    continue;
                }
                return Err(ParseError::BadDate);
            }
            // Not part of the date; rewind and stop.
            self.cur.restore(save);
            break;
        }
        match (parts.y, parts.m, parts.d) {
            (Some(y), Some(m), Some(d)) => {
                date::dse(y, m, d).ok_or(ParseError::BadDate)
            }
            _ => Err(ParseError::BadDate),
        }
    }

    fn parse_omit_weekdays(&mut self) -> Result<(), ParseError> {
        let mut any = false;
        loop {
            let save = self.cur.save();
            let tok = match self.cur.next_token(self.expander)? {
                Some(tok) => tok,
                None => break,
            };
            match date::weekday_from_name(&tok) {
                Some(wd) => {
                    self.trig.localomit |= Weekdays::from(1u8 << wd);
                    any = true;
                }
                None => {
                    self.cur.restore(save);
                    break;
                }
            }
        }
        if any {
            Ok(())
        } else {
            Err(ParseError::Expected("weekday after OMIT"))
        }
    }

    fn handle_keyword(&mut self, kw: Kw) -> Result<Option<String>, ParseError> {
        match kw {
            Kw::At => {
                if self.tt.ttime.is_some() {
                    return Err(self.dup("AT"));
                }
                let tok = self.expect_token("time after AT")?;
                self.tt.ttime =
                    Some(parse_hhmm(&tok).ok_or(ParseError::BadTime)?);
                self.saw_at = true;
            }
            Kw::Through | Kw::Until => {
                if self.trig.until.is_some() {
                    return Err(self.dup("UNTIL"));
                }
                let serial = self.parse_full_date()?;
                self.trig.until = Some(serial);
            }
            Kw::From => {
                if self.trig.from.is_some() {
                    return Err(self.dup("FROM"));
                }
                let serial = self.parse_full_date()?;
                self.trig.from = Some(serial);
                if self.trig.scanfrom.is_none() {
                    self.trig.scanfrom = Some(serial);
                }
            }
            Kw::Scanfrom => {
                if self.trig.scanfrom.is_some() && self.trig.from.is_none() {
                    return Err(self.dup("SCANFROM"));
                }
                let serial = self.parse_full_date()?;
                self.trig.scanfrom = Some(serial);
            }
            Kw::Skip => {
                if self.trig.skip != SkipType::None {
                    return Err(self.dup("SKIP"));
                }
                self.trig.skip = SkipType::Skip;
            }
            Kw::Before => {
                if self.trig.skip != SkipType::None {
                    return Err(self.dup("SKIP"));
                }
                self.trig.skip = SkipType::Before;
            }
            Kw::After => {
                if self.trig.skip != SkipType::None {
                    return Err(self.dup("SKIP"));
                }
                self.trig.skip = SkipType::After;
            }
            Kw::Omit => self.parse_omit_weekdays()?,
            Kw::OmitFunc => {
                let tok = self.expect_token("function after OMITFUNC")?;
                self.trig.omitfunc = Some(tok);
            }
            Kw::Sched => {
                let tok = self.expect_token("function after SCHED")?;
                self.trig.sched = Some(tok);
            }
            Kw::Warn => {
                let tok = self.expect_token("function after WARN")?;
                self.trig.warn = Some(tok);
            }
            Kw::Once => {
                if self.trig.once {
                    return Err(self.dup("ONCE"));
                }
                self.trig.once = true;
            }
            Kw::Priority => {
                let tok = self.expect_token("priority value")?;
                let n = parse_number(&tok).ok_or(ParseError::BadNumber(tok))?;
                if !(0..=9999).contains(&n) {
                    return Err(ParseError::Expected("priority in 0..9999"));
                }
                self.trig.priority = n as u32;
            }
            Kw::Tag => {
                let tok = self.expect_token("tag value")?;
                self.trig.tags.push(tok);
            }
            Kw::Info => {
                let tok = self.expect_token("Header: Value after INFO")?;
                let (name, value) = tok
                    .split_once(':')
                    .ok_or(ParseError::Expected("Header: Value after INFO"))?;
                self.trig
                    .infos
                    .push((name.trim().to_owned(), value.trim().to_owned()));
            }
            Kw::Duration => {
                if self.tt.duration.is_some() {
                    return Err(self.dup("DURATION"));
                }
                let tok = self.expect_token("time after DURATION")?;
                self.tt.duration = Some(
                    parse_duration_minutes(&tok).ok_or(ParseError::BadTime)?,
                );
            }
            Kw::MaybeUncomputable => self.trig.maybe_uncomputable = true,
            Kw::NoQueue => self.trig.noqueue = true,
            Kw::AddOmit => self.trig.addomit = true,
            Kw::Special => {
                let tok = self.expect_token("SPECIAL name")?;
                self.trig.passthru = Some(tok);
                self.trig.typ = BodyType::Passthru;
                return Ok(Some(self.body_rest()));
            }
            Kw::Msg => {
                self.trig.typ = BodyType::Msg;
                return Ok(Some(self.body_rest()));
            }
            Kw::Msf => {
                self.trig.typ = BodyType::Msf;
                return Ok(Some(self.body_rest()));
            }
            Kw::Run => {
                self.trig.typ = BodyType::Run;
                return Ok(Some(self.body_rest()));
            }
            Kw::Cal => {
                self.trig.typ = BodyType::Cal;
                return Ok(Some(self.body_rest()));
            }
            Kw::Satisfy => {
                self.trig.typ = BodyType::Sat;
                return Ok(Some(self.body_rest()));
            }
            Kw::Ps => {
                self.trig.typ = BodyType::Ps;
                return Ok(Some(self.body_rest()));
            }
            Kw::PsFile => {
                self.trig.typ = BodyType::PsFile;
                return Ok(Some(self.body_rest()));
            }
        }
        Ok(None)
    }

    fn body_rest(&mut self) -> String {
        let rest = self.cur.rest();
        rest.strip_prefix(' ').unwrap_or(&rest).to_owned()
    }

    fn handle_signed(&mut self, tok: &str) -> Result<(), ParseError> {
        let (counts_omits, numstr, is_back) =
            if let Some(n) = tok.strip_prefix("++") {
                (true, n, false)
            } else if let Some(n) = tok.strip_prefix("--") {
                (true, n, true)
            } else if let Some(n) = tok.strip_prefix('+') {
                (false, n, false)
            } else {
                (false, tok.strip_prefix('-').unwrap(), true)
            };
        let n: i32 = numstr
            .parse()
            .map_err(|_| ParseError::BadNumber(tok.to_owned()))?;
        // Positive stored values step over omitted days; negative ones
        // count every day.
        let stored = if counts_omits { -n } else { n };
        if is_back {
            if self.trig.back.is_some() {
                return Err(self.dup("BACK"));
            }
            self.trig.back = Some(stored);
        } else if self.saw_at {
            if self.tt.delta.is_some() {
                return Err(self.dup("delta"));
            }
            self.tt.delta = Some(n);
        } else {
            if self.trig.delta.is_some() {
                return Err(self.dup("delta"));
            }
            self.trig.delta = Some(stored);
        }
        Ok(())
    }

    fn handle_rep(&mut self, tok: &str) -> Result<(), ParseError> {
        let n: i32 = tok[1..]
            .parse()
            .map_err(|_| ParseError::BadNumber(tok.to_owned()))?;
        if n < 1 {
            return Err(ParseError::BadNumber(tok.to_owned()));
        }
        if self.saw_at {
            if self.tt.rep.is_some() {
                return Err(self.dup("rep"));
            }
            self.tt.rep = Some(n);
        } else {
            if self.trig.rep.is_some() {
                return Err(self.dup("rep"));
            }
            self.trig.rep = Some(n);
        }
        Ok(())
    }

    fn run(mut self) -> Result<(Trigger, TimeTrig, Option<String>), ParseError> {
        loop {
            let tok = match self.cur.next_token(self.expander)? {
                Some(tok) => tok,
                None => break,
            };
            if tok.is_empty() {
                continue;
            }
            if let Some(kw) = match_keyword(&tok) {
                if let Some(body) = self.handle_keyword(kw)? {
                    self.finish()?;
                    return Ok((self.trig, self.tt, Some(body)));
                }
                continue;
            }
            if let Some(wd) = date::weekday_from_name(&tok) {
                self.trig.wd |= Weekdays::from(1u8 << wd);
                continue;
            }
            if let Some(m) = date::month_from_name(&tok) {
                self.set_month(m)?;
                continue;
            }
            if let Some(serial) = Value::parse_date_str(&tok) {
                let (y, m, d) = date::from_dse(serial);
                self.set_year(y)?;
                self.set_month(m)?;
                self.set_day(d)?;
                continue;
            }
            if tok.starts_with('*') {
                self.handle_rep(&tok)?;
                continue;
            }
            if (tok.starts_with('+') || tok.starts_with('-')) && tok.len() > 1
            {
                self.handle_signed(&tok)?;
                continue;
            }
            if let Some(n) = parse_number(&tok) {
                if (1..=31).contains(&n) {
                    self.set_day(n as u32)?;
                } else if n >= 100 {
                    self.set_year(n)?;
                } else {
                    return Err(ParseError::BadDate);
                }
                continue;
            }
            return Err(ParseError::UnknownToken(tok));
        }
        self.finish()?;
        Ok((self.trig, self.tt, None))
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        if let (Some(ttime), Some(duration)) =
            (self.tt.ttime, self.tt.duration)
        {
            self.trig.duration_days =
                (ttime as i32 + duration) / date::MINUTES_PER_DAY;
        }
        Ok(())
    }
}

/// Parse the clause of a REM/IFTRIG statement.  Returns the trigger,
/// the AT sub-record, and the unsubstituted body when a reminder-type
/// keyword was present.
pub fn parse_trigger(
    src: &str,
    expander: &mut dyn Expander,
    default_priority: u32,
) -> Result<(Trigger, TimeTrig, Option<String>), ParseError> {
    let parsed = TrigParser {
        cur: Cursor::new(src),
        expander,
        trig: Trigger::new(default_priority),
        tt: TimeTrig::default(),
        saw_at: false,
    }
    .run();
    if let Err(ref err) = parsed {
        log::debug!("trigger clause rejected: {}", err);
    }
    parsed
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    fn parse(src: &str) -> (Trigger, TimeTrig, Option<String>) {
        parse_trigger(src, &mut NoSplice, 5000).unwrap()
    }

    #[test]
    fn plain_date_msg() {
        let (t, tt, body) = parse("Jan 1 2030 MSG Hi");
        assert_eq!(t.m, Some(1));
        assert_eq!(t.d, Some(1));
        assert_eq!(t.y, Some(2030));
        assert_eq!(t.typ, BodyType::Msg);
        assert_eq!(tt.ttime, None);
        assert_eq!(body.as_deref(), Some("Hi"));
    }

    #[test]
    fn weekdays_or_together() {
        let (t, _, _) = parse("Mon Wed Fri MSG x");
        assert_eq!(
            t.wd,
            Weekdays::Monday | Weekdays::Wednesday | Weekdays::Friday
        );
    }

    #[test]
    fn sat_is_saturday_not_satisfy() {
        let (t, _, _) = parse("Sat MSG x");
        assert_eq!(t.wd, Weekdays::Saturday);
        assert_eq!(t.typ, BodyType::Msg);
    }

    #[test]
    fn satisfy_requires_full_word() {
        let (t, _, body) = parse("SATISFY [a>3]");
        assert_eq!(t.typ, BodyType::Sat);
        assert_eq!(body.as_deref(), Some("[a>3]"));
    }

    #[test]
    fn at_with_time_delta_and_rep() {
        let (t, tt, _) = parse("Jan 1 AT 17:30 +15 *5 MSG x");
        assert_eq!(t.m, Some(1));
        assert_eq!(tt.ttime, Some(17 * 60 + 30));
        assert_eq!(tt.delta, Some(15));
        assert_eq!(tt.rep, Some(5));
        assert_eq!(t.delta, None);
        assert_eq!(t.rep, None);
    }

    #[test]
    fn date_delta_and_back_before_at() {
        let (t, tt, _) = parse("+3 -2 Mon MSG x");
        assert_eq!(t.delta, Some(3));
        assert_eq!(t.back, Some(2));
        assert_eq!(tt.delta, None);
    }

    #[test]
    fn double_signs_count_omitted_days() {
        let (t, _, _) = parse("++3 --2 Mon MSG x");
        assert_eq!(t.delta, Some(-3));
        assert_eq!(t.back, Some(-2));
    }

    #[test]
    fn until_and_from() {
        let (t, _, _) = parse("Mon FROM Jan 1 2030 UNTIL 2030-06-30 MSG x");
        assert_eq!(t.from, Some(date::dse(2030, 1, 1).unwrap()));
        assert_eq!(t.scanfrom, t.from);
        assert_eq!(t.until, Some(date::dse(2030, 6, 30).unwrap()));
    }

    #[test]
    fn local_omit_collects_weekdays() {
        let (t, _, _) = parse("1 OMIT Sat Sun SKIP MSG x");
        assert_eq!(t.localomit, Weekdays::Saturday | Weekdays::Sunday);
        assert_eq!(t.skip, SkipType::Skip);
    }

    #[test]
    fn special_takes_a_name() {
        let (t, _, body) = parse("Jan 1 SPECIAL SHADE 128");
        assert_eq!(t.typ, BodyType::Passthru);
        assert_eq!(t.passthru.as_deref(), Some("SHADE"));
        assert_eq!(body.as_deref(), Some("128"));
    }

    #[test]
    fn tags_info_priority() {
        let (t, _, _) = parse(
            "Jan 1 PRIORITY 100 TAG a TAG b INFO \"X-Note: some text\" MSG x",
        );
        assert_eq!(t.priority, 100);
        assert_eq!(t.tags, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(
            t.infos,
            vec![("X-Note".to_owned(), "some text".to_owned())]
        );
    }

    #[test]
    fn duration_spanning_days() {
        let (t, tt, _) = parse("Jan 1 AT 23:00 DURATION 26:00 MSG x");
        assert_eq!(tt.duration, Some(26 * 60));
        assert_eq!(t.duration_days, (23 * 60 + 26 * 60) / 1440);
        assert_eq!(t.duration_days, 2);
    }

    #[test]
    fn iso_date_token() {
        let (t, _, _) = parse("2030-04-05 MSG x");
        assert_eq!((t.y, t.m, t.d), (Some(2030), Some(4), Some(5)));
    }

    #[test_case("Jan Feb MSG x")]
    #[test_case("1 2 MSG x")]
    #[test_case("2030 2031 MSG x")]
    #[test_case("AT 9:00 AT 10:00 MSG x")]
    fn duplicates_rejected(src: &str) {
        assert!(matches!(
            parse_trigger(src, &mut NoSplice, 5000),
            Err(ParseError::RepeatedKeyword(_))
        ));
    }

    #[test]
    fn bad_numbers_rejected() {
        assert!(parse_trigger("47 MSG x", &mut NoSplice, 5000).is_err());
        assert!(parse_trigger("Feb 30 1990 MSG x", &mut NoSplice, 5000).is_ok());
        // Feb 30 never fits but that is the solver's business when no
        // year pins it; with a year it is a hard error there.
    }

    struct FixedExpander(&'static str);

    impl Expander for FixedExpander {
        fn splice(
            &mut self,
            rest: &str,
        ) -> Result<(String, usize), ParseError> {
            let end = rest.find(']').ok_or(ParseError::MissingBracket)?;
            Ok((self.0.to_owned(), end + 1))
        }
    }

    #[test]
    fn splices_expand_inside_clause() {
        let (t, _, body) = parse_trigger(
            "[x] 2030 MSG done",
            &mut FixedExpander("Jan 1"),
            5000,
        )
        .unwrap();
        // The splice result becomes part of the token stream.
        assert_eq!(t.y, Some(2030));
        assert_eq!(body.as_deref(), Some("done"));
    }

    #[test]
    fn non_ascii_tags_and_bodies() {
        let (t, _, body) = parse("Jan 1 TAG café MSG Déjeuner au café");
        assert_eq!(t.tags, vec!["café".to_owned()]);
        assert_eq!(body.as_deref(), Some("Déjeuner au café"));
    }

    #[test]
    fn body_is_not_expanded() {
        let (_, _, body) =
            parse("Jan 1 MSG value is [x + 1] ok");
        assert_eq!(body.as_deref(), Some("value is [x + 1] ok"));
    }
}
