use remindee_script::date::{self, Weekdays};
use remindee_script::{
    parse_expr_spliced, parse_trigger, Expander, ParseError, SkipType,
    TimeTrig, Trigger, Value,
};

use crate::engine::{Engine, LastTrigger, TRIG_ATTEMPTS};
use crate::err::Error;

const GOT_DAY: u8 = 1;
const GOT_MON: u8 = 2;
const GOT_YR: u8 = 4;
const GOT_WD: u8 = 8;

/// Splice evaluator handed to the clause parser; engine errors are
/// stashed so the caller can report the real cause.
pub struct SpliceEval<'a> {
    pub engine: &'a mut Engine,
    pub err: Option<Error>,
}

impl Expander for SpliceEval<'_> {
    fn splice(&mut self, rest: &str) -> Result<(String, usize), ParseError> {
        let (expr, consumed) = parse_expr_spliced(rest)?;
        match self.engine.eval_expr(&expr, None) {
            Ok(v) => Ok((v.plain_string(), consumed)),
            Err(err) => {
                self.err = Some(err);
                Err(ParseError::Expected("computable expression"))
            }
        }
    }
}

fn next_month(m: u32, y: i32) -> (u32, i32) {
    if m == 12 {
        (1, y + 1)
    } else {
        (m + 1, y)
    }
}

fn dse_of(y: i32, m: u32, d: u32) -> Result<i32, Error> {
    date::dse(y, m, d).ok_or(Error::DateOutOfRange)
}

impl Engine {
    pub fn parse_rem_clause(
        &mut self,
        src: &str,
    ) -> Result<(Trigger, TimeTrig, Option<String>), Error> {
        let prio = self.tunables.default_priority;
        let mut splicer = SpliceEval {
            engine: self,
            err: None,
        };
        match parse_trigger(src, &mut splicer, prio) {
            Ok(parsed) => Ok(parsed),
            Err(parse_err) => Err(splicer
                .err
                .take()
                .unwrap_or(Error::Parse(parse_err))),
        }
    }

    /// Standard omit test, or the trigger's OMITFUNC when one is named.
    pub fn is_omitted_for(
        &mut self,
        serial: i32,
        trig: &Trigger,
    ) -> Result<bool, Error> {
        if let Some(fname) = trig.omitfunc.clone() {
            if self.funcs.get(&fname).is_some() {
                let v = self.call_user_func(
                    &fname.to_ascii_lowercase(),
                    vec![Value::Date(serial)],
                )?;
                return Ok(v.is_true());
            }
        }
        Ok(self.omits.is_omitted(serial, trig.localomit))
    }

    /// The inner solver layer: the next date satisfying only the
    /// static weekday/day/month/year facets.  `Ok(None)` means the
    /// trigger can never match at or after `startdate`.
    fn next_simple_trigger(
        &mut self,
        startdate: i32,
        trig: &Trigger,
    ) -> Result<Option<i32>, Error> {
        let (y, m, d) = date::from_dse(startdate);
        let mut typ = 0u8;
        if trig.d.is_some() {
            typ |= GOT_DAY;
        }
        if trig.m.is_some() {
            typ |= GOT_MON;
        }
        if trig.y.is_some() {
            typ |= GOT_YR;
        }
        if trig.wd != Weekdays::none() {
            typ |= GOT_WD;
        }
        let td = trig.d.unwrap_or(0);
        let tm = trig.m.unwrap_or(0);
        let ty = trig.y.unwrap_or(0);
        let wd = trig.wd;

        let result = match typ {
            0 => Some(startdate),

            t if t == GOT_WD => {
                Some(date::advance_to_weekday(startdate, wd))
            }

            t if t == GOT_DAY => {
                let (mut m2, mut y2) = (m, y);
                if d > td {
                    (m2, y2) = next_month(m2, y2);
                }
                while td > date::days_in_month(m2, y2) {
                    (m2, y2) = next_month(m2, y2);
                }
                Some(dse_of(y2, m2, td)?)
            }

            t if t == GOT_MON => {
                if m == tm {
                    Some(startdate)
                } else if m > tm {
                    Some(dse_of(y + 1, tm, 1)?)
                } else {
                    Some(dse_of(y, tm, 1)?)
                }
            }

            t if t == GOT_YR => {
                if y == ty {
                    Some(startdate)
                } else if y < ty {
                    Some(dse_of(ty, 1, 1)?)
                } else {
                    None
                }
            }

            t if t == GOT_DAY + GOT_MON => {
                if td > date::max_days_in_month(tm) {
                    return Err(Error::BadDate);
                }
                let mut y2 = y;
                if m > tm || (m == tm && d > td) {
                    y2 += 1;
                }
                while td > date::days_in_month(tm, y2) {
                    y2 += 1;
                }
                Some(dse_of(y2, tm, td)?)
            }

            t if t == GOT_DAY + GOT_YR => {
                if y < ty {
                    Some(dse_of(ty, 1, td)?)
                } else if y > ty {
                    None
                } else {
                    let mut m2 = m;
                    if d > td {
                        if m2 == 12 {
                            return Ok(None);
                        }
                        m2 += 1;
                    }
                    while td > date::days_in_month(m2, ty) {
                        m2 += 1;
                        if m2 > 12 {
                            return Ok(None);
                        }
                    }
                    Some(dse_of(ty, m2, td)?)
                }
            }

            t if t == GOT_MON + GOT_YR => {
                if y > ty || (y == ty && m > tm) {
                    None
                } else if y < ty {
                    Some(dse_of(ty, tm, 1)?)
                } else if m == tm {
                    Some(startdate)
                } else {
                    Some(dse_of(ty, tm, 1)?)
                }
            }

            t if t == GOT_DAY + GOT_MON + GOT_YR => {
                if td > date::days_in_month(tm, ty) {
                    return Err(Error::BadDate);
                }
                Some(dse_of(ty, tm, td)?)
            }

            t if t == GOT_YR + GOT_WD => {
                if y > ty {
                    None
                } else {
                    let j = if y < ty {
                        dse_of(ty, 1, 1)?
                    } else {
                        startdate
                    };
                    let j = date::advance_to_weekday(j, wd);
                    if date::from_dse(j).0 > ty {
                        None
                    } else {
                        Some(j)
                    }
                }
            }

            t if t == GOT_MON + GOT_WD => {
                if m == tm {
                    let j = date::advance_to_weekday(startdate, wd);
                    if date::from_dse(j).1 == tm {
                        return Ok(Some(j));
                    }
                }
                let j = if m >= tm {
                    dse_of(y + 1, tm, 1)?
                } else {
                    dse_of(y, tm, 1)?
                };
                Some(date::advance_to_weekday(j, wd))
            }

            t if t == GOT_DAY + GOT_WD => {
                if m != 1 || y > date::BASE_YEAR {
                    let (m2, y2) = if m == 1 {
                        (12, y - 1)
                    } else {
                        (m - 1, y)
                    };
                    if td <= date::days_in_month(m2, y2) {
                        let j = date::advance_to_weekday(
                            dse_of(y2, m2, td)?,
                            wd,
                        );
                        if j >= startdate {
                            return Ok(Some(j));
                        }
                    }
                }
                if td <= date::days_in_month(m, y) {
                    let j =
                        date::advance_to_weekday(dse_of(y, m, td)?, wd);
                    if j >= startdate {
                        return Ok(Some(j));
                    }
                }
                let (mut m2, mut y2) = next_month(m, y);
                while td > date::days_in_month(m2, y2) {
                    (m2, y2) = next_month(m2, y2);
                }
                Some(date::advance_to_weekday(dse_of(y2, m2, td)?, wd))
            }

            t if t == GOT_WD + GOT_YR + GOT_DAY => {
                if y > ty + 1 || (y > ty && m > 1) {
                    return Ok(None);
                }
                if y > ty {
                    let j = date::advance_to_weekday(
                        dse_of(ty, 12, td)?,
                        wd,
                    );
                    if j >= startdate {
                        return Ok(Some(j));
                    }
                } else if y < ty {
                    return Ok(Some(date::advance_to_weekday(
                        dse_of(ty, 1, td)?,
                        wd,
                    )));
                } else if m > 1 {
                    let mut m2 = m - 1;
                    while td > date::days_in_month(m2, ty) {
                        m2 -= 1;
                        if m2 == 0 {
                            break;
                        }
                    }
                    if m2 >= 1 {
                        let j = date::advance_to_weekday(
                            dse_of(ty, m2, td)?,
                            wd,
                        );
                        if date::from_dse(j).0 > ty {
                            return Ok(None);
                        }
                        if j >= startdate {
                            return Ok(Some(j));
                        }
                    }
                }
                if td <= date::days_in_month(m, ty) {
                    let j =
                        date::advance_to_weekday(dse_of(ty, m, td)?, wd);
                    if date::from_dse(j).0 > ty {
                        return Ok(None);
                    }
                    if j >= startdate {
                        return Ok(Some(j));
                    }
                }
                if m == 12 {
                    return Ok(None);
                }
                let mut m2 = m + 1;
                while td > date::days_in_month(m2, ty) {
                    m2 += 1;
                    if m2 > 12 {
                        return Ok(None);
                    }
                }
                let j = date::advance_to_weekday(dse_of(ty, m2, td)?, wd);
                if date::from_dse(j).0 > ty {
                    None
                } else {
                    Some(j)
                }
            }

            t if t == GOT_DAY + GOT_MON + GOT_WD => {
                if td > date::max_days_in_month(tm) {
                    return Err(Error::BadDate);
                }
                let mut y2 = if y > date::BASE_YEAR { y - 1 } else { y };
                while td > date::days_in_month(tm, y2) {
                    y2 += 1;
                }
                let j =
                    date::advance_to_weekday(dse_of(y2, tm, td)?, wd);
                if j >= startdate {
                    return Ok(Some(j));
                }
                y2 += 1;
                while td > date::days_in_month(tm, y2) {
                    y2 += 1;
                }
                let j =
                    date::advance_to_weekday(dse_of(y2, tm, td)?, wd);
                if j >= startdate {
                    return Ok(Some(j));
                }
                y2 += 1;
                while td > date::days_in_month(tm, y2) {
                    y2 += 1;
                }
                Some(date::advance_to_weekday(dse_of(y2, tm, td)?, wd))
            }

            t if t == GOT_WD + GOT_MON + GOT_YR => {
                if y > ty || (y == ty && m > tm) {
                    None
                } else if ty > y || (ty == y && tm > m) {
                    Some(date::advance_to_weekday(
                        dse_of(ty, tm, 1)?,
                        wd,
                    ))
                } else {
                    let j = date::advance_to_weekday(startdate, wd);
                    if date::from_dse(j).1 == tm {
                        Some(j)
                    } else {
                        None
                    }
                }
            }

            t if t == GOT_WD + GOT_DAY + GOT_MON + GOT_YR => {
                if td > date::days_in_month(tm, ty) {
                    return Err(Error::BadDate);
                }
                Some(date::advance_to_weekday(dse_of(ty, tm, td)?, wd))
            }

            _ => unreachable!("facet mask covered above"),
        };
        Ok(result)
    }

    /// The outer solver layer: UNTIL bounds, BACK, REP, and the three
    /// SKIP flavours.  Returns the candidate date (None = expired) and
    /// the suggested start for the next scan attempt.
    fn get_next_trigger_date(
        &mut self,
        trig: &Trigger,
        start: i32,
    ) -> Result<(Option<i32>, i32), Error> {
        if let Some(until) = trig.until {
            if until < start {
                return Ok((None, start));
            }
        }
        let mut start = start;
        if trig.skip == SkipType::After {
            let mut iter = 0;
            loop {
                iter += 1;
                if iter > self.tunables.max_sat_iter {
                    return Err(Error::CantComputeTrigger);
                }
                if start < 1 {
                    break;
                }
                if !self.is_omitted_for(start - 1, trig)? {
                    break;
                }
                start -= 1;
            }
            if start < 0 {
                return Err(Error::CantComputeTrigger);
            }
        }

        let simple = match self.next_simple_trigger(start, trig)? {
            Some(simple) => simple,
            None => return Ok((None, start)),
        };
        let nextstart = simple + 1;
        let mut candidate = simple;

        if let Some(back) = trig.back {
            if back < 0 {
                candidate += back;
            } else {
                let mut remaining = back;
                let max_iter =
                    self.tunables.max_sat_iter.max(back * 2);
                let mut iter = 0;
                while remaining > 0 {
                    iter += 1;
                    if iter > max_iter {
                        return Err(Error::CantComputeTrigger);
                    }
                    candidate -= 1;
                    if !self.is_omitted_for(candidate, trig)? {
                        remaining -= 1;
                    }
                }
            }
        }

        if let Some(rep) = trig.rep {
            if candidate < start {
                let mult = (start - candidate) / rep;
                candidate += mult * rep;
                if candidate < start {
                    candidate += rep;
                }
            }
        }

        if trig.skip == SkipType::Before {
            let mut iter = 0;
            while self.is_omitted_for(candidate, trig)? {
                iter += 1;
                if iter > self.tunables.max_sat_iter {
                    return Err(Error::CantComputeTrigger);
                }
                candidate -= 1;
                if candidate < 0 {
                    return Err(Error::CantComputeTrigger);
                }
            }
        }

        if trig.skip == SkipType::After {
            let mut iter = 0;
            while self.is_omitted_for(candidate, trig)? {
                iter += 1;
                if iter > self.tunables.max_sat_iter {
                    return Err(Error::CantComputeTrigger);
                }
                candidate += 1;
            }
        }

        if let Some(until) = trig.until {
            if candidate > until {
                return Ok((None, nextstart));
            }
        }
        Ok((Some(candidate), nextstart))
    }

    fn compute_trigger_no_adjust(
        &mut self,
        today: i32,
        trig: &mut Trigger,
        tt: &TimeTrig,
        save_in_globals: bool,
        duration_days: i32,
    ) -> Result<Option<i32>, Error> {
        trig.expired = false;
        if save_in_globals {
            self.last_trigger = Some(LastTrigger {
                trig: trig.clone(),
                tt: tt.clone(),
                date: None,
                time: tt.ttime,
                valid: false,
            });
        }
        if (self.omits.weekday_mask() | trig.localomit).bits() == 0x7f {
            return Err(Error::TooManyLocalOmits);
        }
        let mut start = today - duration_days;
        if start < 0 {
            return Err(Error::DateOutOfRange);
        }
        if tt.duration.is_some() && tt.ttime.is_none() {
            return Err(Error::DurationNeedsAt);
        }
        if trig.rep.is_some()
            && (trig.d.is_none() || trig.m.is_none() || trig.y.is_none())
        {
            return Err(Error::RepNeedsFullDate);
        }

        let mut attempts = 0;
        while attempts < TRIG_ATTEMPTS {
            attempts += 1;
            let (result, mut nextstart) =
                self.get_next_trigger_date(trig, start)?;
            let result = match result {
                Some(r) => r,
                None => {
                    trig.expired = true;
                    return Ok(None);
                }
            };
            let omitted = if trig.skip == SkipType::Skip {
                self.is_omitted_for(result, trig)?
            } else {
                false
            };
            if result + duration_days >= today && !omitted {
                if let Some(from) = trig.from {
                    if result < from {
                        trig.expired = true;
                        return Ok(None);
                    }
                }
                if save_in_globals {
                    self.save_trigger_info(trig, tt, result);
                }
                return Ok(Some(result));
            }
            if trig.back.is_none()
                && trig.skip == SkipType::None
                && trig.rep.is_none()
            {
                trig.expired = true;
                if save_in_globals {
                    self.save_trigger_info(trig, tt, result);
                }
                return Ok(None);
            }
            if trig.skip == SkipType::Skip
                && omitted
                && nextstart <= start
                && result >= start
            {
                nextstart = result + 1;
            }
            if nextstart <= start {
                trig.expired = true;
                if save_in_globals {
                    self.save_trigger_info(trig, tt, result);
                }
                return Ok(None);
            }
            start = nextstart;
        }
        Err(Error::TooManyAttempts)
    }

    fn save_trigger_info(
        &mut self,
        trig: &Trigger,
        tt: &TimeTrig,
        result: i32,
    ) {
        self.last_trigger = Some(LastTrigger {
            trig: trig.clone(),
            tt: tt.clone(),
            date: Some(result),
            time: tt.ttime,
            valid: true,
        });
    }

    /// Top-level trigger computation with multi-day-duration folding:
    /// a long event that began before today still triggers today, with
    /// the AT clause rewritten to start at midnight and the original
    /// kept in `eventstart`/`eventduration`.
    pub fn compute_trigger(
        &mut self,
        today: i32,
        trig: &mut Trigger,
        tt: &mut TimeTrig,
        save_in_globals: bool,
    ) -> Result<Option<i32>, Error> {
        let first = self.compute_trigger_no_adjust(
            today,
            trig,
            tt,
            save_in_globals,
            0,
        )?;
        if first == Some(today) {
            if let Some(ttime) = tt.ttime {
                trig.eventstart = Some(
                    today as i64 * date::MINUTES_PER_DAY as i64
                        + ttime as i64,
                );
                trig.eventduration = tt.duration;
            }
            if save_in_globals {
                self.save_trigger_info(trig, tt, today);
            }
            return Ok(Some(today));
        }
        let mut result = first;
        if trig.duration_days > 0 {
            result = self.compute_trigger_no_adjust(
                today,
                trig,
                tt,
                save_in_globals,
                trig.duration_days,
            )?;
        }
        let r = match result {
            Some(r) => r,
            None => return Ok(None),
        };
        if let Some(ttime) = tt.ttime {
            trig.eventstart = Some(
                r as i64 * date::MINUTES_PER_DAY as i64 + ttime as i64,
            );
            if tt.duration.is_some() {
                trig.eventduration = tt.duration;
            }
        }
        let mut adjusted = r;
        if r < today && r + trig.duration_days >= today {
            if let (Some(ttime), Some(duration)) = (tt.ttime, tt.duration)
            {
                tt.duration = Some(
                    duration - (today - r) * date::MINUTES_PER_DAY
                        + ttime as i32,
                );
            }
            tt.ttime = Some(0);
            adjusted = today;
        }
        if save_in_globals {
            self.save_trigger_info(trig, tt, adjusted);
        }
        Ok(Some(adjusted))
    }

    /// `evaltrig("...")`: compute a spec's next date without touching
    /// the global last-trigger record.
    pub fn evaltrig(
        &mut self,
        spec: &str,
        start: i32,
    ) -> Result<Value, Error> {
        let saved = self.last_trigger.take();
        let result = (|| {
            let (mut trig, mut tt, _body) = self.parse_rem_clause(spec)?;
            let base = trig.scanfrom.unwrap_or(start);
            self.compute_trigger(base, &mut trig, &mut tt, false)
        })();
        self.last_trigger = saved;
        match result? {
            Some(d) => Ok(Value::Date(d)),
            None => Ok(Value::Int(-1)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_engine;

    fn serial(y: i32, m: u32, d: u32) -> i32 {
        date::dse(y, m, d).unwrap()
    }

    fn compute(
        engine: &mut Engine,
        spec: &str,
        today: i32,
    ) -> Result<Option<i32>, Error> {
        let (mut trig, mut tt, _) = engine.parse_rem_clause(spec).unwrap();
        // The solver scans from SCANFROM when one is given, exactly as
        // the statement handler does.
        let base = trig.scanfrom.unwrap_or(today);
        engine.compute_trigger(base, &mut trig, &mut tt, true)
    }

    #[test]
    fn fixed_date_matches_only_that_day() {
        let mut engine = test_engine();
        let target = serial(2030, 1, 1);
        assert_eq!(
            compute(&mut engine, "Jan 1 2030 MSG Hi", serial(2029, 12, 31))
                .unwrap(),
            Some(target)
        );
        assert_eq!(
            compute(&mut engine, "Jan 1 2030 MSG Hi", target).unwrap(),
            Some(target)
        );
        assert_eq!(
            compute(&mut engine, "Jan 1 2030 MSG Hi", serial(2030, 1, 2))
                .unwrap(),
            None
        );
    }

    #[test]
    fn weekday_only_advances_to_next() {
        let mut engine = test_engine();
        // 2030-01-01 is a Tuesday; next Friday is 2030-01-04.
        assert_eq!(
            compute(&mut engine, "Fri MSG F", serial(2030, 1, 1)).unwrap(),
            Some(serial(2030, 1, 4))
        );
        // On a Friday it matches the same day.
        assert_eq!(
            compute(&mut engine, "Fri MSG F", serial(2030, 1, 4)).unwrap(),
            Some(serial(2030, 1, 4))
        );
    }

    #[test]
    fn day_only_rolls_to_next_month() {
        let mut engine = test_engine();
        assert_eq!(
            compute(&mut engine, "15 MSG x", serial(2030, 1, 16)).unwrap(),
            Some(serial(2030, 2, 15))
        );
        assert_eq!(
            compute(&mut engine, "31 MSG x", serial(2030, 2, 1)).unwrap(),
            Some(serial(2030, 3, 31))
        );
    }

    #[test]
    fn day_plus_weekday_first_fit() {
        let mut engine = test_engine();
        // "Mon 15": first Monday on or after the 15th.
        // In March 2030 the 15th is a Friday; the following Monday is
        // the 18th.
        assert_eq!(
            compute(&mut engine, "Mon 15 MSG x", serial(2030, 3, 1))
                .unwrap(),
            Some(serial(2030, 3, 18))
        );
    }

    #[test]
    fn bad_date_is_an_error() {
        let mut engine = test_engine();
        assert_eq!(
            compute(&mut engine, "Feb 30 2030 MSG x", serial(2030, 1, 1)),
            Err(Error::BadDate)
        );
    }

    #[test]
    fn rep_requires_full_date() {
        let mut engine = test_engine();
        assert_eq!(
            compute(&mut engine, "Mon *7 MSG x", serial(2030, 1, 1)),
            Err(Error::RepNeedsFullDate)
        );
    }

    #[test]
    fn rep_advances_in_period_multiples() {
        let mut engine = test_engine();
        let base = serial(2030, 1, 1);
        // Every 10 days from Jan 1.
        assert_eq!(
            compute(&mut engine, "Jan 1 2030 *10 MSG x", base + 25)
                .unwrap(),
            Some(base + 30)
        );
        assert_eq!(
            compute(&mut engine, "Jan 1 2030 *10 MSG x", base + 30)
                .unwrap(),
            Some(base + 30)
        );
    }

    #[test]
    fn skip_suppresses_omitted_date() {
        let mut engine = test_engine();
        engine.process_line("OMIT Jan 1 2031").unwrap();
        assert_eq!(
            compute(
                &mut engine,
                "Jan 1 2031 SKIP MSG x",
                serial(2031, 1, 1)
            )
            .unwrap(),
            None
        );
    }

    #[test]
    fn before_backs_off_omitted_date() {
        let mut engine = test_engine();
        engine.process_line("OMIT Jan 1 2031").unwrap();
        assert_eq!(
            compute(
                &mut engine,
                "Jan 1 2031 BEFORE MSG x",
                serial(2030, 12, 1)
            )
            .unwrap(),
            Some(serial(2030, 12, 31))
        );
    }

    #[test]
    fn after_jumps_over_omitted_block() {
        let mut engine = test_engine();
        engine.process_line("OMIT Jan 1 2031").unwrap();
        engine.process_line("OMIT Jan 2 2031").unwrap();
        assert_eq!(
            compute(
                &mut engine,
                "Jan 1 2031 AFTER MSG x",
                serial(2030, 12, 1)
            )
            .unwrap(),
            Some(serial(2031, 1, 3))
        );
    }

    #[test]
    fn back_skips_omitted_days() {
        let mut engine = test_engine();
        // Pull back two working days from Monday 2030-01-07 over the
        // weekend mask.
        assert_eq!(
            compute(
                &mut engine,
                "Jan 7 2030 OMIT Sat Sun -2 MSG x",
                serial(2030, 1, 1)
            )
            .unwrap(),
            Some(serial(2030, 1, 3))
        );
        // Literal back (--2) counts weekend days too.
        assert_eq!(
            compute(
                &mut engine,
                "Jan 7 2030 OMIT Sat Sun --2 MSG x",
                serial(2030, 1, 1)
            )
            .unwrap(),
            Some(serial(2030, 1, 5))
        );
    }

    #[test]
    fn until_expires() {
        let mut engine = test_engine();
        assert_eq!(
            compute(
                &mut engine,
                "Mon UNTIL Jan 10 2030 MSG x",
                serial(2030, 1, 20)
            )
            .unwrap(),
            None
        );
    }

    #[test]
    fn from_suppresses_earlier_dates() {
        let mut engine = test_engine();
        assert_eq!(
            compute(
                &mut engine,
                "Mon FROM Jan 20 2030 MSG x",
                serial(2030, 1, 1)
            )
            .unwrap(),
            Some(serial(2030, 1, 21))
        );
    }

    #[test]
    fn duration_folds_into_today() {
        let mut engine = test_engine();
        let spec = "Jan 1 2030 AT 23:00 DURATION 26:00 MSG x";
        let (mut trig, mut tt, _) = engine.parse_rem_clause(spec).unwrap();
        let jan2 = serial(2030, 1, 2);
        let got = engine
            .compute_trigger(jan2, &mut trig, &mut tt, true)
            .unwrap();
        assert_eq!(got, Some(jan2));
        // Folded to midnight with the elapsed day removed.
        assert_eq!(tt.ttime, Some(0));
        assert_eq!(tt.duration, Some(26 * 60 - 1440 + 23 * 60));
        assert_eq!(
            trig.eventstart,
            Some(serial(2030, 1, 1) as i64 * 1440 + 23 * 60)
        );
        assert_eq!(trig.eventduration, Some(26 * 60));
    }

    #[test]
    fn every_day_omitted_is_an_error() {
        let mut engine = test_engine();
        assert_eq!(
            compute(
                &mut engine,
                "1 OMIT Mon Tue Wed Thu Fri Sat Sun MSG x",
                serial(2030, 1, 1)
            ),
            Err(Error::TooManyLocalOmits)
        );
    }

    #[test]
    fn evaltrig_preserves_last_trigger() {
        let mut engine = test_engine();
        compute(&mut engine, "Jan 1 2030 MSG x", serial(2030, 1, 1))
            .unwrap();
        let before = engine.last_trigger.as_ref().map(|lt| lt.date);
        let v = engine
            .evaltrig("Feb 1 2030", serial(2030, 1, 1))
            .unwrap();
        assert_eq!(v, Value::Date(serial(2030, 2, 1)));
        assert_eq!(
            engine.last_trigger.as_ref().map(|lt| lt.date),
            before
        );
    }

    #[test]
    fn evaltrig_expired_is_minus_one() {
        let mut engine = test_engine();
        assert_eq!(
            engine
                .evaltrig("Jan 1 2030", serial(2031, 1, 1))
                .unwrap(),
            Value::Int(-1)
        );
    }
}
