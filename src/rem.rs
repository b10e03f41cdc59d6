use remindee_script::{date, BodyType, TimeTrig, Trigger};

use crate::engine::{CalEntry, Engine, OutputMode};
use crate::err::Error;
use crate::queue::QueueEntry;
use crate::sortbuf::SortEntry;

fn slash_date(serial: i32) -> String {
    let (y, m, d) = date::from_dse(serial);
    format!("{:04}/{:02}/{:02}", y, m, d)
}

impl Engine {
    /// The REM statement: parse the clause, solve for the trigger
    /// date, then emit and/or queue as the mode dictates.
    pub fn do_rem(
        &mut self,
        clause: &str,
        _implicit: bool,
    ) -> Result<(), Error> {
        let (mut trig, mut tt, body) = self.parse_rem_clause(clause)?;
        if trig.typ == BodyType::Sat {
            return self.do_satisfy(&trig, &tt, body.as_deref());
        }
        let base = trig.scanfrom.unwrap_or(self.today);
        let computed =
            match self.compute_trigger(base, &mut trig, &mut tt, true) {
                Ok(d) => d,
                Err(err) => {
                    if trig.maybe_uncomputable {
                        return Ok(());
                    }
                    return Err(err);
                }
            };
        let d = match computed {
            Some(d) => d,
            None => return Ok(()),
        };
        if self.debug_flags & crate::engine::DB_PRTTRIG != 0 {
            let (y, m, dd) = date::from_dse(d);
            self.warn(&format!(
                "Trig = {}, {} {}, {}",
                date::day_name(d),
                dd,
                date::month_name(m),
                y
            ));
        }
        if trig.addomit {
            self.omits.add_full(d)?;
        }
        if trig.once && !self.tunables.ignore_once {
            self.saw_once = true;
            if self.once_date == self.today {
                return Ok(());
            }
        }
        let body = body.unwrap_or_default();

        if self.mode == OutputMode::Next {
            if d >= self.today && trig.typ != BodyType::Passthru {
                let text = self.substitute(&body, &trig, &tt, d)?;
                let (plain, _) = self.split_calendar_body(&text);
                let line = format!("{} {}", slash_date(d), plain);
                self.emit(&line);
            }
            return Ok(());
        }

        if self.cal_collect.is_some() {
            if d == self.today {
                self.collect_cal_entry(&trig, &tt, &body, d)?;
            }
            return Ok(());
        }

        let in_window = self.delta_window_covers(&trig, d)?;
        let timed_visible = self.timed_visible_now(&tt, d);

        // Timed reminders for today go to the queue regardless of
        // whether they also print now.
        if tt.ttime.is_some()
            && d == self.today
            && !trig.noqueue
            && !self.tunables.dont_queue
            && self.mode == OutputMode::Normal
        {
            self.push_queue_entry(&trig, &tt, &body);
        }

        if !(d == self.today && timed_visible || d != self.today && in_window)
        {
            return Ok(());
        }

        match trig.typ {
            // A clause without a reminder type computes its trigger
            // (for trigdate() and friends) but prints nothing.
            BodyType::None => {}
            BodyType::Msg | BodyType::Msf => {
                let text = self.substitute(&body, &trig, &tt, d)?;
                let (mut plain, _) = self.split_calendar_body(&text);
                if trig.typ == BodyType::Msf {
                    plain = self.fill_paragraph(&plain);
                }
                self.emit_reminder(&trig, &tt, d, &plain);
            }
            BodyType::Run => {
                if d != self.today {
                    return Ok(());
                }
                if !self.run_allowed() {
                    return Err(Error::RunDisabled);
                }
                let text = self.substitute(&body, &trig, &tt, d)?;
                let (plain, _) = self.split_calendar_body(&text);
                if self.dedupe_suppressed(&tt, d, &plain) {
                    return Ok(());
                }
                self.num_triggered += 1;
                let status = std::process::Command::new("sh")
                    .arg("-c")
                    .arg(&plain)
                    .status();
                if let Err(err) = status {
                    self.warn(&format!("Can't run command: {}", err));
                }
            }
            // Calendar-layer reminders produce nothing in normal mode.
            BodyType::Cal
            | BodyType::Ps
            | BodyType::PsFile
            | BodyType::Passthru => {}
            BodyType::Sat => unreachable!("handled above"),
        }
        Ok(())
    }

    /// SATISFY: scan forward for the first trigger date on which the
    /// body expression is true, leaving it in the last-trigger record.
    fn do_satisfy(
        &mut self,
        trig: &Trigger,
        tt: &TimeTrig,
        body: Option<&str>,
    ) -> Result<(), Error> {
        let expr_src = match body {
            Some(src) if !src.trim().is_empty() => src.to_owned(),
            _ => {
                return Err(Error::Parse(
                    remindee_script::ParseError::Expected(
                        "expression after SATISFY",
                    ),
                ))
            }
        };
        let mut base = trig.scanfrom.unwrap_or(self.today);
        for _ in 0..self.tunables.max_sat_iter {
            let mut t2 = trig.clone();
            t2.maybe_uncomputable = true;
            t2.typ = BodyType::Sat;
            let mut tt2 = tt.clone();
            let candidate =
                match self.compute_trigger(base, &mut t2, &mut tt2, true) {
                    Ok(Some(d)) => d,
                    Ok(None) => return Ok(()),
                    Err(_) => return Ok(()),
                };
            let v = self.eval_bracketed_or_bare(&expr_src)?;
            if v.is_true() {
                return Ok(());
            }
            base = candidate + 1;
        }
        Err(Error::CantComputeTrigger)
    }

    /// Is `d` within the advance-warning window?  Positive deltas count
    /// only non-omitted days, negative ones every day.
    fn delta_window_covers(
        &mut self,
        trig: &Trigger,
        d: i32,
    ) -> Result<bool, Error> {
        if d <= self.today {
            return Ok(d == self.today);
        }
        if let Some(wname) = trig.warn.clone() {
            if self.funcs.get(&wname).is_some() {
                return self.warn_window_covers(&wname, d);
            }
        }
        let delta = match trig.delta {
            Some(delta) => delta,
            None => self.tunables.default_delta,
        };
        if delta == 0 {
            return Ok(false);
        }
        if delta < 0 {
            return Ok(d - self.today <= -delta);
        }
        let mut moves = 0;
        let mut day = self.today;
        while day < d {
            day += 1;
            if !self.is_omitted_for(day, trig)? {
                moves += 1;
            }
            if moves > delta {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// WARN function: warnfn(1), warnfn(2), ... give the advance-warn
    /// offsets in days; scanning stops at the first non-positive one.
    fn warn_window_covers(
        &mut self,
        wname: &str,
        d: i32,
    ) -> Result<bool, Error> {
        let lname = wname.to_ascii_lowercase();
        for n in 1..=100i64 {
            let days = match self
                .call_user_func(&lname, vec![remindee_script::Value::Int(n)])
            {
                Ok(remindee_script::Value::Int(days)) => days,
                Ok(_) => break,
                Err(err) => {
                    self.error(&err);
                    break;
                }
            };
            if days <= 0 {
                break;
            }
            if self.today + days as i32 == d {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Should a timed reminder print during the main phase right now?
    fn timed_visible_now(&self, tt: &TimeTrig, d: i32) -> bool {
        let ttime = match tt.ttime {
            Some(t) => t,
            None => return true,
        };
        if d != self.today {
            return true;
        }
        if self.tunables.dont_trig_ats && ttime > self.now_min {
            return false;
        }
        let tdelta = tt
            .delta
            .map(|v| v.unsigned_abs() as i32)
            .unwrap_or(self.tunables.default_tdelta);
        self.now_min as i32 >= ttime as i32 - tdelta
    }

    fn dedupe_suppressed(
        &mut self,
        tt: &TimeTrig,
        d: i32,
        body: &str,
    ) -> bool {
        self.tunables.dedupe_reminders
            && self.dedupe.check_and_insert(d, tt.ttime, body)
    }

    fn emit_reminder(
        &mut self,
        trig: &Trigger,
        tt: &TimeTrig,
        d: i32,
        body: &str,
    ) {
        if self.dedupe_suppressed(tt, d, body) {
            return;
        }
        self.num_triggered += 1;
        if !self.banner_done && self.mode == OutputMode::Normal {
            self.banner_done = true;
            if !self.banner.trim().is_empty() {
                let today = self.today;
                let banner = self.banner.clone();
                match self.substitute_simple(&banner, today) {
                    Ok(text) => self.emit(&text),
                    Err(err) => {
                        let e = err;
                        self.error(&e);
                    }
                }
            }
        }
        if self.tunables.prefix_line_no {
            let info = format!(
                "# fileinfo {} {}",
                self.cur_line, self.cur_file
            );
            self.emit(&info);
        }
        if self.sortbuf.is_active() {
            self.sortbuf.push(SortEntry {
                date: d,
                time: tt.ttime,
                priority: trig.priority,
                body: body.to_owned(),
                typ: trig.typ,
                seq: 0,
            });
        } else {
            self.emit(body);
        }
    }

    fn collect_cal_entry(
        &mut self,
        trig: &Trigger,
        tt: &TimeTrig,
        body: &str,
        d: i32,
    ) -> Result<(), Error> {
        if matches!(trig.typ, BodyType::Run | BodyType::None) {
            return Ok(());
        }
        self.nonconst_flag = false;
        let text = self.substitute(body, trig, tt, d)?;
        let nonconst = self.nonconst_flag;
        let (plain, region) = self.split_calendar_body(&text);
        let entry = CalEntry {
            date: d,
            passthru: trig.passthru.clone(),
            tags: trig.tags.clone(),
            infos: trig.infos.clone(),
            duration: tt.duration,
            time: tt.ttime,
            priority: trig.priority,
            rawbody: body.to_owned(),
            body: plain.clone(),
            calendar_body: region,
            plain_body: plain,
            nonconst_expr: nonconst,
            if_depth: self.ifstack.depth(),
        };
        if let Some(ref mut collected) = self.cal_collect {
            collected.push(entry);
        }
        Ok(())
    }

    fn push_queue_entry(
        &mut self,
        trig: &Trigger,
        tt: &TimeTrig,
        body: &str,
    ) {
        let qid = self.next_qid;
        self.next_qid += 1;
        let run_disabled = self.run_disabled
            | if self.cur_line_notowner {
                crate::engine::RUN_NOTOWNER
            } else {
                0
            };
        self.queue.push(QueueEntry {
            qid,
            trig: trig.clone(),
            tt: tt.clone(),
            body: body.to_owned(),
            filename: self.cur_file.clone(),
            line_no: self.cur_line,
            ntrig: 0,
            run_disabled,
            fired_once: false,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_engine;

    fn serial(y: i32, m: u32, d: u32) -> i32 {
        date::dse(y, m, d).unwrap()
    }

    fn run_day(
        engine: &mut Engine,
        today: i32,
        lines: &[&str],
    ) -> Vec<String> {
        engine.today = today;
        engine.capture = Some(vec![]);
        engine.banner = String::new();
        for line in lines {
            engine.nodes_this_line = 0;
            if let Err(err) = engine.process_line(line) {
                let e = err;
                engine.error(&e);
            }
        }
        engine.flush_sortbuf();
        engine.capture.take().unwrap()
    }

    #[test]
    fn fires_only_on_the_day() {
        let mut engine = test_engine();
        let lines = ["REM Jan 1 2030 MSG Hi"];
        assert!(run_day(&mut engine, serial(2029, 12, 31), &lines)
            .is_empty());
        assert_eq!(
            run_day(&mut engine, serial(2030, 1, 1), &lines),
            vec!["Hi"]
        );
        assert!(
            run_day(&mut engine, serial(2030, 1, 2), &lines).is_empty()
        );
    }

    #[test]
    fn weekday_reminder_today_and_next_mode() {
        let mut engine = test_engine();
        // 2030-01-04 is a Friday.
        assert_eq!(
            run_day(&mut engine, serial(2030, 1, 4), &["REM Fri MSG F"]),
            vec!["F"]
        );
        // Thursday: nothing in normal mode...
        assert!(run_day(&mut engine, serial(2030, 1, 3), &["REM Fri MSG F"])
            .is_empty());
        // ...but next-mode lists the coming Friday.
        engine.mode = OutputMode::Next;
        assert_eq!(
            run_day(&mut engine, serial(2030, 1, 3), &["REM Fri MSG F"]),
            vec!["2030/01/04 F"]
        );
    }

    #[test]
    fn skip_and_before_with_omit() {
        let mut engine = test_engine();
        let lines =
            ["OMIT Jan 1 2031", "REM Jan 1 2031 SKIP MSG x"];
        assert!(run_day(&mut engine, serial(2031, 1, 1), &lines)
            .is_empty());
        let mut engine = test_engine();
        let lines =
            ["OMIT Jan 1 2031", "REM Jan 1 2031 BEFORE MSG x"];
        assert_eq!(
            run_day(&mut engine, serial(2030, 12, 31), &lines),
            vec!["x"]
        );
    }

    #[test]
    fn body_expression_from_variable() {
        let mut engine = test_engine();
        let lines = ["SET x = [2+3*4]", "REM Jan 1 2030 MSG %[x]"];
        let out = run_day(&mut engine, serial(2030, 1, 1), &lines);
        assert_eq!(out, vec!["14"]);
    }

    #[test]
    fn delta_window_counts_non_omitted() {
        let mut engine = test_engine();
        // Friday 2030-01-04 with +2: Thursday is 1 step away.
        assert_eq!(
            run_day(
                &mut engine,
                serial(2030, 1, 3),
                &["REM Jan 4 2030 +2 MSG soon"]
            ),
            vec!["soon"]
        );
        // 3 non-omitted steps away: outside the +2 window.
        assert!(run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 4 2030 +2 MSG soon"]
        )
        .is_empty());
        // With weekends omitted, Monday 2030-01-07 is 2 working days
        // from Thursday the 3rd.
        assert_eq!(
            run_day(
                &mut engine,
                serial(2030, 1, 3),
                &["REM Jan 7 2030 OMIT Sat Sun +2 MSG soon"]
            ),
            vec!["soon"]
        );
    }

    #[test]
    fn timed_reminder_queues_but_prints_only_in_window() {
        let mut engine = test_engine();
        engine.now_min = 9 * 60;
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 1 2030 AT 17:00 MSG tea"],
        );
        assert!(out.is_empty());
        assert_eq!(engine.queue.len(), 1);
        // Within the AT delta window it prints too.
        let mut engine = test_engine();
        engine.now_min = 16 * 60 + 45;
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 1 2030 AT 17:00 +30 MSG tea"],
        );
        assert_eq!(out, vec!["tea"]);
    }

    #[test]
    fn noqueue_respected() {
        let mut engine = test_engine();
        run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 1 2030 AT 17:00 NOQUEUE MSG x"],
        );
        assert!(engine.queue.is_empty());
    }

    #[test]
    fn sorting_by_time() {
        let mut engine = test_engine();
        engine.now_min = 23 * 60;
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &[
                "SET $SortByTime 1",
                "REM Jan 1 2030 AT 12:00 NOQUEUE MSG noon",
                "REM Jan 1 2030 AT 08:00 NOQUEUE MSG morning",
            ],
        );
        assert_eq!(out, vec!["morning", "noon"]);
    }

    #[test]
    fn dedupe_suppresses_identical() {
        let mut engine = test_engine();
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &[
                "SET $DedupeReminders 1",
                "REM Jan 1 2030 MSG same",
                "REM Jan 1 2030 MSG same",
            ],
        );
        assert_eq!(out, vec!["same"]);
    }

    #[test]
    fn banner_appears_before_first_reminder() {
        let mut engine = test_engine();
        engine.today = serial(2030, 1, 1);
        engine.capture = Some(vec![]);
        for line in [
            "BANNER Reminders for %w:",
            "REM Jan 1 2030 MSG one",
            "REM Jan 1 2030 MSG two",
        ] {
            engine.process_line(line).unwrap();
        }
        let out = engine.capture.take().unwrap();
        assert_eq!(
            out,
            vec!["Reminders for Tuesday:", "one", "two"]
        );
    }

    #[test]
    fn satisfy_sets_last_trigger() {
        let mut engine = test_engine();
        engine.today = serial(2030, 1, 1);
        // First Saturday of 2030 is Jan 5.
        engine
            .process_line(
                "REM Sat SATISFY [trigdate() > date(2030, 1, 1)]",
            )
            .unwrap();
        let lt = engine.last_trigger.as_ref().unwrap();
        assert_eq!(lt.date, Some(serial(2030, 1, 5)));
    }

    #[test]
    fn once_respects_timestamp_file() {
        let mut engine = test_engine();
        engine.today = serial(2030, 1, 1);
        engine.once_date = serial(2030, 1, 1);
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 1 2030 ONCE MSG o"],
        );
        assert!(out.is_empty());
        assert!(engine.saw_once);
        // A different recorded day lets it fire.
        let mut engine = test_engine();
        engine.once_date = serial(2029, 12, 31);
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 1 2030 ONCE MSG o"],
        );
        assert_eq!(out, vec!["o"]);
    }

    #[test]
    fn addomit_feeds_later_reminders() {
        let mut engine = test_engine();
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &[
                "REM Jan 1 2030 ADDOMIT MSG holiday",
                "REM Jan 1 2030 SKIP MSG work",
            ],
        );
        assert_eq!(out, vec!["holiday"]);
    }

    #[test]
    fn templated_reminder_lines() {
        use std::collections::HashMap;
        use strfmt::strfmt;
        let vars = HashMap::from([
            ("month".to_owned(), "Jan".to_owned()),
            ("day".to_owned(), "1".to_owned()),
            ("year".to_owned(), "2030".to_owned()),
            ("desc".to_owned(), "templated".to_owned()),
        ]);
        let line =
            strfmt("REM {month} {day} {year} MSG {desc}", &vars).unwrap();
        let mut engine = test_engine();
        assert_eq!(
            run_day(&mut engine, serial(2030, 1, 1), &[line.as_str()]),
            vec!["templated"]
        );
    }

    #[test]
    fn warn_function_drives_advance_warnings() {
        let mut engine = test_engine();
        let lines = [
            "FSET w(n) = iif(n==1, 7, n==2, 3, 0)",
            "REM Jan 8 2030 WARN w MSG soon",
        ];
        // 7 days before Jan 8 is Jan 1.
        assert_eq!(
            run_day(&mut engine, serial(2030, 1, 1), &lines),
            vec!["soon"]
        );
        // 3 days before is Jan 5.
        assert_eq!(
            run_day(&mut engine, serial(2030, 1, 5), &lines),
            vec!["soon"]
        );
        // 5 days before is not a listed offset.
        assert!(
            run_day(&mut engine, serial(2030, 1, 3), &lines).is_empty()
        );
    }

    #[test]
    fn run_disabled_is_an_error() {
        let mut engine = test_engine();
        engine.run_disabled = crate::engine::RUN_CMDLINE;
        let out = run_day(
            &mut engine,
            serial(2030, 1, 1),
            &["REM Jan 1 2030 RUN echo hi"],
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("RUN is disabled"));
    }
}
