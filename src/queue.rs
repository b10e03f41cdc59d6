use std::io::Write as _;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use remindee_script::{date, BodyType, TimeTrig, Trigger, Value};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::engine::{Engine, LastTrigger};
use crate::err::Error;

/// One timed reminder waiting to fire.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub qid: u64,
    pub trig: Trigger,
    pub tt: TimeTrig,
    /// Unsubstituted body; substitution happens at fire time.
    pub body: String,
    pub filename: String,
    pub line_no: u32,
    pub ntrig: i32,
    pub run_disabled: u8,
    pub fired_once: bool,
}

/// The JSON frame emitted when a queued reminder fires.
#[derive(Serialize)]
struct ReminderFrame<'a> {
    response: &'static str,
    qid: String,
    ttime: String,
    now: String,
    tags: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<serde_json::Map<String, serde_json::Value>>,
    body: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Queue drained (or rolled past midnight) in one-shot mode.
    Done,
    /// Source changed or the date rolled over; run the main phase
    /// again and come back.
    Reread,
    Exit(i32),
}

fn wall_clock() -> (i32, i32) {
    let now = Local::now();
    let serial =
        date::dse(now.year(), now.month(), now.day()).unwrap_or(0);
    (serial, (now.hour() * 60 + now.minute()) as i32)
}

fn format_qid(engine: &Engine, qid: u64) -> String {
    if engine.test_mode {
        "42424242".to_owned()
    } else {
        format!("{:x}", qid)
    }
}

fn minute_str(t: i32) -> String {
    format!("{:02}:{:02}", t / 60, t % 60)
}

impl Engine {
    /// Next firing minute for a queue entry.  `prev` is the previous
    /// `nexttime` (start with now-1); `None` means the entry is spent.
    pub fn calculate_next_time(
        &mut self,
        entry: &mut QueueEntry,
        prev: i32,
    ) -> Option<u16> {
        entry.ntrig += 1;
        if let Some(sched) = entry.trig.sched.clone() {
            if self.funcs.get(&sched).is_some() {
                if let Some(t) = self.next_time_from_sched(entry, prev) {
                    return Some(t);
                }
                entry.trig.sched = None;
            }
        }
        let tim = entry.tt.ttime? as i32;
        let curtime = prev + 1;
        let delta = match entry.tt.delta {
            None | Some(0) => {
                return if tim < curtime {
                    None
                } else {
                    Some(tim as u16)
                }
            }
            Some(delta) => delta.abs(),
        };
        let rep = entry.tt.rep.unwrap_or(delta).max(1);
        let mut t = tim - delta;
        if t < curtime {
            t += ((curtime - t) / rep) * rep;
        }
        if t < curtime {
            t += rep;
        }
        if t > tim {
            t = tim;
        }
        if t < curtime {
            None
        } else {
            Some(t as u16)
        }
    }

    /// Ask the user's sched() function for the next time.  A TIME
    /// result is absolute; a positive INT advances from the previous
    /// result, a non-positive INT offsets the AT time.
    fn next_time_from_sched(
        &mut self,
        entry: &mut QueueEntry,
        prev: i32,
    ) -> Option<u16> {
        let sched = entry.trig.sched.clone()?;
        let saved_run = self.run_disabled;
        self.run_disabled = entry.run_disabled;
        let mut last_time: i32 = -1;
        let result = loop {
            let v = match self.call_user_func(
                &sched.to_ascii_lowercase(),
                vec![Value::Int(entry.ntrig as i64)],
            ) {
                Ok(v) => v,
                Err(_) => break None,
            };
            let this_time = match v {
                Value::Time(t) => t as i32,
                Value::Int(n) if n > 0 => {
                    if last_time >= 0 {
                        last_time + n as i32
                    } else {
                        prev + n as i32
                    }
                }
                Value::Int(n) => match entry.tt.ttime {
                    Some(t) => t as i32 + n as i32,
                    None => break None,
                },
                _ => break None,
            };
            let this_time =
                this_time.clamp(0, date::MINUTES_PER_DAY - 1);
            if this_time > prev {
                break Some(this_time as u16);
            }
            if this_time <= last_time {
                break None;
            }
            last_time = this_time;
            entry.ntrig += 1;
        };
        self.run_disabled = saved_run;
        result
    }

    fn queue_json_entries(&self) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = self
            .queue
            .iter()
            .filter(|q| q.tt.nexttime.is_some())
            .map(|q| {
                json!({
                    "qid": format_qid(self, q.qid),
                    "ttime": q.tt.ttime.map(|t| minute_str(t as i32)),
                    "nexttime":
                        q.tt.nexttime.map(|t| minute_str(t as i32)),
                    "body": q.body,
                    "fname": q.filename,
                    "lineno": q.line_no,
                    "tags": q.trig.tags.join(","),
                })
            })
            .collect();
        serde_json::Value::Array(entries)
    }

    fn print_num_queued(&mut self) {
        let nqueued = self
            .queue
            .iter()
            .filter(|q| q.tt.nexttime.is_some())
            .count();
        if self.json_mode {
            let line = format!(
                "{{\"response\":\"queued\",\"nqueued\":{},\"command\":\"STATUS\"}}",
                nqueued
            );
            self.emit(&line);
        } else {
            let line = format!("NOTE queued {}", nqueued);
            self.emit(&line);
        }
        let _ = std::io::stdout().flush();
    }

    /// One line of the server-mode control protocol.
    pub fn handle_server_command(
        &mut self,
        line: &str,
    ) -> Option<QueueOutcome> {
        let line = line.trim();
        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        match cmd.to_ascii_uppercase().as_str() {
            "STATUS" => {
                self.print_num_queued();
                None
            }
            "QUEUE" => {
                if self.json_mode {
                    let payload = json!({
                        "response": "queue",
                        "queue": self.queue_json_entries(),
                    });
                    self.emit(&payload.to_string());
                } else {
                    self.emit("NOTE queue");
                    let lines: Vec<String> = self
                        .queue
                        .iter()
                        .filter(|q| q.tt.nexttime.is_some())
                        .map(|q| {
                            format!(
                                "{} {} {} {}",
                                format_qid(self, q.qid),
                                q.tt.nexttime
                                    .map(|t| minute_str(t as i32))
                                    .unwrap_or_default(),
                                q.tt.ttime
                                    .map(|t| minute_str(t as i32))
                                    .unwrap_or_default(),
                                q.body
                            )
                        })
                        .collect();
                    for line in lines {
                        self.emit(&line);
                    }
                    self.emit("NOTE endqueue");
                }
                None
            }
            "JSONQUEUE" => {
                let body = self.queue_json_entries().to_string();
                if self.json_mode {
                    self.emit(&body);
                } else {
                    self.emit("NOTE JSONQUEUE");
                    self.emit(&body);
                    self.emit("NOTE ENDJSONQUEUE");
                }
                None
            }
            "DEL" => {
                let target = arg.to_ascii_lowercase();
                let before = self.queue.len();
                let test_mode = self.test_mode;
                self.queue.retain(|q| {
                    let qid = if test_mode {
                        "42424242".to_owned()
                    } else {
                        format!("{:x}", q.qid)
                    };
                    qid != target
                });
                if self.queue.len() == before {
                    log::debug!("DEL: no such queue id {}", arg);
                }
                self.print_num_queued();
                None
            }
            "REREAD" => {
                if self.json_mode {
                    self.emit("{\"response\":\"reread\"}");
                } else {
                    self.emit("NOTE reread");
                }
                Some(QueueOutcome::Reread)
            }
            "EXIT" => Some(QueueOutcome::Exit(0)),
            "TRANSLATE" => {
                if arg.eq_ignore_ascii_case("dump")
                    || arg.is_empty() && cmd == "TRANSLATE_DUMP"
                {
                    return self.handle_server_command("TRANSLATE_DUMP");
                }
                match self.translations.lookup_fuzzy(arg) {
                    Some(translated) => {
                        let payload = json!({
                            "response": "translate",
                            "english": arg,
                            "translated": translated,
                        });
                        self.emit(&payload.to_string());
                    }
                    None => log::debug!("no translation for {}", arg),
                }
                None
            }
            "TRANSLATE_DUMP" => {
                if self.json_mode {
                    let payload = json!({
                        "response": "translate_dump",
                        "translations": self.translations.dump_json(),
                    });
                    self.emit(&payload.to_string());
                } else {
                    self.emit("NOTE TRANSLATE_DUMP");
                    let text = self.translations.dump_text();
                    for line in text.lines() {
                        let owned = line.to_owned();
                        self.emit(&owned);
                    }
                    self.emit("NOTE ENDTRANSLATE_DUMP");
                }
                None
            }
            other => {
                if self.json_mode {
                    let payload = json!({
                        "response": "error",
                        "error": format!("Unknown command: {}", other),
                    });
                    self.emit(&payload.to_string());
                } else {
                    let line =
                        format!("NOTE error Unknown command: {}", other);
                    self.emit(&line);
                }
                None
            }
        }
    }

    /// Fire one queue entry: frame it for the protocol, substitute the
    /// body, run or print it.
    fn fire_entry(&mut self, idx: usize, now_min: i32, server_mode: bool) {
        let mut entry = self.queue[idx].clone();
        entry.fired_once = true;
        self.last_trigger = Some(LastTrigger {
            trig: entry.trig.clone(),
            tt: entry.tt.clone(),
            date: Some(self.today),
            time: entry.tt.ttime,
            valid: true,
        });
        self.cur_file = entry.filename.clone();
        self.cur_line = entry.line_no;
        let saved_run = self.run_disabled;
        self.run_disabled = entry.run_disabled;
        let body = self
            .substitute(&entry.body, &entry.trig, &entry.tt, self.today)
            .map(|text| self.split_calendar_body(&text).0)
            .unwrap_or_else(|err| format!("{}", err));
        self.run_disabled = saved_run;

        if entry.trig.typ == BodyType::Run {
            if entry.run_disabled == 0 {
                let _ = std::process::Command::new("sh")
                    .arg("-c")
                    .arg(&body)
                    .status();
            }
        } else if server_mode {
            let ttime = entry.tt.ttime.unwrap_or(0) as i32;
            if self.json_mode {
                let info = if entry.trig.infos.is_empty() {
                    None
                } else {
                    Some(
                        entry
                            .trig
                            .infos
                            .iter()
                            .map(|(k, v)| (k.clone(), json!(v)))
                            .collect(),
                    )
                };
                let frame = ReminderFrame {
                    response: "reminder",
                    qid: format_qid(self, entry.qid),
                    ttime: minute_str(ttime),
                    now: minute_str(now_min),
                    tags: entry.trig.tags.join(","),
                    info,
                    body: body.trim_end_matches('\n'),
                };
                match serde_json::to_string(&frame) {
                    Ok(line) => self.emit(&line),
                    Err(err) => log::error!("encode frame: {}", err),
                }
            } else {
                let tags = if entry.trig.tags.is_empty() {
                    "*".to_owned()
                } else {
                    entry.trig.tags.join(",")
                };
                let head = format!(
                    "NOTE reminder {} {} {}",
                    minute_str(ttime),
                    minute_str(now_min),
                    tags
                );
                self.emit(&head);
                for line in body.lines() {
                    let owned = line.to_owned();
                    self.emit(&owned);
                }
                self.emit("NOTE endreminder");
            }
        } else {
            self.emit(&body);
        }
        let _ = std::io::stdout().flush();
        self.queue[idx] = entry;
    }

    /// Initialize every entry's first firing minute.
    pub fn init_queue_times(&mut self, now_min: i32) {
        let mut entries = std::mem::take(&mut self.queue);
        for entry in &mut entries {
            entry.ntrig = -1;
            let next = self.calculate_next_time(entry, now_min - 1);
            entry.tt.nexttime = next;
        }
        entries.retain(|e| e.tt.nexttime.is_some());
        self.queue = entries;
    }

    /// Fire everything due at `now_min`, expiring spent entries.
    /// Returns whether the queue changed size (for STATUS updates).
    pub fn fire_due_entries(&mut self, now_min: i32, server_mode: bool) {
        let max_late = self.tunables.max_late_minutes;
        let mut idx = 0;
        while idx < self.queue.len() {
            let entry = &self.queue[idx];
            let next = match entry.tt.nexttime {
                Some(t) => t as i32,
                None => {
                    self.queue.remove(idx);
                    continue;
                }
            };
            if next > now_min {
                idx += 1;
                continue;
            }
            let on_time = now_min - next <= 1;
            let late_but_allowed = entry.tt.ttime == entry.tt.nexttime
                && !entry.fired_once
                && (max_late == 0 || now_min - next <= max_late);
            if on_time || late_but_allowed {
                self.fire_entry(idx, now_min, server_mode);
            }
            let mut entry = self.queue[idx].clone();
            let next = self.calculate_next_time(&mut entry, next);
            entry.tt.nexttime = next;
            let expired = match next {
                None => true,
                Some(t) => {
                    // Drop entries stranded far in the past after a
                    // suspend.
                    max_late > 0
                        && entry
                            .tt
                            .ttime
                            .map(|tt| (tt as i32) < now_min - max_late)
                            .unwrap_or(false)
                        && (t as i32) < now_min - max_late
                }
            };
            if expired {
                self.queue.remove(idx);
                if server_mode {
                    self.print_num_queued();
                }
            } else {
                self.queue[idx] = entry;
                idx += 1;
            }
        }
    }

    fn next_wakeup_minute(&self) -> Option<i32> {
        self.queue
            .iter()
            .filter_map(|q| q.tt.nexttime)
            .map(|t| t as i32)
            .min()
    }
}

fn source_mtime(path: &str) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// The queue phase: sleep until the next firing minute, waking early
/// for control commands (server mode), source-file changes, and date
/// rollover.
pub fn run_queue_phase(
    engine: &mut Engine,
    daemon: Option<i32>,
) -> Result<QueueOutcome, Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| Error::Other(format!("runtime: {}", err)))?;
    rt.block_on(queue_loop(engine, daemon))
}

async fn queue_loop(
    engine: &mut Engine,
    daemon: Option<i32>,
) -> Result<QueueOutcome, Error> {
    let server_mode = daemon == Some(0);
    let is_daemon = daemon.map(|n| n >= 0).unwrap_or(false);
    let (start_day, start_min) = wall_clock();
    engine.today = start_day;
    engine.init_queue_times(start_min);
    log::info!(
        "queue phase: {} timed reminder(s), daemon={:?}",
        engine.queue.len(),
        daemon
    );
    let initial_mtime = source_mtime(&engine.filename);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        if engine.queue.is_empty() && !is_daemon {
            return Ok(QueueOutcome::Done);
        }
        let (day, now_min) = wall_clock();
        if day != start_day {
            // Date rollover: recompute everything for the new day.
            return Ok(QueueOutcome::Reread);
        }
        let sleep_min = engine
            .next_wakeup_minute()
            .map(|next| (next - now_min).max(0))
            .unwrap_or(60);
        // Wake at least once a minute to poll mtime and rollover.
        let sleep_secs = (sleep_min as u64 * 60).clamp(1, 60);
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(sleep_secs);

        if server_mode {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(outcome) =
                                engine.handle_server_command(&line)
                            {
                                return Ok(outcome);
                            }
                        }
                        Ok(None) => return Ok(QueueOutcome::Exit(0)),
                        Err(_) => return Ok(QueueOutcome::Exit(0)),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }
        } else {
            tokio::time::sleep_until(deadline).await;
        }

        if is_daemon {
            let current = source_mtime(&engine.filename);
            if current != initial_mtime {
                log::info!("{} changed; rereading", engine.filename);
                return Ok(QueueOutcome::Reread);
            }
        }
        let (day, now_min) = wall_clock();
        if day != start_day {
            return Ok(QueueOutcome::Reread);
        }
        engine.now_min = now_min.clamp(0, 1439) as u16;
        engine.fire_due_entries(now_min, server_mode);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_engine;

    fn entry(
        ttime: Option<u16>,
        delta: Option<i32>,
        rep: Option<i32>,
    ) -> QueueEntry {
        QueueEntry {
            qid: 1,
            trig: Trigger::new(5000),
            tt: TimeTrig {
                ttime,
                nexttime: None,
                delta,
                rep,
                duration: None,
            },
            body: "b".to_owned(),
            filename: "test.rem".to_owned(),
            line_no: 1,
            ntrig: -1,
            run_disabled: 0,
            fired_once: false,
        }
    }

    #[test]
    fn plain_at_fires_at_its_minute() {
        let mut engine = test_engine();
        let mut e = entry(Some(1020), None, None);
        assert_eq!(
            engine.calculate_next_time(&mut e, 540 - 1),
            Some(1020)
        );
        // Once the minute is past, the entry is spent.
        assert_eq!(engine.calculate_next_time(&mut e, 1020), None);
    }

    #[test]
    fn delta_schedules_advance_warnings() {
        let mut engine = test_engine();
        // AT 17:00 +30 *10 from 09:00: warnings at 16:30, 16:40, ...
        let mut e = entry(Some(1020), Some(30), Some(10));
        assert_eq!(
            engine.calculate_next_time(&mut e, 539),
            Some(1020 - 30)
        );
        assert_eq!(
            engine.calculate_next_time(&mut e, 990),
            Some(1000)
        );
        assert_eq!(
            engine.calculate_next_time(&mut e, 1019),
            Some(1020)
        );
        assert_eq!(engine.calculate_next_time(&mut e, 1020), None);
    }

    #[test]
    fn delta_without_rep_steps_by_delta() {
        let mut engine = test_engine();
        let mut e = entry(Some(1020), Some(30), None);
        assert_eq!(engine.calculate_next_time(&mut e, 989), Some(990));
        assert_eq!(engine.calculate_next_time(&mut e, 990), Some(1020));
    }

    #[test]
    fn sched_function_absolute_time() {
        let mut engine = test_engine();
        engine
            .process_line("FSET mysched(n) = time(18, 30)")
            .unwrap();
        let mut e = entry(Some(1020), None, None);
        e.trig.sched = Some("mysched".to_owned());
        assert_eq!(
            engine.calculate_next_time(&mut e, 540),
            Some(18 * 60 + 30)
        );
    }

    #[test]
    fn sched_function_nonadvancing_expires() {
        let mut engine = test_engine();
        engine.process_line("FSET stuck(n) = time(1, 0)").unwrap();
        let mut e = entry(Some(1020), None, None);
        e.trig.sched = Some("stuck".to_owned());
        // 01:00 never exceeds a prev of 540, and repeating the same
        // value twice ends the scan; the AT fallback then applies.
        assert_eq!(engine.calculate_next_time(&mut e, 540), Some(1020));
        assert!(e.trig.sched.is_none());
    }

    #[test]
    fn status_counts_live_entries() {
        let mut engine = test_engine();
        for (i, t) in [600u16, 700, 800].iter().enumerate() {
            let mut e = entry(Some(*t), None, None);
            e.qid = i as u64 + 1;
            e.tt.nexttime = Some(*t);
            engine.queue.push(e);
        }
        engine.capture = Some(vec![]);
        engine.handle_server_command("STATUS");
        assert_eq!(
            engine.capture.take().unwrap(),
            vec!["NOTE queued 3"]
        );
    }

    #[test]
    fn del_removes_by_qid_and_reports() {
        let mut engine = test_engine();
        engine.test_mode = false;
        for i in 1..=3u64 {
            let mut e = entry(Some(600), None, None);
            e.qid = i;
            e.tt.nexttime = Some(600);
            engine.queue.push(e);
        }
        engine.capture = Some(vec![]);
        engine.handle_server_command("DEL 2");
        assert_eq!(
            engine.capture.take().unwrap(),
            vec!["NOTE queued 2"]
        );
        assert!(engine.queue.iter().all(|q| q.qid != 2));
    }

    #[test]
    fn queue_dump_text_mode() {
        let mut engine = test_engine();
        engine.test_mode = false;
        let mut e = entry(Some(600), None, None);
        e.qid = 0xab;
        e.tt.nexttime = Some(590);
        engine.queue.push(e);
        engine.capture = Some(vec![]);
        engine.handle_server_command("QUEUE");
        let out = engine.capture.take().unwrap();
        assert_eq!(out[0], "NOTE queue");
        assert_eq!(out[1], "ab 09:50 10:00 b");
        assert_eq!(out[2], "NOTE endqueue");
    }

    #[test]
    fn jsonqueue_is_json_even_in_text_mode() {
        let mut engine = test_engine();
        let mut e = entry(Some(600), None, None);
        e.tt.nexttime = Some(600);
        engine.queue.push(e);
        engine.capture = Some(vec![]);
        engine.handle_server_command("JSONQUEUE");
        let out = engine.capture.take().unwrap();
        assert_eq!(out[0], "NOTE JSONQUEUE");
        let parsed: serde_json::Value =
            serde_json::from_str(&out[1]).unwrap();
        assert_eq!(parsed[0]["ttime"], "10:00");
        assert_eq!(out[2], "NOTE ENDJSONQUEUE");
    }

    #[test]
    fn translate_with_fallback() {
        let mut engine = test_engine();
        engine.translations.set("monday", "lundi");
        engine.capture = Some(vec![]);
        engine.handle_server_command("TRANSLATE MONDAY");
        let out = engine.capture.take().unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&out[0]).unwrap();
        assert_eq!(parsed["translated"], "lundi");
        // Unknown strings answer with silence.
        engine.capture = Some(vec![]);
        engine.handle_server_command("TRANSLATE nothing");
        assert!(engine.capture.take().unwrap().is_empty());
    }

    #[test]
    fn unknown_command_is_an_error_note() {
        let mut engine = test_engine();
        engine.capture = Some(vec![]);
        engine.handle_server_command("BOGUS");
        let out = engine.capture.take().unwrap();
        assert!(out[0].starts_with("NOTE error"));
    }

    #[test]
    fn exit_and_reread_outcomes() {
        let mut engine = test_engine();
        engine.capture = Some(vec![]);
        assert_eq!(
            engine.handle_server_command("EXIT"),
            Some(QueueOutcome::Exit(0))
        );
        assert_eq!(
            engine.handle_server_command("REREAD"),
            Some(QueueOutcome::Reread)
        );
    }

    #[test]
    fn firing_emits_protocol_frame() {
        let mut engine = test_engine();
        engine.today = date::dse(2030, 1, 1).unwrap();
        let mut e = entry(Some(600), None, None);
        e.body = "tea time".to_owned();
        e.trig.tags = vec!["t1".to_owned()];
        e.tt.nexttime = Some(600);
        engine.queue.push(e);
        engine.capture = Some(vec![]);
        engine.fire_due_entries(600, true);
        let out = engine.capture.take().unwrap();
        assert_eq!(out[0], "NOTE reminder 10:00 10:00 t1");
        assert_eq!(out[1], "tea time");
        assert_eq!(out[2], "NOTE endreminder");
        // The entry fired its only minute and is gone.
        assert_eq!(
            out.last().map(String::as_str),
            Some("NOTE queued 0")
        );
        assert!(engine.queue.is_empty());
    }

    #[test]
    fn late_fire_within_max_late_minutes() {
        let mut engine = test_engine();
        engine.tunables.max_late_minutes = 30;
        let mut e = entry(Some(600), None, None);
        e.tt.nexttime = Some(600);
        engine.queue.push(e);
        engine.capture = Some(vec![]);
        engine.fire_due_entries(620, false);
        let out = engine.capture.take().unwrap();
        assert_eq!(out, vec!["b"]);
    }

    #[test]
    fn too_late_is_dropped_silently() {
        let mut engine = test_engine();
        engine.tunables.max_late_minutes = 10;
        let mut e = entry(Some(600), None, None);
        e.tt.nexttime = Some(600);
        engine.queue.push(e);
        engine.capture = Some(vec![]);
        engine.fire_due_entries(700, false);
        assert!(engine.capture.take().unwrap().is_empty());
        assert!(engine.queue.is_empty());
    }
}
