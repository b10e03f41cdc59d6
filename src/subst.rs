use lazy_static::lazy_static;
use regex::Regex;
use remindee_script::{date, TimeTrig, Trigger};

use crate::engine::Engine;
use crate::err::Error;

lazy_static! {
    static ref ANSI_RE: Regex = Regex::new("\x1b\\[[0-9;]*m").unwrap();
}

/// Width of a word with ANSI escape sequences counted as zero.
fn visible_width(word: &str) -> usize {
    ANSI_RE.replace_all(word, "").chars().count()
}

impl Engine {
    /// Substitute a reminder body against a computed trigger date and
    /// time.  `%`-escapes expand to trigger fields, `[expr]` splices
    /// evaluate, `%"` regions delimit the calendar body.
    pub fn substitute(
        &mut self,
        body: &str,
        trig: &Trigger,
        tt: &TimeTrig,
        trigdate: i32,
    ) -> Result<String, Error> {
        let mut out = String::with_capacity(body.len());
        let bytes = body.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'[' => {
                    if bytes.get(i + 1) == Some(&b'[') {
                        out.push('[');
                        i += 2;
                        continue;
                    }
                    let (expr, consumed) =
                        remindee_script::parse_expr_spliced(
                            &body[i + 1..],
                        )?;
                    let v = self.eval_expr(&expr, None)?;
                    out.push_str(&v.plain_string());
                    i += 1 + consumed;
                }
                b'%' => {
                    let c = match body[i + 1..].chars().next() {
                        Some(c) => c,
                        None => {
                            out.push('%');
                            break;
                        }
                    };
                    if c == '[' {
                        // %[expr] reads as a bare splice.
                        i += 1;
                        continue;
                    }
                    self.expand_escape(&mut out, c, trig, tt, trigdate);
                    i += 1 + c.len_utf8();
                }
                _ => {
                    // Copy the run up to the next splice or escape
                    // whole, so multi-byte text survives untouched.
                    let start = i;
                    while i < bytes.len()
                        && bytes[i] != b'['
                        && bytes[i] != b'%'
                    {
                        i += 1;
                    }
                    out.push_str(&body[start..i]);
                }
            }
        }
        Ok(out)
    }

    /// Substitution against a default trigger, for BANNER and ERRMSG.
    pub fn substitute_simple(
        &mut self,
        body: &str,
        trigdate: i32,
    ) -> Result<String, Error> {
        let trig = Trigger::new(self.tunables.default_priority);
        let tt = TimeTrig::default();
        self.substitute(body, &trig, &tt, trigdate)
    }

    fn expand_escape(
        &mut self,
        out: &mut String,
        c: char,
        _trig: &Trigger,
        tt: &TimeTrig,
        trigdate: i32,
    ) {
        let (y, m, d) = date::from_dse(trigdate);
        let lower = c.to_ascii_lowercase();
        let suppress_on = c.is_ascii_uppercase();
        let weekday =
            self.translations.tr(date::day_name(trigdate)).to_owned();
        let month =
            self.translations.tr(date::month_name(m)).to_owned();
        let time_str = |t: u16, sep: char| {
            format!("{:02}{}{:02}", t / 60, sep, t % 60)
        };
        match lower {
            'a' => {
                if !suppress_on {
                    out.push_str(self.translations.tr("on"));
                    out.push(' ');
                }
                out.push_str(&format!(
                    "{}, {} {}, {}",
                    weekday, d, month, y
                ));
            }
            'b' | 'w' => out.push_str(&weekday),
            'c' | 'C' => out.push_str(&month),
            'd' => out.push_str(&d.to_string()),
            'e' => out.push_str(&m.to_string()),
            'f' => out.push_str(&y.to_string()),
            'h' => {
                if let Some(t) = tt.ttime {
                    out.push_str(&format!("{:02}", t / 60));
                }
            }
            'j' => {
                if let Some(t) = tt.ttime {
                    out.push_str(&(t / 60).to_string());
                }
            }
            'i' => {
                if let Some(t) = tt.ttime {
                    out.push_str(&format!("{:02}", t % 60));
                }
            }
            'k' => {
                if let Some(t) = tt.ttime {
                    out.push_str(&(t % 60).to_string());
                }
            }
            't' => {
                if let Some(t) = tt.ttime {
                    out.push_str(&time_str(t, self.tunables.time_sep));
                }
            }
            'u' => out.push_str(&date::weekday(trigdate).to_string()),
            'v' => out.push_str(&format!("{:02}", y % 100)),
            'x' => {
                let sep = self.tunables.date_sep;
                out.push_str(&format!(
                    "{:04}{}{:02}{}{:02}",
                    y, sep, m, sep, d
                ));
            }
            '1' => out.push_str(&crate::funcs::ordinal(d as i64)),
            '!' => {
                let word = if trigdate < self.today {
                    "was"
                } else {
                    "is"
                };
                out.push_str(self.translations.tr(word));
            }
            'z' => {
                if let Some(t) = tt.ttime {
                    let diff = t as i64 - self.now_min as i64
                        + (trigdate as i64 - self.today as i64) * 1440;
                    out.push_str(&diff.to_string());
                }
            }
            '_' => out.push('\n'),
            '%' => out.push('%'),
            '"' => out.push('\u{1}'),
            _ => {
                out.push('%');
                out.push(c);
            }
        }
    }

    /// Split the `%"` markers out of a substituted body: the full text
    /// with markers removed, and the delimited region when present.
    pub fn split_calendar_body(
        &self,
        substituted: &str,
    ) -> (String, Option<String>) {
        if !substituted.contains('\u{1}') {
            return (substituted.to_owned(), None);
        }
        let parts: Vec<&str> = substituted.split('\u{1}').collect();
        let full: String = parts.concat();
        let region = parts.get(1).map(|s| s.to_string());
        (full, region)
    }

    /// Paragraph filler for MSF reminders, ANSI-escape aware.
    pub fn fill_paragraph(&self, text: &str) -> String {
        let width = self.tunables.form_width.max(20) as usize;
        let first_indent = self.tunables.first_indent.max(0) as usize;
        let subs_indent = self.tunables.subs_indent.max(0) as usize;
        let end_sent = &self.tunables.end_sent;
        let end_sent_ig = &self.tunables.end_sent_ig;

        fn sentence_ended(
            line: &str,
            end_sent: &str,
            end_sent_ig: &str,
        ) -> bool {
            line.trim_end_matches(|c| end_sent_ig.contains(c))
                .ends_with(|c: char| end_sent.contains(c))
        }

        let mut out = String::new();
        let mut line = " ".repeat(first_indent);
        let mut line_width = first_indent;
        let mut has_word = false;
        for word in text.split_whitespace() {
            let w = visible_width(word);
            let sep = if !has_word {
                0
            } else if sentence_ended(&line, end_sent, end_sent_ig) {
                2
            } else {
                1
            };
            if has_word && line_width + sep + w > width {
                out.push_str(&line);
                out.push('\n');
                line = " ".repeat(subs_indent);
                line_width = subs_indent;
                has_word = false;
            }
            if has_word {
                let sep = if sentence_ended(&line, end_sent, end_sent_ig)
                {
                    "  "
                } else {
                    " "
                };
                line.push_str(sep);
                line_width += sep.len();
            }
            line.push_str(word);
            line_width += w;
            has_word = true;
        }
        out.push_str(&line);
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_engine;

    fn subst(engine: &mut Engine, body: &str, y: i32, m: u32, d: u32) -> String {
        let trig = Trigger::new(5000);
        let tt = TimeTrig::default();
        let serial = date::dse(y, m, d).unwrap();
        engine.substitute(body, &trig, &tt, serial).unwrap()
    }

    #[test]
    fn date_escapes() {
        let mut engine = test_engine();
        assert_eq!(
            subst(&mut engine, "%w %d %C %f", 2030, 1, 1),
            "Tuesday 1 January 2030"
        );
        assert_eq!(subst(&mut engine, "%x", 2030, 1, 4), "2030-01-04");
        assert_eq!(subst(&mut engine, "%1", 2030, 1, 3), "3rd");
        assert_eq!(subst(&mut engine, "%u", 2030, 1, 5), "6");
        assert_eq!(subst(&mut engine, "%v", 2030, 1, 5), "30");
    }

    #[test]
    fn on_and_its_suppression() {
        let mut engine = test_engine();
        assert_eq!(
            subst(&mut engine, "%a", 2030, 1, 1),
            "on Tuesday, 1 January, 2030"
        );
        assert_eq!(
            subst(&mut engine, "%A", 2030, 1, 1),
            "Tuesday, 1 January, 2030"
        );
    }

    #[test]
    fn time_escapes() {
        let mut engine = test_engine();
        let trig = Trigger::new(5000);
        let tt = TimeTrig {
            ttime: Some(17 * 60 + 5),
            ..Default::default()
        };
        let serial = date::dse(2030, 1, 1).unwrap();
        assert_eq!(
            engine
                .substitute("%t %h:%i %j %k", &trig, &tt, serial)
                .unwrap(),
            "17:05 17:05 17 5"
        );
        // Untimed reminders expand the time escapes to nothing.
        let untimed = TimeTrig::default();
        assert_eq!(
            engine.substitute("%t", &trig, &untimed, serial).unwrap(),
            ""
        );
    }

    #[test]
    fn tense_matches_date() {
        let mut engine = test_engine();
        // engine today is 2030-01-01
        assert_eq!(subst(&mut engine, "%!", 2029, 12, 1), "was");
        assert_eq!(subst(&mut engine, "%!", 2030, 1, 1), "is");
        assert_eq!(subst(&mut engine, "%!", 2030, 2, 1), "is");
    }

    #[test]
    fn minutes_until_trigger() {
        let mut engine = test_engine();
        // now is 09:00
        let trig = Trigger::new(5000);
        let tt = TimeTrig {
            ttime: Some(10 * 60),
            ..Default::default()
        };
        let serial = engine.today;
        assert_eq!(
            engine.substitute("%z", &trig, &tt, serial).unwrap(),
            "60"
        );
    }

    #[test]
    fn literal_escapes() {
        let mut engine = test_engine();
        assert_eq!(subst(&mut engine, "a%_b", 2030, 1, 1), "a\nb");
        assert_eq!(subst(&mut engine, "100%%", 2030, 1, 1), "100%");
        assert_eq!(subst(&mut engine, "%q", 2030, 1, 1), "%q");
    }

    #[test]
    fn expressions_in_body() {
        let mut engine = test_engine();
        engine
            .vars
            .set("x", remindee_script::Value::Int(14), true, "t", 1)
            .unwrap();
        assert_eq!(subst(&mut engine, "val [x]", 2030, 1, 1), "val 14");
        assert_eq!(subst(&mut engine, "[[not-expr]", 2030, 1, 1), "[not-expr]");
    }

    #[test]
    fn non_ascii_bodies_survive() {
        let mut engine = test_engine();
        assert_eq!(
            subst(&mut engine, "Déjeuner au café", 2030, 1, 1),
            "Déjeuner au café"
        );
        assert_eq!(
            subst(&mut engine, "café %d — très tôt", 2030, 1, 3),
            "café 3 — très tôt"
        );
        // An unknown escape passes a multi-byte character through
        // unchanged.
        assert_eq!(subst(&mut engine, "100%é", 2030, 1, 1), "100%é");
        assert_eq!(subst(&mut engine, "%é", 2030, 1, 1), "%é");
    }

    #[test]
    fn calendar_body_region() {
        let mut engine = test_engine();
        let s = subst(&mut engine, "long %\"short%\" tail", 2030, 1, 1);
        let (full, region) = engine.split_calendar_body(&s);
        assert_eq!(full, "long short tail");
        assert_eq!(region.as_deref(), Some("short"));
    }

    #[test]
    fn translated_names_are_used() {
        let mut engine = test_engine();
        engine.translations.set("Tuesday", "mardi");
        engine.translations.set("on", "le");
        assert_eq!(
            subst(&mut engine, "%a", 2030, 1, 1),
            "le mardi, 1 January, 2030"
        );
    }

    #[test]
    fn fill_respects_width() {
        let mut engine = test_engine();
        engine.tunables.form_width = 20;
        let filled = engine
            .fill_paragraph("aaaa bbbb cccc dddd eeee ffff gggg");
        for line in filled.lines() {
            assert!(line.len() <= 20, "line too long: {:?}", line);
        }
        assert!(filled.lines().count() > 1);
    }

    #[test]
    fn fill_indents() {
        let mut engine = test_engine();
        engine.tunables.form_width = 20;
        engine.tunables.first_indent = 2;
        engine.tunables.subs_indent = 4;
        let filled =
            engine.fill_paragraph("one two three four five six seven");
        let lines: Vec<&str> = filled.lines().collect();
        assert!(lines[0].starts_with("  one"));
        assert!(lines[1].starts_with("    "));
    }

    #[test]
    fn ansi_sequences_are_zero_width() {
        let engine = test_engine();
        assert_eq!(visible_width("\x1b[1mbold\x1b[0m"), 4);
        let _ = engine;
    }
}
