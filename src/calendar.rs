use remindee_script::date;
use serde_json::json;

use crate::engine::{CalEntry, Engine};
use crate::err::Error;

fn slash_date(serial: i32) -> String {
    let (y, m, d) = date::from_dse(serial);
    format!("{:04}/{:02}/{:02}", y, m, d)
}

/// SPECIAL COLOR carries "r g b" ahead of the body.
fn split_color(entry: &CalEntry) -> (i32, i32, i32, String) {
    if entry
        .passthru
        .as_deref()
        .map(|p| p.eq_ignore_ascii_case("COLOR"))
        .unwrap_or(false)
    {
        let mut parts = entry.body.splitn(4, char::is_whitespace);
        let r = parts.next().and_then(|s| s.parse().ok());
        let g = parts.next().and_then(|s| s.parse().ok());
        let b = parts.next().and_then(|s| s.parse().ok());
        if let (Some(r), Some(g), Some(b)) = (r, g, b) {
            let rest = parts.next().unwrap_or("").to_owned();
            return (r, g, b, rest);
        }
    }
    (-1, -1, -1, entry.body.clone())
}

fn entry_json(entry: &CalEntry) -> serde_json::Value {
    let (r, g, b, body) = split_color(entry);
    let infos: serde_json::Map<String, serde_json::Value> = entry
        .infos
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    let (y, m, d) = date::from_dse(entry.date);
    let date_str = format!("{:04}-{:02}-{:02}", y, m, d);
    json!({
        "date": date_str,
        "passthru": entry.passthru,
        "tags": entry.tags.join(","),
        "info": infos,
        "duration": entry.duration,
        "time": entry.time,
        "priority": entry.priority,
        "nonconst_expr": entry.nonconst_expr,
        "if_depth": entry.if_depth,
        "r": r,
        "g": g,
        "b": b,
        "rawbody": entry.rawbody,
        "calendar_body": entry.calendar_body,
        "plain_body": entry.plain_body,
        "body": body,
    })
}

fn entry_legacy_line(entry: &CalEntry) -> String {
    let star = "*".to_owned();
    let passthru = entry.passthru.clone().unwrap_or_else(|| star.clone());
    let tags = if entry.tags.is_empty() {
        star.clone()
    } else {
        entry.tags.join(",")
    };
    let duration = entry
        .duration
        .map(|d| d.to_string())
        .unwrap_or_else(|| star.clone());
    let time = entry
        .time
        .map(|t| t.to_string())
        .unwrap_or_else(|| star.clone());
    let body = entry
        .calendar_body
        .clone()
        .unwrap_or_else(|| entry.body.clone());
    format!(
        "{} {} {} {} {} {}",
        slash_date(entry.date),
        passthru,
        tags,
        duration,
        time,
        body
    )
}

/// Run the engine over every day of `months` calendar months and
/// produce the machine-readable calendar at the requested level.
pub fn run_simple_calendar(
    engine: &mut Engine,
    level: u8,
    months: u32,
) -> Result<(), Error> {
    let (start_y, start_m, _) = date::from_dse(engine.today);
    let mut month_objects = vec![];
    let (mut y, mut m) = (start_y, start_m);
    for _ in 0..months.max(1) {
        let days = date::days_in_month(m, y);
        let mut month_entries: Vec<CalEntry> = vec![];
        for d in 1..=days {
            let serial = match date::dse(y, m, d) {
                Some(serial) => serial,
                None => return Err(Error::DateOutOfRange),
            };
            engine.today = serial;
            engine.cal_collect = Some(vec![]);
            match engine.run_iteration() {
                Ok(()) => {}
                Err(Error::ExitRequested(_)) => {}
                Err(err) => return Err(err),
            }
            month_entries
                .extend(engine.cal_collect.take().unwrap_or_default());
        }
        match level {
            1 => {
                for entry in &month_entries {
                    println!("{}", entry_legacy_line(entry));
                }
            }
            2 => {
                for entry in &month_entries {
                    println!("{}", entry_json(entry));
                }
            }
            _ => {
                let first = date::dse(y, m, 1).unwrap();
                let (py, pm) = if m == 1 {
                    (y - 1, 12)
                } else {
                    (y, m - 1)
                };
                let (ny, nm) = if m == 12 {
                    (y + 1, 1)
                } else {
                    (y, m + 1)
                };
                let mut daymap = serde_json::Map::new();
                for entry in &month_entries {
                    let key = slash_date(entry.date);
                    daymap
                        .entry(key)
                        .or_insert_with(|| json!([]))
                        .as_array_mut()
                        .unwrap()
                        .push(entry_json(entry));
                }
                month_objects.push(json!({
                    "monthname": date::month_name(m),
                    "year": y,
                    "daysinmonth": date::days_in_month(m, y),
                    "firstwkday": date::weekday(first),
                    "mondayfirst": false,
                    "translations": engine.translations.dump_json(),
                    "prevmonthname": date::month_name(pm),
                    "daysinprevmonth": date::days_in_month(pm, py),
                    "nextmonthname": date::month_name(nm),
                    "daysinnextmonth": date::days_in_month(nm, ny),
                    "entries": serde_json::Value::Object(daymap),
                }));
            }
        }
        (m, y) = if m == 12 { (1, y + 1) } else { (m + 1, y) };
    }
    if level >= 3 {
        println!("{}", serde_json::Value::Array(month_objects));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(body: &str, passthru: Option<&str>) -> CalEntry {
        CalEntry {
            date: date::dse(2030, 1, 1).unwrap(),
            passthru: passthru.map(str::to_owned),
            tags: vec![],
            infos: vec![],
            duration: None,
            time: Some(630),
            priority: 5000,
            rawbody: body.to_owned(),
            body: body.to_owned(),
            calendar_body: None,
            plain_body: body.to_owned(),
            nonconst_expr: false,
            if_depth: 0,
        }
    }

    #[test]
    fn legacy_line_fields() {
        let e = entry("see dentist", None);
        assert_eq!(
            entry_legacy_line(&e),
            "2030/01/01 * * * 630 see dentist"
        );
    }

    #[test]
    fn color_special_is_decomposed() {
        let e = entry("255 0 0 alarm", Some("COLOR"));
        let v = entry_json(&e);
        assert_eq!(v["r"], 255);
        assert_eq!(v["g"], 0);
        assert_eq!(v["b"], 0);
        assert_eq!(v["body"], "alarm");
    }

    #[test]
    fn plain_entry_has_no_color() {
        let e = entry("plain", None);
        let v = entry_json(&e);
        assert_eq!(v["r"], -1);
        assert_eq!(v["body"], "plain");
        assert_eq!(v["date"], "2030-01-01");
    }
}
