use remindee_script::BodyType;

/// Sort directions for `$SortByDate` and friends: 0 keeps file order,
/// 1 sorts ascending, 2 descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    None,
    Ascending,
    Descending,
}

impl SortDir {
    pub fn from_int(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Ascending),
            2 => Some(Self::Descending),
            _ => None,
        }
    }

    pub fn as_int(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Ascending => 1,
            Self::Descending => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortEntry {
    pub date: i32,
    pub time: Option<u16>,
    pub priority: u32,
    pub body: String,
    pub typ: BodyType,
    /// Position in file order, the tie-breaker.
    pub seq: usize,
}

/// Collects the day's triggered reminders and re-emits them ordered by
/// the configured (date, time, priority) tuple.
#[derive(Debug, Default)]
pub struct SortBuffer {
    entries: Vec<SortEntry>,
    pub by_date: SortDir,
    pub by_time: SortDir,
    pub by_prio: SortDir,
}

fn dir_cmp<T: Ord>(dir: SortDir, a: &T, b: &T) -> std::cmp::Ordering {
    match dir {
        SortDir::None => std::cmp::Ordering::Equal,
        SortDir::Ascending => a.cmp(b),
        SortDir::Descending => b.cmp(a),
    }
}

impl SortBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.by_date != SortDir::None
            || self.by_time != SortDir::None
            || self.by_prio != SortDir::None
    }

    pub fn push(&mut self, mut entry: SortEntry) {
        entry.seq = self.entries.len();
        self.entries.push(entry);
    }

    /// Drain in sorted order.  Untimed reminders sort as 00:00.
    pub fn drain_sorted(&mut self) -> Vec<SortEntry> {
        let by_date = self.by_date;
        let by_time = self.by_time;
        let by_prio = self.by_prio;
        let mut out = std::mem::take(&mut self.entries);
        out.sort_by(|a, b| {
            dir_cmp(by_date, &a.date, &b.date)
                .then_with(|| {
                    dir_cmp(
                        by_time,
                        &a.time.unwrap_or(0),
                        &b.time.unwrap_or(0),
                    )
                })
                .then_with(|| dir_cmp(by_prio, &a.priority, &b.priority))
                .then_with(|| a.seq.cmp(&b.seq))
        });
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(date: i32, time: Option<u16>, prio: u32, body: &str) -> SortEntry {
        SortEntry {
            date,
            time,
            priority: prio,
            body: body.to_owned(),
            typ: BodyType::Msg,
            seq: 0,
        }
    }

    #[test]
    fn stable_on_ties() {
        let mut buf = SortBuffer {
            by_time: SortDir::Ascending,
            ..Default::default()
        };
        buf.push(entry(10, Some(60), 5000, "a"));
        buf.push(entry(10, Some(60), 5000, "b"));
        buf.push(entry(10, Some(30), 5000, "c"));
        let got: Vec<_> =
            buf.drain_sorted().into_iter().map(|e| e.body).collect();
        assert_eq!(got, vec!["c", "a", "b"]);
    }

    #[test]
    fn descending_priority() {
        let mut buf = SortBuffer {
            by_prio: SortDir::Descending,
            ..Default::default()
        };
        buf.push(entry(10, None, 1, "low"));
        buf.push(entry(10, None, 9999, "high"));
        let got: Vec<_> =
            buf.drain_sorted().into_iter().map(|e| e.body).collect();
        assert_eq!(got, vec!["high", "low"]);
    }

    #[test]
    fn inactive_by_default() {
        assert!(!SortBuffer::new().is_active());
    }
}
