use std::collections::HashSet;

/// Suppresses byte-identical reminders within one iteration when
/// `$DedupeReminders` is on.  Keyed on trigger date, trigger time and
/// the substituted body.
#[derive(Debug, Default)]
pub struct DedupeSet {
    seen: HashSet<(i32, Option<u16>, String)>,
}

impl DedupeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the reminder was already emitted.
    pub fn check_and_insert(
        &mut self,
        date: i32,
        time: Option<u16>,
        body: &str,
    ) -> bool {
        !self.seen.insert((date, time, body.to_owned()))
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_is_reported_once() {
        let mut d = DedupeSet::new();
        assert!(!d.check_and_insert(100, Some(60), "hi"));
        assert!(d.check_and_insert(100, Some(60), "hi"));
        assert!(!d.check_and_insert(100, Some(61), "hi"));
        assert!(!d.check_and_insert(100, Some(60), "hi2"));
        d.clear();
        assert!(!d.check_and_insert(100, Some(60), "hi"));
    }
}
