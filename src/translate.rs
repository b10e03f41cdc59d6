use std::collections::HashMap;

use serde_json::{json, Value as Json};

/// Maps source-language English strings to translated equivalents for
/// user-visible text (day and month names, "on", "was", and friends).
#[derive(Debug, Default)]
pub struct TranslationTable {
    entries: HashMap<String, String>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, english: &str, translated: &str) {
        self.entries
            .insert(english.to_owned(), translated.to_owned());
    }

    pub fn unset(&mut self, english: &str) {
        self.entries.remove(english);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Exact lookup; identity when no translation is installed.
    pub fn tr<'a>(&'a self, english: &'a str) -> &'a str {
        match self.entries.get(english) {
            Some(translated) => translated,
            None => english,
        }
    }

    /// Lookup with the daemon protocol's case-variant fallback: exact,
    /// then all-lowercase, then leading-capital-rest-lowercase.
    pub fn lookup_fuzzy(&self, english: &str) -> Option<&str> {
        if let Some(t) = self.entries.get(english) {
            return Some(t);
        }
        let lower = english.to_lowercase();
        if let Some(t) = self.entries.get(&lower) {
            return Some(t);
        }
        let mut title = String::with_capacity(english.len());
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            title.extend(first.to_uppercase());
            title.push_str(chars.as_str());
        }
        self.entries.get(&title).map(String::as_str)
    }

    pub fn dump_json(&self) -> Json {
        let mut map = serde_json::Map::new();
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        for k in keys {
            map.insert(k.clone(), json!(self.entries[k]));
        }
        Json::Object(map)
    }

    pub fn dump_text(&self) -> String {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        let mut out = String::new();
        for k in keys {
            out.push_str(&format!(
                "TRANSLATE {:?} {:?}\n",
                k, self.entries[k]
            ));
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_without_entry() {
        let t = TranslationTable::new();
        assert_eq!(t.tr("Monday"), "Monday");
    }

    #[test]
    fn fuzzy_fallback_order() {
        let mut t = TranslationTable::new();
        t.set("monday", "lundi");
        assert_eq!(t.lookup_fuzzy("MONDAY"), Some("lundi"));
        t.set("Monday", "Lundi");
        assert_eq!(t.lookup_fuzzy("Monday"), Some("Lundi"));
        assert_eq!(t.lookup_fuzzy("absent"), None);
    }

    #[test]
    fn dump_is_sorted() {
        let mut t = TranslationTable::new();
        t.set("b", "2");
        t.set("a", "1");
        let json = t.dump_json();
        let keys: Vec<_> =
            json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_owned(), "b".to_owned()]);
    }
}
