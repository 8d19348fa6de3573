//! Last pushed content hash per (application, module).

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct ChecksumLedger {
    entries: DashMap<(String, String), String>,
}

impl ChecksumLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, app: &str, module: &str) -> Option<String> {
        self.entries
            .get(&(app.to_string(), module.to_string()))
            .map(|e| e.value().clone())
    }

    /// True if `hash` is what was last pushed
    pub fn is_current(&self, app: &str, module: &str, hash: &str) -> bool {
        self.get(app, module).as_deref() == Some(hash)
    }

    pub fn record(&self, app: &str, module: &str, hash: String) {
        self.entries.insert((app.to_string(), module.to_string()), hash);
    }

    /// Forget everything pushed to `app`, forcing a full push next time
    pub fn forget_app(&self, app: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(entry_app, _), _| entry_app != app);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_compare() {
        let ledger = ChecksumLedger::new();
        assert!(!ledger.is_current("mail", "HttpClient", "abc"));
        ledger.record("mail", "HttpClient", "abc".to_string());
        assert!(ledger.is_current("mail", "HttpClient", "abc"));
        assert!(!ledger.is_current("mail", "HttpClient", "def"));
        assert!(!ledger.is_current("search", "HttpClient", "abc"));
    }

    #[test]
    fn test_forget_app() {
        let ledger = ChecksumLedger::new();
        ledger.record("mail", "A", "1".to_string());
        ledger.record("mail", "B", "2".to_string());
        ledger.record("search", "A", "3".to_string());
        assert_eq!(ledger.forget_app("mail"), 2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("search", "A").as_deref(), Some("3"));
    }
}
