use crate::errors::{Result, SieveError};
use crate::filter::{BloomFilter, FilterParams};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;

/// Flat-file API key allowlist: a JSON array of strings kept in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyList {
    keys: Vec<String>,
}

impl KeyList {
    pub fn new() -> Self { Self::default() }

    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        Self { keys }
    }

    /// A missing file is an empty list.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let keys: Vec<String> = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Ok(Self::from_keys(keys))
    }

    /// Pretty JSON (2-space indent) through `<path>.tmp` + rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let mut f = File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(&self.keys)?.as_bytes())?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn add(&mut self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(SieveError::EmptyKey);
        }
        match self.keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(_) => Err(SieveError::DuplicateKey(key.to_string())),
            Err(at) => {
                self.keys.insert(at, key.to_string());
                Ok(())
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
    }

    pub fn len(&self) -> usize { self.keys.len() }
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &str> { self.keys.iter().map(String::as_str) }

    /// Filter sized for the current key count at `fp_rate`, holding every key.
    pub fn to_filter(&self, fp_rate: f64) -> Result<BloomFilter> {
        let params = FilterParams::for_capacity(self.keys.len().max(1) as u64, fp_rate)?;
        let mut filter = params.build()?;
        for k in &self.keys {
            filter.add(k);
        }
        Ok(filter)
    }
}

/// Exact key check behind a Bloom pre-filter.
///
/// The filter answers "definitely absent" without touching the list; anything
/// it lets through is confirmed by binary search, so the answer is exact.
#[derive(Debug, Clone)]
pub struct KeyGate {
    filter: BloomFilter,
    keys: KeyList,
}

impl KeyGate {
    pub fn new(keys: KeyList, fp_rate: f64) -> Result<Self> {
        let filter = keys.to_filter(fp_rate)?;
        Ok(Self { filter, keys })
    }

    /// Use a filter built elsewhere (e.g. loaded from disk). Keys missing from
    /// the filter are added so the no-false-reject guarantee holds.
    pub fn with_filter(keys: KeyList, mut filter: BloomFilter) -> Self {
        for k in keys.iter() {
            if !filter.contains(k) {
                filter.add(k);
            }
        }
        Self { filter, keys }
    }

    pub fn check(&self, key: &str) -> bool {
        if key.is_empty() || !self.filter.contains(key) {
            return false;
        }
        self.keys.contains(key)
    }

    pub fn filter(&self) -> &BloomFilter { &self.filter }
    pub fn keys(&self) -> &KeyList { &self.keys }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempdir().unwrap();
        let list = KeyList::load(tmp.path().join("allowed_keys.json")).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn add_keeps_order_and_rejects_duplicates() {
        let mut list = KeyList::new();
        list.add("zeta").unwrap();
        list.add("alpha").unwrap();
        list.add("mid").unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), ["alpha", "mid", "zeta"]);

        let err = list.add("mid").unwrap_err();
        assert_eq!(err.to_string(), "Key 'mid' already exists.");
        assert!(matches!(list.add(""), Err(SieveError::EmptyKey)));
    }

    #[test]
    fn save_and_load_sorted_json() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("allowed_keys.json");
        fs::write(&path, r#"["k3", "k1", "k2", "k1"]"#).unwrap();

        let mut list = KeyList::load(&path).unwrap();
        assert_eq!(list.len(), 3);
        list.add("k0").unwrap();
        list.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[\n  \"k0\",\n  \"k1\",\n  \"k2\",\n  \"k3\"\n]");
        assert_eq!(KeyList::load(&path).unwrap(), list);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("allowed_keys.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(KeyList::load(&path), Err(SieveError::Json(_))));
    }

    #[test]
    fn gate_is_exact() {
        let keys = KeyList::from_keys((0..500).map(|i| format!("key-{i:04}")));
        let gate = KeyGate::new(keys, 0.01).unwrap();
        assert!((0..500).all(|i| gate.check(&format!("key-{i:04}"))));
        assert!((500..2500).all(|i| !gate.check(&format!("key-{i:04}"))));
        assert!(!gate.check(""));
    }

    #[test]
    fn gate_on_empty_list_denies_everything() {
        let gate = KeyGate::new(KeyList::new(), 0.01).unwrap();
        assert!(!gate.check("anything"));
    }

    #[test]
    fn gate_backfills_a_stale_filter() {
        let keys = KeyList::from_keys(["a".to_string(), "b".to_string()]);
        let stale = BloomFilter::new(64, 3).unwrap();
        let gate = KeyGate::with_filter(keys, stale);
        assert!(gate.check("a") && gate.check("b"));
        assert!(!gate.check("c"));
    }
}
