//! Daily price-history download through an open [`KdataSession`].

use super::artifact::ArtifactStore;
use super::provider::{DataError, KdataSession};
use crate::domain::{derive_changes, DataKind};
use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdataConfig {
    pub enabled: bool,
    /// First date requested.
    pub start_date: NaiveDate,
    /// Number of most recent bars the K-line endpoint is asked for.
    pub datalen: u32,
    pub request_timeout_secs: u64,
}

impl Default for KdataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_date: NaiveDate::from_ymd_opt(2005, 1, 1).unwrap_or_default(),
            datalen: 6000,
            request_timeout_secs: 45,
        }
    }
}

impl KdataConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub struct KdataEngine {
    start_date: NaiveDate,
}

impl KdataEngine {
    pub fn new(config: &KdataConfig) -> Self {
        Self {
            start_date: config.start_date,
        }
    }

    /// Fetch, sort and persist one code's bars. Returns the row count.
    /// Zero rows or a failed query leaves no artifact for `code`.
    ///
    /// `preclose` and `pct_change` are derived from consecutive closes, so
    /// the first persisted bar has neither.
    pub fn download(
        &self,
        session: &KdataSession<'_>,
        code: &str,
        store: &ArtifactStore,
    ) -> Result<usize, DataError> {
        let mut bars = match session.query_daily(code, self.start_date) {
            Ok(bars) => bars,
            Err(e) => {
                if store.remove(DataKind::Kdata, code)? {
                    warn!("{code}: removed stale kdata artifact after failed attempt");
                }
                return Err(e);
            }
        };
        bars.retain(|b| b.date >= self.start_date);
        if bars.is_empty() {
            store.remove(DataKind::Kdata, code)?;
            info!("{code}: no kdata since {}", self.start_date);
            return Ok(0);
        }
        bars.sort_by_key(|b| b.date);
        derive_changes(&mut bars);
        let path = store.write_kdata(code, &bars)?;
        info!("{code}: {} kdata bars -> {}", bars.len(), path.display());
        Ok(bars.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::artifact::read_kdata;
    use crate::data::provider::KdataClient;
    use crate::domain::KdataBar;
    use tempfile::TempDir;

    struct FixedClient {
        bars: Vec<KdataBar>,
    }

    impl KdataClient for FixedClient {
        fn name(&self) -> &str {
            "fixed"
        }
        fn login(&mut self) -> Result<(), DataError> {
            Ok(())
        }
        fn logout(&mut self) {}
        fn query_daily(&self, _code: &str, _start: NaiveDate) -> Result<Vec<KdataBar>, DataError> {
            Ok(self.bars.clone())
        }
    }

    fn bar(y: i32, m: u32, d: u32) -> KdataBar {
        KdataBar {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            code: "sh.600000".into(),
            open: Some(1.0),
            high: Some(1.2),
            low: Some(0.9),
            close: Some(1.1),
            preclose: None,
            volume: Some(1_000.0),
            pct_change: None,
        }
    }

    #[test]
    fn persists_sorted_bars_after_start() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut client = FixedClient {
            bars: vec![bar(2024, 1, 3), bar(2004, 6, 1), bar(2024, 1, 2)],
        };
        let engine = KdataEngine::new(&KdataConfig::default());

        let session = KdataSession::open(&mut client).unwrap();
        let rows = engine.download(&session, "sh.600000", &store).unwrap();
        drop(session);

        assert_eq!(rows, 2);
        let loaded = read_kdata(&store.artifact_path(DataKind::Kdata, "sh.600000")).unwrap();
        assert_eq!(loaded[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(loaded[1].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(loaded[0].preclose, None);
        assert_eq!(loaded[1].preclose, Some(1.1));
    }

    #[test]
    fn pct_change_comes_from_previous_close() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut later = bar(2024, 1, 3);
        later.close = Some(1.21);
        let mut client = FixedClient {
            bars: vec![later, bar(2024, 1, 2)],
        };
        let engine = KdataEngine::new(&KdataConfig::default());

        let session = KdataSession::open(&mut client).unwrap();
        engine.download(&session, "sh.600000", &store).unwrap();
        drop(session);

        let loaded = read_kdata(&store.artifact_path(DataKind::Kdata, "sh.600000")).unwrap();
        assert_eq!(loaded[0].pct_change, None);
        assert!((loaded[1].pct_change.unwrap() - 10.0).abs() < 1e-9);
    }

    struct DownClient;

    impl KdataClient for DownClient {
        fn name(&self) -> &str {
            "down"
        }
        fn login(&mut self) -> Result<(), DataError> {
            Ok(())
        }
        fn logout(&mut self) {}
        fn query_daily(&self, _code: &str, _start: NaiveDate) -> Result<Vec<KdataBar>, DataError> {
            Err(DataError::NetworkUnreachable("timed out".into()))
        }
    }

    #[test]
    fn failed_query_clears_previous_bars() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_kdata("sh.600000", &[bar(2024, 1, 2)]).unwrap();
        let engine = KdataEngine::new(&KdataConfig::default());

        let mut client = DownClient;
        let session = KdataSession::open(&mut client).unwrap();
        assert!(engine.download(&session, "sh.600000", &store).is_err());
        assert!(!store.exists(DataKind::Kdata, "sh.600000"));
    }

    #[test]
    fn no_bars_is_zero_and_no_file() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut client = FixedClient { bars: Vec::new() };
        let engine = KdataEngine::new(&KdataConfig::default());

        let session = KdataSession::open(&mut client).unwrap();
        assert_eq!(engine.download(&session, "sh.600000", &store).unwrap(), 0);
        assert!(!store.exists(DataKind::Kdata, "sh.600000"));
    }
}
