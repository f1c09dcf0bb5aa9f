//! Alert history log
//!
//! Bounded, append-only log of classified samples for one user, with
//! conjunctive filtering and page slicing for the history view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info};

use crate::models::{AlertRecord, Channel, RecordStatus};

/// Default number of records kept per user
pub const DEFAULT_CAPACITY: usize = 1000;

/// Which records the history view shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    All,
    Alerts,
}

/// Conjunctive history filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub view: ViewMode,
    pub channels: Option<BTreeSet<Channel>>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &AlertRecord) -> bool {
        let at = record.captured_at();
        if self.from.is_some_and(|from| at < from) {
            return false;
        }
        if self.to.is_some_and(|to| at > to) {
            return false;
        }
        if self.view == ViewMode::Alerts && record.status != RecordStatus::Alert {
            return false;
        }
        match &self.channels {
            Some(wanted) if !wanted.is_empty() => record
                .triggered_channels()
                .iter()
                .any(|channel| wanted.contains(channel)),
            _ => true,
        }
    }
}

#[derive(Debug)]
pub struct AlertHistory {
    records: VecDeque<AlertRecord>,
    capacity: usize,
    record_normal: bool,
    total_appended: u64,
}

impl AlertHistory {
    pub fn new(capacity: usize, record_normal: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            record_normal,
            total_appended: 0,
        }
    }

    /// Rebuild from persisted records, keeping the newest `capacity`.
    pub fn restore(mut records: Vec<AlertRecord>, capacity: usize, record_normal: bool) -> Self {
        let mut history = Self::new(capacity, record_normal);
        records.sort_by_key(|r| r.captured_at());
        let skip = records.len().saturating_sub(history.capacity);
        history.records.extend(records.into_iter().skip(skip));
        history
    }

    /// Append a record. Returns `false` when the record is not retained
    /// (a normal record while only alerts are kept).
    pub fn append(&mut self, record: AlertRecord) -> bool {
        if record.status == RecordStatus::Normal && !self.record_normal {
            return false;
        }

        self.total_appended += 1;

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }

        debug!(
            record_id = %record.id,
            status = ?record.status,
            total = self.total_appended,
            "Appending history record"
        );

        // Late arrivals go to their ordered position
        let at = record.captured_at();
        if self.records.back().map_or(true, |last| last.captured_at() <= at) {
            self.records.push_back(record);
        } else {
            let index = self.records.partition_point(|r| r.captured_at() <= at);
            self.records.insert(index, record);
        }
        true
    }

    /// Matching records, most recent first.
    pub fn query(&self, filter: &HistoryFilter) -> Vec<AlertRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &AlertRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<AlertRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        info!(removed, "Alert history cleared");
        removed
    }
}

/// One page of the filtered history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub data: Vec<AlertRecord>,
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub total_pages: u32,
}

impl HistoryPage {
    /// Slice a most-recent-first sequence. Pages are 1-based.
    pub fn slice(records: Vec<AlertRecord>, page: u32, limit: u32) -> Self {
        let limit = limit.max(1);
        let page = page.max(1);
        let total = records.len();
        let start = ((page - 1) as usize).saturating_mul(limit as usize);
        let data = if start < total {
            records
                .into_iter()
                .skip(start)
                .take(limit as usize)
                .collect()
        } else {
            Vec::new()
        };

        Self {
            data,
            page,
            limit,
            total: total as u32,
            total_pages: ((total as f64) / (limit as f64)).ceil() as u32,
        }
    }
}

/// Stateful cursor over the history view.
///
/// Changing the filter or the page size goes back to page 1.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    filter: HistoryFilter,
    page: u32,
    page_size: u32,
}

impl HistoryPager {
    pub fn new(page_size: u32) -> Self {
        Self {
            filter: HistoryFilter::default(),
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn set_filter(&mut self, filter: HistoryFilter) {
        self.filter = filter;
        self.page = 1;
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    pub fn goto(&mut self, page: u32) {
        self.page = page.max(1);
    }

    /// Compute the current page from a history snapshot.
    pub fn view(&self, history: &AlertHistory) -> HistoryPage {
        HistoryPage::slice(history.query(&self.filter), self.page, self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationResult, Sample, Warning};
    use chrono::Duration;

    fn record_at(at: DateTime<Utc>, warnings: &[Warning]) -> AlertRecord {
        let mut sample = Sample::empty(at);
        sample.bpm = Some(80.0);
        AlertRecord::classified(
            sample,
            ClassificationResult {
                warnings: warnings.iter().copied().collect(),
                suggested_profile: "resting".to_string(),
                is_profile_mismatch: false,
            },
            "resting",
        )
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_capacity_discards_oldest() {
        let mut history = AlertHistory::new(3, true);
        for i in 0..4 {
            history.append(record_at(base() + Duration::seconds(i), &[]));
        }

        assert_eq!(history.len(), 3);
        let times: Vec<_> = history.records().map(|r| r.captured_at()).collect();
        assert_eq!(
            times,
            vec![
                base() + Duration::seconds(1),
                base() + Duration::seconds(2),
                base() + Duration::seconds(3),
            ]
        );
        assert_eq!(history.total_appended, 4);
    }

    #[test]
    fn test_default_capacity_bound() {
        let mut history = AlertHistory::new(DEFAULT_CAPACITY, true);
        for i in 0..(DEFAULT_CAPACITY as i64 + 1) {
            history.append(record_at(base() + Duration::seconds(i), &[]));
        }
        assert_eq!(history.len(), DEFAULT_CAPACITY);
        assert_eq!(
            history.records().next().unwrap().captured_at(),
            base() + Duration::seconds(1)
        );
    }

    #[test]
    fn test_clear_empties_but_keeps_capacity() {
        let mut history = AlertHistory::new(2, true);
        history.append(record_at(base(), &[]));
        history.append(record_at(base() + Duration::seconds(1), &[]));

        assert_eq!(history.clear(), 2);
        assert!(history.is_empty());
        assert_eq!(history.clear(), 0);

        for i in 0..3 {
            history.append(record_at(base() + Duration::seconds(10 + i), &[]));
        }
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_late_record_keeps_order() {
        let mut history = AlertHistory::new(10, true);
        history.append(record_at(base(), &[]));
        history.append(record_at(base() + Duration::seconds(10), &[]));
        history.append(record_at(base() + Duration::seconds(5), &[]));

        let times: Vec<_> = history.records().map(|r| r.captured_at()).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_normal_records_can_be_skipped() {
        let mut history = AlertHistory::new(10, false);
        assert!(!history.append(record_at(base(), &[])));
        assert!(history.append(record_at(base(), &[Warning::Spo2Low])));
        assert!(history.append(AlertRecord::no_data(base(), "resting")));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_query_is_most_recent_first() {
        let mut history = AlertHistory::new(10, true);
        for i in 0..3 {
            history.append(record_at(base() + Duration::seconds(i), &[]));
        }
        let result = history.query(&HistoryFilter::default());
        assert_eq!(result[0].captured_at(), base() + Duration::seconds(2));
        assert_eq!(result[2].captured_at(), base());
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let mut history = AlertHistory::new(10, true);
        history.append(record_at(base(), &[Warning::HeartRateOutOfRange]));
        history.append(record_at(base() + Duration::seconds(10), &[Warning::HeartRateOutOfRange]));
        history.append(record_at(base() + Duration::seconds(20), &[Warning::Spo2Low]));
        history.append(record_at(base() + Duration::seconds(30), &[Warning::HeartRateOutOfRange]));
        history.append(record_at(base() + Duration::seconds(15), &[]));

        let filter = HistoryFilter {
            from: Some(base() + Duration::seconds(5)),
            to: Some(base() + Duration::seconds(25)),
            view: ViewMode::All,
            channels: Some([Channel::Bpm].into_iter().collect()),
        };
        let result = history.query(&filter);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].captured_at(), base() + Duration::seconds(10));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let mut history = AlertHistory::new(10, true);
        history.append(record_at(base(), &[]));
        history.append(record_at(base() + Duration::seconds(10), &[]));

        let filter = HistoryFilter {
            from: Some(base()),
            to: Some(base() + Duration::seconds(10)),
            ..Default::default()
        };
        assert_eq!(history.query(&filter).len(), 2);
    }

    #[test]
    fn test_alerts_view_hides_normal_and_no_data() {
        let mut history = AlertHistory::new(10, true);
        history.append(record_at(base(), &[]));
        history.append(AlertRecord::no_data(base() + Duration::seconds(1), "resting"));
        history.append(record_at(base() + Duration::seconds(2), &[Warning::TemperatureOutOfRange]));

        let filter = HistoryFilter {
            view: ViewMode::Alerts,
            ..Default::default()
        };
        let result = history.query(&filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].status, RecordStatus::Alert);
    }

    #[test]
    fn test_channel_filter_excludes_records_without_warnings() {
        let mut history = AlertHistory::new(10, true);
        history.append(record_at(base(), &[]));
        history.append(record_at(base(), &[Warning::Spo2Low]));

        let filter = HistoryFilter {
            channels: Some([Channel::Spo2, Channel::Temperature].into_iter().collect()),
            ..Default::default()
        };
        assert_eq!(history.query(&filter).len(), 1);
    }

    #[test]
    fn test_restore_keeps_newest() {
        let records: Vec<_> = (0..5)
            .rev()
            .map(|i| record_at(base() + Duration::seconds(i), &[]))
            .collect();
        let history = AlertHistory::restore(records, 3, true);

        assert_eq!(history.len(), 3);
        assert_eq!(
            history.records().next().unwrap().captured_at(),
            base() + Duration::seconds(2)
        );
    }

    #[test]
    fn test_page_slicing() {
        let records: Vec<_> = (0..25)
            .map(|i| record_at(base() + Duration::seconds(i), &[]))
            .collect();

        let page = HistoryPage::slice(records.clone(), 3, 10);
        assert_eq!(page.data.len(), 5);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);

        let beyond = HistoryPage::slice(records, 4, 10);
        assert!(beyond.data.is_empty());
    }

    #[test]
    fn test_pager_resets_to_first_page() {
        let mut pager = HistoryPager::new(10);
        pager.goto(3);
        assert_eq!(pager.page, 3);

        pager.set_filter(HistoryFilter {
            view: ViewMode::Alerts,
            ..Default::default()
        });
        assert_eq!(pager.page, 1);

        pager.goto(2);
        pager.set_page_size(25);
        assert_eq!(pager.page, 1);
        assert_eq!(pager.page_size, 25);
    }

    #[test]
    fn test_pager_view() {
        let mut history = AlertHistory::new(100, true);
        for i in 0..12 {
            let warnings: &[Warning] = if i % 2 == 0 { &[Warning::Spo2Low] } else { &[] };
            history.append(record_at(base() + Duration::seconds(i), warnings));
        }

        let mut pager = HistoryPager::new(5);
        pager.set_filter(HistoryFilter {
            view: ViewMode::Alerts,
            ..Default::default()
        });
        pager.goto(2);
        let page = pager.view(&history);

        assert_eq!(page.total, 6);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].captured_at(), base());
    }
}
