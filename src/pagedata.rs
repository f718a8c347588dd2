//! Page Provenance Model
//!
//! Every physical page carries its whole processing history. `current` is
//! the latest record; `previous` holds every earlier one, oldest first. Each
//! record points back at its predecessor through `follows`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Point;

/// Kind marker written into every page record.
pub const PAGE_KIND: &str = "page";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub current: PageDetail,
    #[serde(default)]
    pub previous: Vec<PageDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDetail {
    pub is: String,
    pub uuid: String,
    /// uuid of the record this one follows; empty for the first record
    #[serde(default)]
    pub follows: String,
    #[serde(default)]
    pub revision: u32,
    pub own: FileDetail,
    pub original: FileDetail,
    pub process: ProcessDetail,
    pub item: ItemDetail,
    #[serde(default)]
    pub data: Vec<Field>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub path: String,
    pub uuid: String,
    /// 1-based page number within the file
    pub number: u32,
    pub of: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDetail {
    pub uuid: String,
    pub time: DateTime<Utc>,
    pub name: String,
    pub by: String,
    pub to_do: String,
    pub next: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    /// e.g. the course code
    pub what: String,
    /// e.g. the exam diet
    pub when: String,
    /// candidate identity, possibly anonymized
    pub who: String,
    pub who_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub value: String,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub position: Point,
    pub text: String,
    /// 0-based page index the comment was made on
    pub source_page: u32,
    pub label: String,
}

fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

impl ProcessDetail {
    pub fn new(name: &str, by: &str, to_do: &str, next: &str) -> Self {
        Self {
            uuid: new_uuid(),
            time: Utc::now(),
            name: name.to_string(),
            by: by.to_string(),
            to_do: to_do.to_string(),
            next: next.to_string(),
        }
    }
}

impl PageDetail {
    /// A first record for a page, with a fresh uuid and nothing to follow.
    pub fn root(process: ProcessDetail, own: FileDetail, item: ItemDetail) -> Self {
        Self {
            is: PAGE_KIND.to_string(),
            uuid: new_uuid(),
            follows: String::new(),
            revision: 0,
            original: own.clone(),
            own,
            process,
            item,
            data: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub fn data_value(&self, key: &str) -> Option<&str> {
        self.data.iter().find(|f| f.key == key).map(|f| f.value.as_str())
    }
}

impl PageData {
    pub fn new(current: PageDetail) -> Self {
        Self { current, previous: Vec::new() }
    }

    /// No usable identity: the page carried no provenance we could read.
    pub fn is_empty(&self) -> bool {
        self.current.uuid.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &PageDetail> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }

    pub fn record_count(&self) -> usize {
        1 + self.previous.len()
    }

    /// History for the next processing step.
    ///
    /// The current record moves to the end of `previous` and a new one
    /// follows it. Repeating the same process bumps the revision; a new
    /// process starts again at 0. Comments carry forward so later passes
    /// stack below them.
    pub fn advance(&self, process: ProcessDetail, own: FileDetail) -> PageData {
        let old = &self.current;
        let revision = if old.process.name == process.name { old.revision + 1 } else { 0 };
        let current = PageDetail {
            is: PAGE_KIND.to_string(),
            uuid: new_uuid(),
            follows: old.uuid.clone(),
            revision,
            own,
            original: old.original.clone(),
            process,
            item: old.item.clone(),
            data: Vec::new(),
            comments: old.comments.clone(),
        };
        let mut previous = self.previous.clone();
        previous.push(old.clone());
        PageData { current, previous }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(n: u32) -> FileDetail {
        FileDetail { path: "scan.pdf".into(), uuid: "file-1".into(), number: n, of: 4 }
    }

    #[test]
    fn test_root_has_no_predecessor() {
        let d = PageDetail::root(ProcessDetail::new("ingest", "office", "", "mark"), file(1), ItemDetail::default());
        assert_eq!(d.is, PAGE_KIND);
        assert!(d.follows.is_empty());
        assert_eq!(d.original, d.own);
        assert!(!d.uuid.is_empty());
    }

    #[test]
    fn test_advance_links_and_keeps_history() {
        let first = PageData::new(PageDetail::root(
            ProcessDetail::new("ingest", "office", "", "mark"),
            file(2),
            ItemDetail { what: "MATH101".into(), ..Default::default() },
        ));
        let second = first.advance(ProcessDetail::new("mark", "marker-a", "", "moderate"), file(2));
        let third = second.advance(ProcessDetail::new("mark", "marker-a", "", "moderate"), file(2));

        assert_eq!(second.current.follows, first.current.uuid);
        assert_eq!(third.current.follows, second.current.uuid);
        assert_eq!(third.previous.len(), 2);
        assert_eq!(third.previous[0], first.current);
        assert_eq!(second.current.revision, 0);
        assert_eq!(third.current.revision, 1);
        assert_eq!(third.current.item.what, "MATH101");
        assert_eq!(third.record_count(), 3);
    }

    #[test]
    fn test_data_value_lookup() {
        let mut d = PageDetail::default();
        d.data.push(Field::new("tf-page-ok", "x"));
        assert_eq!(d.data_value("tf-page-ok"), Some("x"));
        assert_eq!(d.data_value("missing"), None);
    }
}
