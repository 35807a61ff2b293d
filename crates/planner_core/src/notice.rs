use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    MalformedRecord,
    MissingStopId,
    DuplicateStopId,
    MissingField,
    InvalidCoordinates,
}

impl NoticeKind {
    /// Whether the row is left out of the catalog entirely, rather than kept
    /// and merely excluded from the planner's selectable list.
    pub fn drops_row(self) -> bool {
        matches!(
            self,
            NoticeKind::MalformedRecord | NoticeKind::MissingStopId | NoticeKind::DuplicateStopId
        )
    }
}

/// A per-row diagnostic raised while loading the stop catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogNotice {
    pub kind: NoticeKind,
    pub message: String,
    pub row: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl CatalogNotice {
    pub fn new(kind: NoticeKind, message: impl Into<String>, row: u64) -> Self {
        Self {
            kind,
            message: message.into(),
            row,
            stop_id: None,
            stop_name: None,
            field: None,
        }
    }

    pub fn with_stop(mut self, stop_id: &str, stop_name: Option<&str>) -> Self {
        if !stop_id.is_empty() {
            self.stop_id = Some(stop_id.to_string());
        }
        self.stop_name = stop_name.map(str::to_string);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoticeContainer {
    notices: Vec<CatalogNotice>,
}

impl NoticeContainer {
    pub fn new() -> Self {
        Self {
            notices: Vec::new(),
        }
    }

    pub fn push(&mut self, notice: CatalogNotice) {
        self.notices.push(notice);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogNotice> {
        self.notices.iter()
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn count_kind(&self, kind: NoticeKind) -> usize {
        self.notices.iter().filter(|notice| notice.kind == kind).count()
    }
}

impl<'a> IntoIterator for &'a NoticeContainer {
    type Item = &'a CatalogNotice;
    type IntoIter = std::slice::Iter<'a, CatalogNotice>;

    fn into_iter(self) -> Self::IntoIter {
        self.notices.iter()
    }
}
