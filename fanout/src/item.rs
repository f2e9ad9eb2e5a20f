use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Identifier of one tracked work item.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the group (owner, tenant, project) a work item belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! validated_id {
    ($ty:ident, $field:literal) => {
        impl TryFrom<String> for $ty {
            type Error = InvalidItem;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(InvalidItem::Blank { field: $field });
                }
                if trimmed.len() == value.len() {
                    Ok(Self(value))
                } else {
                    Ok(Self(trimmed.to_string()))
                }
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = InvalidItem;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::try_from(value.to_string())
            }
        }
    };
}

validated_id!(WorkItemId, "id");
validated_id!(GroupId, "groupId");

/// Immutable identity of one trackable unit of work.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemRef {
    pub id: WorkItemId,
    pub group_id: GroupId,
}

impl WorkItemRef {
    pub fn new(id: WorkItemId, group_id: GroupId) -> Self {
        Self { id, group_id }
    }
}

/// A record as returned by a work source, before validation.
///
/// Sources hand back whatever their backing store produced; nothing
/// downstream of the enumerator sees this type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWorkItem {
    pub id: Option<String>,
    pub group_id: Option<String>,
}

impl RawWorkItem {
    pub fn new(id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            group_id: Some(group_id.into()),
        }
    }
}

impl TryFrom<RawWorkItem> for WorkItemRef {
    type Error = InvalidItem;

    fn try_from(raw: RawWorkItem) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .ok_or(InvalidItem::Missing { field: "id" })
            .and_then(WorkItemId::try_from)?;
        let group_id = raw
            .group_id
            .ok_or(InvalidItem::Missing { field: "groupId" })
            .and_then(GroupId::try_from)?;
        Ok(Self { id, group_id })
    }
}

/// Why a raw record was rejected at the enumerator boundary.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidItem {
    #[error("work item is missing `{field}`")]
    Missing { field: &'static str },
    #[error("work item has a blank `{field}`")]
    Blank { field: &'static str },
}

/// Lifecycle status a work source filters on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Paused,
    Archived,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Paused => "paused",
            ItemStatus::Archived => "archived",
        }
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Selection predicate handed to the work source.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Only items in this status are eligible.
    pub status: ItemStatus,
    /// When non-empty, only items in one of these groups are eligible.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl Selection {
    /// Every item in the `active` status.
    pub fn active() -> Self {
        Self {
            status: ItemStatus::Active,
            groups: Vec::new(),
        }
    }

    /// Narrow the selection to the given groups.
    pub fn in_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a record with the given status and group matches.
    pub fn matches(&self, status: ItemStatus, group_id: &str) -> bool {
        status == self.status
            && (self.groups.is_empty() || self.groups.iter().any(|g| g == group_id))
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::active()
    }
}
