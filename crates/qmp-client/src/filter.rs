//! Event filters that gate command completion.

use serde_json::Value;

use crate::message::QmpEvent;

/// Names the event a command must observe before it completes.
///
/// A filter matches an event with the same name. When a data key is set, the
/// event's data must also hold the expected string under that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    event: String,
    data: Option<DataMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DataMatch {
    key: String,
    value: String,
}

impl EventFilter {
    /// Matches any event called `event`.
    #[must_use]
    pub fn named(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: None,
        }
    }

    /// Matches `event` only when `data[key] == value`.
    #[must_use]
    pub fn with_data(
        event: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let data_key: String = key.into();
        let data = (!data_key.is_empty()).then(|| DataMatch {
            key: data_key,
            value: value.into(),
        });
        Self {
            event: event.into(),
            data,
        }
    }

    /// Event name this filter waits for.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Data key inspected by the filter, if any.
    #[must_use]
    pub fn data_key(&self) -> Option<&str> {
        self.data.as_ref().map(|data| data.key.as_str())
    }

    /// Expected value under [`Self::data_key`], if any.
    #[must_use]
    pub fn data_value(&self) -> Option<&str> {
        self.data.as_ref().map(|data| data.value.as_str())
    }

    /// Returns true when `event` satisfies the filter.
    #[must_use]
    pub fn matches(&self, event: &QmpEvent) -> bool {
        if event.name != self.event {
            return false;
        }
        match &self.data {
            None => true,
            Some(DataMatch { key, value }) => {
                matches!(event.data.get(key), Some(Value::String(found)) if found == value)
            }
        }
    }
}
