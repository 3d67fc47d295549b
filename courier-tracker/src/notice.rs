use std::collections::VecDeque;

use serde::Serialize;

use crate::error::Severity;

const MAX_NOTICES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NoticeId(pub u64);

/// A non-blocking message for the driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub id: NoticeId,
    pub severity: Severity,
    pub message: Box<str>,
    pub raised_at: jiff::Timestamp,
    /// How many times the same message was raised in a row.
    pub repeats: u32,
}

/// Dismissible notices, newest last.
#[derive(Debug, Default)]
pub struct Notices {
    items: VecDeque<Notice>,
    next_id: u64,
}

impl Notices {
    /// Raise a notice. Repeating the newest notice bumps it instead of stacking.
    pub fn raise(&mut self, severity: Severity, message: impl Into<Box<str>>) -> NoticeId {
        let message = message.into();
        let now = jiff::Timestamp::now();

        if let Some(last) = self.items.back_mut()
            && last.severity == severity
            && last.message == message
        {
            last.repeats += 1;
            last.raised_at = now;
            return last.id;
        }

        self.next_id += 1;
        let id = NoticeId(self.next_id);
        if self.items.len() == MAX_NOTICES {
            self.items.pop_front();
        }
        self.items.push_back(Notice {
            id,
            severity,
            message,
            raised_at: now,
            repeats: 1,
        });
        id
    }

    pub fn dismiss(&mut self, id: NoticeId) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }

    pub fn to_vec(&self) -> Vec<Notice> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_notice_is_collapsed() {
        let mut notices = Notices::default();
        let a = notices.raise(Severity::Transient, "network error");
        let b = notices.raise(Severity::Transient, "network error");

        assert_eq!(a, b);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices.to_vec()[0].repeats, 2);
    }

    #[test]
    fn dismiss_removes_only_that_notice() {
        let mut notices = Notices::default();
        let a = notices.raise(Severity::Transient, "timeout");
        let b = notices.raise(Severity::Fatal, "permission denied");

        assert!(notices.dismiss(a));
        assert!(!notices.dismiss(a));
        assert_eq!(notices.to_vec()[0].id, b);
    }

    #[test]
    fn list_is_bounded() {
        let mut notices = Notices::default();
        for i in 0..(MAX_NOTICES + 5) {
            notices.raise(Severity::Transient, format!("notice {i}"));
        }
        assert_eq!(notices.len(), MAX_NOTICES);
        assert_eq!(&*notices.to_vec()[0].message, "notice 5");
    }
}
