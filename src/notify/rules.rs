use serde::{Deserialize, Serialize};

use crate::config::NotificationRulesConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    ItemAccepted,
    ItemNeedsReview,
    ItemSkipped,
    ItemRejected,
    QueueDrained,
}

impl QueueEventKind {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::ItemAccepted => "item_accepted",
            Self::ItemNeedsReview => "item_needs_review",
            Self::ItemSkipped => "item_skipped",
            Self::ItemRejected => "item_rejected",
            Self::QueueDrained => "queue_drained",
        }
    }

    pub fn enabled_in(self, rules: &NotificationRulesConfig) -> bool {
        match self {
            Self::ItemAccepted => rules.item_accepted,
            Self::ItemNeedsReview => rules.item_needs_review,
            Self::ItemSkipped => rules.item_skipped,
            Self::ItemRejected => rules.item_rejected,
            Self::QueueDrained => rules.queue_drained,
        }
    }
}
