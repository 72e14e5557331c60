use serde::{Deserialize, Serialize};

/// An item lying on a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub kind: String,
    pub active: bool,
    /// Turns left until the countdown action fires.
    pub countdown: Option<i64>,
    pub countdown_action: Option<String>,
}

impl Item {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            active: false,
            countdown: None,
            countdown_action: None,
        }
    }

    /// An active item that runs `action` after `turns`.
    pub fn with_countdown(kind: impl Into<String>, turns: i64, action: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            active: true,
            countdown: Some(turns),
            countdown_action: Some(action.into()),
        }
    }

    pub fn has_running_countdown(&self) -> bool {
        self.active && self.countdown.is_some()
    }

    /// Move the countdown forward without running the action.
    pub fn advance_countdown(&mut self, turns: i64) {
        if !self.active || turns <= 0 {
            return;
        }
        if let Some(left) = self.countdown.as_mut() {
            *left = (*left - turns).max(0);
        }
    }

    pub fn countdown_due(&self) -> bool {
        self.active && matches!(self.countdown, Some(left) if left <= 0)
    }

    /// In-bubble per-turn processing. Returns the action to run once the
    /// countdown reaches zero; the countdown is cleared when it fires.
    pub fn process_countdown(&mut self) -> Option<String> {
        if !self.has_running_countdown() {
            return None;
        }
        self.advance_countdown(1);
        if self.countdown_due() {
            self.countdown = None;
            self.active = false;
            return self.countdown_action.take();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_items_do_not_count_down() {
        let mut item = Item::with_countdown("grenade", 5, "explode");
        item.active = false;
        item.advance_countdown(3);
        assert_eq!(item.countdown, Some(5));
        assert_eq!(item.process_countdown(), None);
    }

    #[test]
    fn countdown_fires_in_bubble() {
        let mut item = Item::with_countdown("grenade", 2, "explode");
        assert_eq!(item.process_countdown(), None);
        assert_eq!(item.process_countdown().as_deref(), Some("explode"));
        assert!(!item.active);
        assert_eq!(item.process_countdown(), None);
    }

    #[test]
    fn advance_saturates_at_zero_without_firing() {
        let mut item = Item::with_countdown("grenade", 4, "explode");
        item.advance_countdown(100);
        assert_eq!(item.countdown, Some(0));
        assert!(item.countdown_due());
        // the action is still pending for the next in-bubble turn
        assert_eq!(item.countdown_action.as_deref(), Some("explode"));
        assert_eq!(item.process_countdown().as_deref(), Some("explode"));
    }
}
