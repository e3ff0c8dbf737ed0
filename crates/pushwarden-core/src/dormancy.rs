//! Background-transition tracking.
//!
//! Turns raw page lifecycle transitions (visibility, focus, freeze, network)
//! into [`LifecycleSignal`]s annotated with how long the app was dormant.
//! Duplicate transitions (e.g. two `hidden` events in a row) are swallowed.

use serde::{Deserialize, Serialize};

/// Lifecycle transition reported by the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageTransition {
    Visible,
    Hidden,
    Focus,
    Blur,
    Frozen,
    Resumed,
    Online,
    Offline,
}

/// Classified transition. `dormant_ms` is set on the "coming back" edges:
/// hidden time for `visible`, frozen time for `resumed`, blurred time for
/// `focus`, offline time for `online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSignal {
    #[serde(rename = "type")]
    pub kind: PageTransition,
    #[serde(rename = "dormantMs", default, skip_serializing_if = "Option::is_none")]
    pub dormant_ms: Option<u64>,
}

impl LifecycleSignal {
    pub fn new(kind: PageTransition, dormant_ms: Option<u64>) -> Self {
        Self { kind, dormant_ms }
    }
}

/// A single background -> foreground transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DormancyWindow {
    pub hidden_since_ms: u64,
    pub visible_at_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DormancyTracker {
    hidden_since_ms: Option<u64>,
    frozen_since_ms: Option<u64>,
    blurred_since_ms: Option<u64>,
    offline_since_ms: Option<u64>,
    last_window: Option<DormancyWindow>,
}

impl Default for DormancyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DormancyTracker {
    /// Starts visible, focused, and online.
    pub fn new() -> Self {
        Self {
            hidden_since_ms: None,
            frozen_since_ms: None,
            blurred_since_ms: None,
            offline_since_ms: None,
            last_window: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden_since_ms.is_some()
    }

    pub fn is_online(&self) -> bool {
        self.offline_since_ms.is_none()
    }

    /// The most recently closed hidden -> visible window.
    pub fn last_window(&self) -> Option<&DormancyWindow> {
        self.last_window.as_ref()
    }

    /// Feed one transition at `now_ms`. Returns `None` for duplicates.
    pub fn observe(&mut self, transition: PageTransition, now_ms: u64) -> Option<LifecycleSignal> {
        match transition {
            PageTransition::Hidden => {
                if self.hidden_since_ms.is_some() {
                    return None;
                }
                self.hidden_since_ms = Some(now_ms);
                Some(LifecycleSignal::new(PageTransition::Hidden, None))
            }
            PageTransition::Visible => {
                let hidden_since_ms = self.hidden_since_ms.take()?;
                let window = DormancyWindow {
                    hidden_since_ms,
                    visible_at_ms: now_ms,
                    duration_ms: now_ms.saturating_sub(hidden_since_ms),
                };
                self.last_window = Some(window);
                Some(LifecycleSignal::new(
                    PageTransition::Visible,
                    Some(window.duration_ms),
                ))
            }
            PageTransition::Blur => {
                if self.blurred_since_ms.is_some() {
                    return None;
                }
                self.blurred_since_ms = Some(now_ms);
                Some(LifecycleSignal::new(PageTransition::Blur, None))
            }
            PageTransition::Focus => {
                // Focus without a preceding blur still counts: some hosts only
                // report focus. Inactivity is then zero.
                let inactive_ms = self
                    .blurred_since_ms
                    .take()
                    .map_or(0, |since| now_ms.saturating_sub(since));
                Some(LifecycleSignal::new(PageTransition::Focus, Some(inactive_ms)))
            }
            PageTransition::Frozen => {
                if self.frozen_since_ms.is_some() {
                    return None;
                }
                self.frozen_since_ms = Some(now_ms);
                Some(LifecycleSignal::new(PageTransition::Frozen, None))
            }
            PageTransition::Resumed => {
                // Resume is always reported: the freeze event itself may have
                // been lost with the torn-down execution context.
                let frozen_ms = self
                    .frozen_since_ms
                    .take()
                    .map(|since| now_ms.saturating_sub(since));
                Some(LifecycleSignal::new(PageTransition::Resumed, frozen_ms))
            }
            PageTransition::Offline => {
                if self.offline_since_ms.is_some() {
                    return None;
                }
                self.offline_since_ms = Some(now_ms);
                Some(LifecycleSignal::new(PageTransition::Offline, None))
            }
            PageTransition::Online => {
                let offline_since = self.offline_since_ms.take()?;
                Some(LifecycleSignal::new(
                    PageTransition::Online,
                    Some(now_ms.saturating_sub(offline_since)),
                ))
            }
        }
    }
}
