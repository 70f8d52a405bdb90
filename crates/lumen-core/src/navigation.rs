//! Navigation depth inside an active plugin.
//!
//! Depth counts how far the user has drilled into a plugin's views; 0 is the
//! landing view. The depth after a view-producing response is a pure function
//! of the current depth and a [`Transition`], which [`resolve`] derives from
//! the response's hints and the flag recorded when the request was sent.

use std::time::{Duration, Instant};

use crate::plugin::NavHints;

/// Reserved item id plugins use for their "back" row
pub const BACK_ID: &str = "__back__";

/// Reserved ids are wrapped in double underscores and never imply navigation
#[must_use]
pub fn is_reserved_id(id: &str) -> bool {
    id.len() > 4 && id.starts_with("__") && id.ends_with("__")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Explicit depth from the plugin, clamped at 0
    Absolute(i64),
    Back,
    Forward,
    Stay,
    /// Plugin closed
    Reset,
    /// View entered through a stored entry point with the launcher kept open
    Replay,
}

/// Expectation recorded when a request is sent, consumed by its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingNav {
    Forward,
    Back,
}

/// Apply a transition to a depth
#[must_use]
pub fn apply(depth: u32, transition: Transition) -> u32 {
    match transition {
        Transition::Absolute(n) => u32::try_from(n.max(0)).unwrap_or(u32::MAX),
        Transition::Back => depth.saturating_sub(1),
        Transition::Forward => depth.saturating_add(1),
        Transition::Stay => depth,
        Transition::Reset => 0,
        Transition::Replay => 1,
    }
}

/// Pick the transition for a view-producing response.
///
/// Explicit depth beats explicit direction, which beats the pending flag.
#[must_use]
pub fn resolve(hints: NavHints, pending: Option<PendingNav>) -> Transition {
    if let Some(depth) = hints.navigation_depth {
        return Transition::Absolute(depth);
    }
    if hints.navigate_back == Some(true) {
        return Transition::Back;
    }
    if hints.navigate_forward == Some(true) {
        return Transition::Forward;
    }
    match pending {
        Some(PendingNav::Forward) => Transition::Forward,
        Some(PendingNav::Back) => Transition::Back,
        None => Transition::Stay,
    }
}

/// Pending flag implied by selecting an item
#[must_use]
pub fn pending_for_selection(item_id: &str, action: Option<&str>) -> Option<PendingNav> {
    if item_id == BACK_ID {
        return Some(PendingNav::Back);
    }
    if action.is_none() && !is_reserved_id(item_id) {
        return Some(PendingNav::Forward);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeOutcome {
    /// Step back one level inside the plugin
    Back,
    /// Close the plugin outright
    Close,
}

/// Per-session navigation state
#[derive(Debug, Clone)]
pub struct Navigator {
    depth: u32,
    pending: Option<PendingNav>,
    last_escape: Option<Instant>,
    double_escape: Duration,
}

impl Navigator {
    #[must_use]
    pub fn new(double_escape: Duration) -> Self {
        Self {
            depth: 0,
            pending: None,
            last_escape: None,
            double_escape,
        }
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn pending(&self) -> Option<PendingNav> {
        self.pending
    }

    /// Record the flag for the request about to be sent. Replaces any flag
    /// left by an earlier request that produced no view.
    pub fn on_request(&mut self, pending: Option<PendingNav>) {
        self.pending = pending;
    }

    /// Consume the pending flag for a view-producing response and return the
    /// new depth
    pub fn on_view(&mut self, hints: NavHints) -> u32 {
        let transition = resolve(hints, self.pending.take());
        self.depth = apply(self.depth, transition);
        self.depth
    }

    /// Drop the pending flag for a response that produced no view
    pub fn on_non_view(&mut self) {
        self.pending = None;
    }

    pub fn on_escape(&mut self, now: Instant) -> EscapeOutcome {
        if self.depth == 0 {
            self.last_escape = None;
            return EscapeOutcome::Close;
        }

        let quick = self
            .last_escape
            .is_some_and(|prev| now.saturating_duration_since(prev) <= self.double_escape);
        if quick {
            self.last_escape = None;
            EscapeOutcome::Close
        } else {
            self.last_escape = Some(now);
            EscapeOutcome::Back
        }
    }

    pub fn reset(&mut self) {
        self.depth = apply(self.depth, Transition::Reset);
        self.pending = None;
        self.last_escape = None;
    }

    pub fn enter_replay(&mut self) {
        self.depth = apply(self.depth, Transition::Replay);
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hints(forward: Option<bool>, back: Option<bool>, depth: Option<i64>) -> NavHints {
        NavHints {
            navigate_forward: forward,
            navigate_back: back,
            navigation_depth: depth,
        }
    }

    #[test]
    fn explicit_depth_wins_over_everything() {
        let t = resolve(hints(Some(true), Some(true), Some(5)), Some(PendingNav::Back));
        assert_eq!(t, Transition::Absolute(5));
        assert_eq!(apply(2, t), 5);
        assert_eq!(apply(2, Transition::Absolute(-3)), 0);
    }

    #[test]
    fn explicit_direction_beats_pending_flag() {
        assert_eq!(
            resolve(hints(None, Some(true), None), Some(PendingNav::Forward)),
            Transition::Back
        );
        assert_eq!(
            resolve(hints(Some(true), None, None), Some(PendingNav::Back)),
            Transition::Forward
        );
    }

    #[test]
    fn pending_flag_applies_without_hints() {
        assert_eq!(
            resolve(NavHints::default(), Some(PendingNav::Forward)),
            Transition::Forward
        );
        assert_eq!(resolve(NavHints::default(), None), Transition::Stay);
    }

    #[test]
    fn back_at_root_is_noop() {
        assert_eq!(apply(0, Transition::Back), 0);
    }

    #[test]
    fn selection_flags() {
        assert_eq!(pending_for_selection("item", None), Some(PendingNav::Forward));
        assert_eq!(pending_for_selection(BACK_ID, None), Some(PendingNav::Back));
        assert_eq!(pending_for_selection("item", Some("copy")), None);
        assert_eq!(pending_for_selection("__plugin__", None), None);
        assert!(!is_reserved_id("____"));
    }

    #[test]
    fn navigator_consumes_pending_once() {
        let mut nav = Navigator::new(Duration::from_millis(300));
        nav.on_request(pending_for_selection("folder", None));
        assert_eq!(nav.on_view(NavHints::default()), 1);
        assert_eq!(nav.pending(), None);

        // An action that updates the view in place keeps depth
        nav.on_request(pending_for_selection("folder", Some("rename")));
        assert_eq!(nav.on_view(NavHints::default()), 1);
    }

    #[test]
    fn non_view_response_clears_pending() {
        let mut nav = Navigator::new(Duration::from_millis(300));
        nav.on_request(Some(PendingNav::Forward));
        nav.on_non_view();
        assert_eq!(nav.on_view(NavHints::default()), 0);
    }

    #[test]
    fn double_escape_closes_at_depth() {
        let mut nav = Navigator::new(Duration::from_millis(300));
        nav.on_request(Some(PendingNav::Forward));
        nav.on_view(NavHints::default());
        nav.on_request(Some(PendingNav::Forward));
        nav.on_view(NavHints::default());
        assert_eq!(nav.depth(), 2);

        let t0 = Instant::now();
        assert_eq!(nav.on_escape(t0), EscapeOutcome::Back);
        assert_eq!(
            nav.on_escape(t0 + Duration::from_millis(120)),
            EscapeOutcome::Close
        );
    }

    #[test]
    fn slow_escapes_step_back() {
        let mut nav = Navigator::new(Duration::from_millis(300));
        nav.on_view(hints(None, None, Some(3)));

        let t0 = Instant::now();
        assert_eq!(nav.on_escape(t0), EscapeOutcome::Back);
        assert_eq!(
            nav.on_escape(t0 + Duration::from_millis(800)),
            EscapeOutcome::Back
        );
    }

    #[test]
    fn escape_at_root_closes() {
        let mut nav = Navigator::new(Duration::from_millis(300));
        assert_eq!(nav.on_escape(Instant::now()), EscapeOutcome::Close);
    }

    #[test]
    fn replay_and_reset() {
        let mut nav = Navigator::new(Duration::from_millis(300));
        nav.enter_replay();
        assert_eq!(nav.depth(), 1);
        nav.on_view(hints(None, None, Some(4)));
        nav.reset();
        assert_eq!(nav.depth(), 0);
        assert_eq!(nav.pending(), None);
    }

    fn transition_strategy() -> impl Strategy<Value = Transition> {
        prop_oneof![
            (-10i64..10).prop_map(Transition::Absolute),
            Just(Transition::Back),
            Just(Transition::Forward),
            Just(Transition::Stay),
            Just(Transition::Reset),
            Just(Transition::Replay),
        ]
    }

    proptest! {
        #[test]
        fn back_never_underflows(depth in 0u32..1000) {
            prop_assert_eq!(apply(depth, Transition::Back), depth.saturating_sub(1));
        }

        #[test]
        fn reset_always_lands_at_root(
            transitions in proptest::collection::vec(transition_strategy(), 0..32)
        ) {
            let depth = transitions.into_iter().fold(0, apply);
            prop_assert_eq!(apply(depth, Transition::Reset), 0);
        }

        #[test]
        fn forward_then_back_restores_depth(depth in 0u32..1000) {
            prop_assert_eq!(apply(apply(depth, Transition::Forward), Transition::Back), depth);
        }

        #[test]
        fn stay_without_hints_or_pending(depth in 0u32..1000) {
            let t = resolve(NavHints::default(), None);
            prop_assert_eq!(apply(depth, t), depth);
        }

        #[test]
        fn explicit_depth_is_clamped(depth in 0u32..1000, target in -1000i64..1000) {
            let t = resolve(hints(None, None, Some(target)), Some(PendingNav::Forward));
            prop_assert_eq!(i64::from(apply(depth, t)), target.max(0));
        }
    }
}
