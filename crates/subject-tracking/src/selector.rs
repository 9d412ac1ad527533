//! Subject selection
//!
//! Decides which tracked person is the child. Precedence per frame:
//! 1. a manual pick this frame binds the entity under the point (or with the id)
//! 2. an existing binding, manual or automatic, is kept while its track is
//!    present as a person
//! 3. a binding absent for more than the grace count is released; a manual
//!    one falls back to auto
//! 4. with no binding, auto mode asks the strategy among qualifying people
//! 5. nothing qualifying leaves the subject unknown

use crate::entity::{BoundingBox, Point, TrackedEntity};
use crate::SelectorConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// How the current binding was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionMode {
    Manual,
    #[default]
    Auto,
}

/// User selection request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualPick {
    Point(Point),
    TrackId(u64),
}

/// Selector's durable record
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SubjectState {
    pub track_id: Option<u64>,
    pub mode: SelectionMode,
    /// Last known box, kept while the subject is absent
    pub last_bbox: Option<BoundingBox>,
    pub frames_since_seen: u32,
}

impl SubjectState {
    /// Box of the subject if it was seen this frame
    pub fn visible_bbox(&self) -> Option<&BoundingBox> {
        match (self.track_id, self.frames_since_seen) {
            (Some(_), 0) => self.last_bbox.as_ref(),
            _ => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible_bbox().is_some()
    }
}

/// Binding changes worth telling someone about
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEvent {
    /// User picked a subject
    ManualBound { track_id: u64 },
    /// User pick did not match any person
    PickMissed(ManualPick),
    /// Manual subject was gone too long
    FellBackToAuto { lost_track_id: u64 },
    /// Selection cleared by command
    Cleared,
}

impl SelectionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionEvent::ManualBound { .. } => "manual_bound",
            SelectionEvent::PickMissed(_) => "pick_missed",
            SelectionEvent::FellBackToAuto { .. } => "fell_back_to_auto",
            SelectionEvent::Cleared => "cleared",
        }
    }
}

/// Chooses one automatic candidate
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `candidates` are people at or above the confidence threshold
    fn choose<'a>(&self, candidates: &[&'a TrackedEntity]) -> Option<&'a TrackedEntity>;
}

/// Smallest bounding box wins; ties go to the lowest track id
pub struct SmallestArea;

impl SelectionStrategy for SmallestArea {
    fn name(&self) -> &'static str {
        "smallest_area"
    }

    fn choose<'a>(&self, candidates: &[&'a TrackedEntity]) -> Option<&'a TrackedEntity> {
        candidates.iter().copied().min_by(|a, b| {
            a.bbox
                .area()
                .partial_cmp(&b.bbox.area())
                .unwrap_or(Ordering::Equal)
                .then(a.track_id.cmp(&b.track_id))
        })
    }
}

/// Most confident detection wins; ties go to the lowest track id
pub struct LargestConfidence;

impl SelectionStrategy for LargestConfidence {
    fn name(&self) -> &'static str {
        "largest_confidence"
    }

    fn choose<'a>(&self, candidates: &[&'a TrackedEntity]) -> Option<&'a TrackedEntity> {
        candidates.iter().copied().min_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then(a.track_id.cmp(&b.track_id))
        })
    }
}

pub struct ManualOnly;

impl SelectionStrategy for ManualOnly {
    fn name(&self) -> &'static str {
        "manual_only"
    }

    fn choose<'a>(&self, _candidates: &[&'a TrackedEntity]) -> Option<&'a TrackedEntity> {
        None
    }
}

fn resolve_pick<'a>(entities: &'a [TrackedEntity], pick: &ManualPick) -> Option<&'a TrackedEntity> {
    let mut people = entities.iter().filter(|e| e.is_person());
    match pick {
        // Innermost box wins when boxes overlap
        ManualPick::Point(p) => people.filter(|e| e.bbox.contains(*p)).min_by(|a, b| {
            a.bbox
                .area()
                .partial_cmp(&b.bbox.area())
                .unwrap_or(Ordering::Equal)
                .then(a.track_id.cmp(&b.track_id))
        }),
        ManualPick::TrackId(id) => people.find(|e| e.track_id == *id),
    }
}

/// Apply the selection rules to one frame
pub fn select(
    entities: &[TrackedEntity],
    prior: &SubjectState,
    manual_pick: Option<&ManualPick>,
    config: &SelectorConfig,
    strategy: &dyn SelectionStrategy,
) -> (SubjectState, Option<SelectionEvent>) {
    select_within(entities, prior, manual_pick, config, strategy, None)
}

/// [`select`], with automatic candidates limited to people whose centre
/// lies in `auto_area`. Manual picks and existing bindings ignore the area.
pub fn select_within(
    entities: &[TrackedEntity],
    prior: &SubjectState,
    manual_pick: Option<&ManualPick>,
    config: &SelectorConfig,
    strategy: &dyn SelectionStrategy,
    auto_area: Option<&BoundingBox>,
) -> (SubjectState, Option<SelectionEvent>) {
    let mut event = None;

    if let Some(pick) = manual_pick {
        if let Some(entity) = resolve_pick(entities, pick) {
            let state = SubjectState {
                track_id: Some(entity.track_id),
                mode: SelectionMode::Manual,
                last_bbox: Some(entity.bbox),
                frames_since_seen: 0,
            };
            return (
                state,
                Some(SelectionEvent::ManualBound {
                    track_id: entity.track_id,
                }),
            );
        }
        event = Some(SelectionEvent::PickMissed(*pick));
    }

    if let Some(bound) = prior.track_id {
        if let Some(entity) = entities.iter().find(|e| e.track_id == bound && e.is_person()) {
            let state = SubjectState {
                track_id: Some(bound),
                mode: prior.mode,
                last_bbox: Some(entity.bbox),
                frames_since_seen: 0,
            };
            return (state, event);
        }

        let absent = prior.frames_since_seen.saturating_add(1);
        if absent <= config.manual_grace_frames {
            let state = SubjectState {
                frames_since_seen: absent,
                ..prior.clone()
            };
            return (state, event);
        }
        if prior.mode == SelectionMode::Manual {
            event = Some(SelectionEvent::FellBackToAuto {
                lost_track_id: bound,
            });
        }
    }

    let candidates: Vec<&TrackedEntity> = entities
        .iter()
        .filter(|e| e.is_person() && e.confidence >= config.confidence_threshold)
        .filter(|e| auto_area.map_or(true, |area| area.contains(e.bbox.center())))
        .collect();

    let state = match strategy.choose(&candidates) {
        Some(entity) => SubjectState {
            track_id: Some(entity.track_id),
            mode: SelectionMode::Auto,
            last_bbox: Some(entity.bbox),
            frames_since_seen: 0,
        },
        None => SubjectState {
            track_id: None,
            mode: SelectionMode::Auto,
            last_bbox: prior.last_bbox,
            frames_since_seen: prior.frames_since_seen.saturating_add(1),
        },
    };
    (state, event)
}

/// Stateful selector owning the subject record
pub struct SubjectSelector {
    config: SelectorConfig,
    strategy: Box<dyn SelectionStrategy>,
    state: SubjectState,
    pending_pick: Option<ManualPick>,
}

impl SubjectSelector {
    pub fn new(config: SelectorConfig) -> Self {
        let strategy = config.strategy.build();
        Self::with_strategy(config, strategy)
    }

    pub fn with_strategy(config: SelectorConfig, strategy: Box<dyn SelectionStrategy>) -> Self {
        info!(strategy = strategy.name(), "Subject selector ready");
        Self {
            config,
            strategy,
            state: SubjectState::default(),
            pending_pick: None,
        }
    }

    /// Queue a manual pick for the next frame
    pub fn pick(&mut self, pick: ManualPick) {
        self.pending_pick = Some(pick);
    }

    /// Drop any binding; the next frame selects automatically
    pub fn clear(&mut self) -> SelectionEvent {
        info!(previous = ?self.state.track_id, "Selection cleared");
        self.state = SubjectState::default();
        self.pending_pick = None;
        SelectionEvent::Cleared
    }

    /// Run selection for one frame's entities
    pub fn update(&mut self, entities: &[TrackedEntity]) -> Option<SelectionEvent> {
        self.update_within(entities, None)
    }

    /// Like [`update`](Self::update), but automatic choices only consider
    /// people inside `auto_area`
    pub fn update_within(
        &mut self,
        entities: &[TrackedEntity],
        auto_area: Option<&BoundingBox>,
    ) -> Option<SelectionEvent> {
        let pick = self.pending_pick.take();
        let previous = self.state.track_id;
        let (state, event) = select_within(
            entities,
            &self.state,
            pick.as_ref(),
            &self.config,
            self.strategy.as_ref(),
            auto_area,
        );

        match &event {
            Some(SelectionEvent::ManualBound { track_id }) => {
                info!(track_id, "Subject selected manually");
            }
            Some(SelectionEvent::PickMissed(pick)) => {
                warn!(?pick, "No person at selection");
            }
            Some(SelectionEvent::FellBackToAuto { lost_track_id }) => {
                info!(lost_track_id, "Manual subject lost; automatic selection resumed");
            }
            _ => {}
        }
        if let Some(event) = &event {
            metrics::counter!("subject_selection_events_total", "event" => event.as_str()).increment(1);
        }
        if state.track_id != previous {
            debug!(from = ?previous, to = ?state.track_id, mode = ?state.mode, "Subject binding changed");
        }

        self.state = state;
        event
    }

    pub fn state(&self) -> &SubjectState {
        &self.state
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ClassLabel;
    use crate::StrategyKind;
    use proptest::prelude::*;

    fn config(grace: u32) -> SelectorConfig {
        SelectorConfig {
            confidence_threshold: 0.4,
            manual_grace_frames: grace,
            strategy: StrategyKind::SmallestArea,
        }
    }

    fn person(id: u64, x: f32, size: f32, confidence: f32) -> TrackedEntity {
        TrackedEntity::person(id, BoundingBox::new(x, 0.0, size, size), confidence)
    }

    #[test]
    fn test_auto_picks_smallest_person() {
        let mut selector = SubjectSelector::new(config(5));
        let entities = vec![
            person(1, 0.0, 200.0, 0.9),
            person(2, 300.0, 80.0, 0.8),
            person(3, 600.0, 50.0, 0.3),
            TrackedEntity {
                track_id: 4,
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                class: ClassLabel::Furniture,
                confidence: 0.9,
            },
        ];
        selector.update(&entities);
        assert_eq!(selector.state().track_id, Some(2));
        assert_eq!(selector.state().mode, SelectionMode::Auto);
        assert!(selector.state().is_visible());
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let entities = vec![person(9, 0.0, 50.0, 0.9), person(4, 100.0, 50.0, 0.9)];
        let (state, _) = select(&entities, &SubjectState::default(), None, &config(5), &SmallestArea);
        assert_eq!(state.track_id, Some(4));
    }

    #[test]
    fn test_manual_point_pick() {
        let mut selector = SubjectSelector::new(config(5));
        let entities = vec![person(1, 0.0, 200.0, 0.9), person(2, 300.0, 80.0, 0.8)];
        selector.pick(ManualPick::Point(Point::new(50.0, 50.0)));
        let event = selector.update(&entities);
        assert_eq!(event, Some(SelectionEvent::ManualBound { track_id: 1 }));
        assert_eq!(selector.state().mode, SelectionMode::Manual);

        // Kept on later frames even though a smaller person exists
        assert_eq!(selector.update(&entities), None);
        assert_eq!(selector.state().track_id, Some(1));
    }

    #[test]
    fn test_missed_pick_keeps_auto() {
        let mut selector = SubjectSelector::new(config(5));
        let entities = vec![person(1, 0.0, 20.0, 0.9)];
        selector.pick(ManualPick::TrackId(42));
        let event = selector.update(&entities);
        assert!(matches!(event, Some(SelectionEvent::PickMissed(_))));
        assert_eq!(selector.state().track_id, Some(1));
        assert_eq!(selector.state().mode, SelectionMode::Auto);
    }

    #[test]
    fn test_manual_survives_short_absence() {
        let mut selector = SubjectSelector::new(config(3));
        let present = vec![person(1, 0.0, 200.0, 0.9), person(2, 300.0, 80.0, 0.8)];
        let absent = vec![person(2, 300.0, 80.0, 0.8)];

        selector.pick(ManualPick::TrackId(1));
        selector.update(&present);
        for n in 1..=3 {
            selector.update(&absent);
            assert_eq!(selector.state().mode, SelectionMode::Manual);
            assert_eq!(selector.state().track_id, Some(1));
            assert_eq!(selector.state().frames_since_seen, n);
            assert!(!selector.state().is_visible());
        }
        selector.update(&present);
        assert_eq!(selector.state().mode, SelectionMode::Manual);
        assert_eq!(selector.state().frames_since_seen, 0);
    }

    #[test]
    fn test_manual_falls_back_after_grace() {
        let mut selector = SubjectSelector::new(config(2));
        let present = vec![person(1, 0.0, 200.0, 0.9)];
        let absent = vec![person(2, 300.0, 80.0, 0.8)];

        selector.pick(ManualPick::TrackId(1));
        selector.update(&present);
        selector.update(&absent);
        selector.update(&absent);
        let event = selector.update(&absent);
        assert_eq!(event, Some(SelectionEvent::FellBackToAuto { lost_track_id: 1 }));
        assert_eq!(selector.state().mode, SelectionMode::Auto);
        assert_eq!(selector.state().track_id, Some(2));
    }

    #[test]
    fn test_no_candidates_is_unknown() {
        let mut selector = SubjectSelector::new(config(0));
        selector.update(&[person(1, 0.0, 20.0, 0.9)]);
        selector.update(&[]);
        let state = selector.state();
        assert_eq!(state.track_id, None);
        assert_eq!(state.frames_since_seen, 1);
        assert!(state.last_bbox.is_some());
        assert!(!state.is_visible());
    }

    #[test]
    fn test_auto_binding_is_kept_when_sizes_swap() {
        let mut selector = SubjectSelector::new(config(3));
        selector.update(&[person(1, 0.0, 40.0, 0.9), person(2, 300.0, 41.0, 0.9)]);
        assert_eq!(selector.state().track_id, Some(1));

        for frame in 0..20 {
            // Track 2 flickers to the smaller box every other frame
            let other = if frame % 2 == 0 { 39.0 } else { 41.0 };
            let event = selector.update(&[person(1, 0.0, 40.0, 0.9), person(2, 300.0, other, 0.9)]);
            assert_eq!(event, None);
            assert_eq!(selector.state().track_id, Some(1));
            assert_eq!(selector.state().mode, SelectionMode::Auto);
        }
    }

    #[test]
    fn test_auto_binding_released_after_grace() {
        let mut selector = SubjectSelector::new(config(2));
        selector.update(&[person(1, 0.0, 40.0, 0.9)]);
        let others = vec![person(2, 300.0, 90.0, 0.9)];

        for n in 1..=2 {
            assert_eq!(selector.update(&others), None);
            assert_eq!(selector.state().track_id, Some(1));
            assert_eq!(selector.state().frames_since_seen, n);
            assert!(!selector.state().is_visible());
        }
        // Automatic rebinding is silent
        assert_eq!(selector.update(&others), None);
        assert_eq!(selector.state().track_id, Some(2));
        assert_eq!(selector.state().mode, SelectionMode::Auto);
        assert!(selector.state().is_visible());
    }

    #[test]
    fn test_bound_track_that_stops_being_a_person_counts_as_absent() {
        let mut selector = SubjectSelector::new(config(1));
        selector.pick(ManualPick::TrackId(5));
        selector.update(&[person(5, 0.0, 40.0, 0.9)]);

        let relabeled = TrackedEntity {
            track_id: 5,
            bbox: BoundingBox::new(0.0, 0.0, 40.0, 40.0),
            class: ClassLabel::Furniture,
            confidence: 0.9,
        };
        selector.update(std::slice::from_ref(&relabeled));
        assert_eq!(selector.state().frames_since_seen, 1);
        assert!(!selector.state().is_visible());

        let event = selector.update(std::slice::from_ref(&relabeled));
        assert_eq!(event, Some(SelectionEvent::FellBackToAuto { lost_track_id: 5 }));
        assert_eq!(selector.state().track_id, None);
    }

    #[test]
    fn test_auto_area_limits_fallback_and_missed_picks() {
        let area = BoundingBox::new(0.0, 0.0, 250.0, 250.0);
        // Track 3 is the smallest but sits outside the area
        let entities = vec![
            person(1, 0.0, 200.0, 0.9),
            person(2, 100.0, 80.0, 0.9),
            person(3, 400.0, 20.0, 0.9),
        ];

        let mut selector = SubjectSelector::new(config(0));
        selector.pick(ManualPick::TrackId(42));
        let event = selector.update_within(&entities, Some(&area));
        assert!(matches!(event, Some(SelectionEvent::PickMissed(_))));
        assert_eq!(selector.state().track_id, Some(2));

        selector.pick(ManualPick::TrackId(1));
        selector.update_within(&entities, Some(&area));
        let event = selector.update_within(&entities[1..], Some(&area));
        assert_eq!(event, Some(SelectionEvent::FellBackToAuto { lost_track_id: 1 }));
        assert_eq!(selector.state().track_id, Some(2));

        // Manual picks may bind outside the area
        selector.pick(ManualPick::TrackId(3));
        selector.update_within(&entities, Some(&area));
        assert_eq!(selector.state().track_id, Some(3));
        assert_eq!(selector.state().mode, SelectionMode::Manual);
    }

    #[test]
    fn test_manual_only_never_auto_binds() {
        let mut selector = SubjectSelector::with_strategy(config(2), Box::new(ManualOnly));
        selector.update(&[person(1, 0.0, 20.0, 0.9)]);
        assert_eq!(selector.state().track_id, None);

        selector.pick(ManualPick::TrackId(1));
        selector.update(&[person(1, 0.0, 20.0, 0.9)]);
        assert_eq!(selector.state().track_id, Some(1));
    }

    #[test]
    fn test_largest_confidence() {
        let entities = vec![person(1, 0.0, 20.0, 0.5), person(2, 0.0, 200.0, 0.95)];
        let (state, _) = select(
            &entities,
            &SubjectState::default(),
            None,
            &config(2),
            &LargestConfidence,
        );
        assert_eq!(state.track_id, Some(2));
    }

    #[test]
    fn test_clear_resets() {
        let mut selector = SubjectSelector::new(config(2));
        selector.pick(ManualPick::TrackId(1));
        selector.update(&[person(1, 0.0, 20.0, 0.9)]);
        assert_eq!(selector.clear(), SelectionEvent::Cleared);
        assert_eq!(selector.state(), &SubjectState::default());
    }

    proptest! {
        #[test]
        fn prop_auto_choice_is_minimal_and_order_independent(
            raw in prop::collection::vec((0u64..20, 1.0f32..300.0, 0.0f32..1.0), 0..12)
        ) {
            let entities: Vec<TrackedEntity> = raw
                .iter()
                .map(|(id, size, conf)| person(*id, 0.0, *size, *conf))
                .collect();
            let mut reversed = entities.clone();
            reversed.reverse();

            let cfg = config(5);
            let (a, _) = select(&entities, &SubjectState::default(), None, &cfg, &SmallestArea);
            let (b, _) = select(&reversed, &SubjectState::default(), None, &cfg, &SmallestArea);
            prop_assert_eq!(a.track_id, b.track_id);

            let qualifying: Vec<&TrackedEntity> =
                entities.iter().filter(|e| e.confidence >= 0.4).collect();
            match a.track_id {
                None => prop_assert!(qualifying.is_empty()),
                Some(_) => {
                    let chosen = a.last_bbox.unwrap().area();
                    prop_assert!(qualifying.iter().all(|e| e.bbox.area() >= chosen));
                }
            }
        }

        #[test]
        fn prop_manual_kept_within_grace(grace in 1u32..10, gap in 0u32..10) {
            prop_assume!(gap <= grace);
            let cfg = config(grace);
            let present = vec![person(7, 0.0, 200.0, 0.9), person(8, 0.0, 10.0, 0.9)];
            let absent = vec![person(8, 0.0, 10.0, 0.9)];

            let (mut state, _) = select(&present, &SubjectState::default(), Some(&ManualPick::TrackId(7)), &cfg, &SmallestArea);
            for _ in 0..gap {
                state = select(&absent, &state, None, &cfg, &SmallestArea).0;
                prop_assert_eq!(state.mode, SelectionMode::Manual);
            }
            state = select(&present, &state, None, &cfg, &SmallestArea).0;
            prop_assert_eq!(state.mode, SelectionMode::Manual);
            prop_assert_eq!(state.track_id, Some(7));
        }
    }
}
