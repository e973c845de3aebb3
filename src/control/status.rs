//! Status projection for the display collaborator.

use super::gate::SafetyGateState;
use super::roster::RosterStore;
use crate::transport::LinkState;

/// Everything a status display shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Link connectivity.
    pub link: LinkState,
    /// Index of the selected locomotive.
    pub selected_index: Option<usize>,
    /// Id of the selected locomotive.
    pub selected_id: Option<String>,
    /// Number of locomotives in the roster.
    pub roster_size: usize,
    /// Direction of travel.
    pub forward: bool,
    /// Speed is held at zero until the dial returns to zero.
    pub zero_required: bool,
}

impl StatusSnapshot {
    /// Build a snapshot from component state.
    pub fn project(
        link: LinkState,
        roster: &RosterStore,
        gate: SafetyGateState,
        forward: bool,
    ) -> Self {
        let selection = roster.current_selection();
        Self {
            link,
            selected_index: selection.map(|(index, _)| index),
            selected_id: selection.map(|(_, loco)| loco.id.clone()),
            roster_size: roster.len(),
            forward,
            zero_required: gate.armed_zero_required,
        }
    }
}

/// Remembers the last published snapshot so only changes go out.
#[derive(Debug, Default)]
pub struct StatusProjector {
    last: Option<StatusSnapshot>,
}

impl StatusProjector {
    /// Create a projector that has published nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snapshot`. Returns it if it differs from the last one.
    pub fn update(&mut self, snapshot: StatusSnapshot) -> Option<&StatusSnapshot> {
        if self.last.as_ref() == Some(&snapshot) {
            return None;
        }
        self.last = Some(snapshot);
        self.last.as_ref()
    }

    /// Last published snapshot.
    pub fn last(&self) -> Option<&StatusSnapshot> {
        self.last.as_ref()
    }
}
