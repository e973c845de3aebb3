//! Locomotive roster.
//!
//! The server streams its locomotive list as `<lc>` elements between
//! `<lclist>` and `</lclist>`. Entries accumulate in a pending table that
//! replaces the live table only once the closing tag arrives, so a list cut
//! short by a dropped connection never leaves a half-built roster behind.
//!
//! `<lc>` elements outside a list carry speed and direction of a known
//! locomotive.

use crate::core::constants::{LOCO_LIST_TAG, LOCO_TAG, MAX_SPEED, MODEL_TAG};
use crate::transport::{ElementKind, InboundElement};

const DEFINITION_ATTRS: &[&str] = &[
    "image", "roadname", "desc", "dectype", "owner", "color", "number",
];
const STATUS_ATTRS: &[&str] = &["V", "dir", "server", "placing", "runtime", "throttleid"];

/// One controllable locomotive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locomotive {
    /// Server-side identifier, unique within the roster.
    pub id: String,
    /// Human readable label.
    pub display_name: String,
    /// Last speed reported by the server.
    pub last_known_speed: Option<u8>,
    /// Last direction reported by the server.
    pub last_known_forward: Option<bool>,
}

impl Locomotive {
    /// Create an entry with no reported state.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_known_speed: None,
            last_known_forward: None,
        }
    }

    fn from_definition(element: &InboundElement) -> Option<Self> {
        let non_blank = |name: &str| element.attr(name).map(str::trim).filter(|v| !v.is_empty());

        let id = non_blank("id")
            .filter(|id| *id != MODEL_TAG)
            .or_else(|| non_blank("shortid"))?;

        let display_name = if let Some(road) = non_blank("roadname") {
            format!("{id} ({road})")
        } else if let Some(number) = non_blank("number") {
            format!("{id} #{number}")
        } else {
            id.to_string()
        };

        let mut loco = Self::new(id, display_name);
        loco.apply_status(element);
        Some(loco)
    }

    fn apply_status(&mut self, element: &InboundElement) -> bool {
        let mut changed = false;
        if let Some(speed) = element.attr("V").and_then(|v| v.parse::<u16>().ok()) {
            let speed = u8::try_from(speed.min(u16::from(MAX_SPEED))).unwrap_or(MAX_SPEED);
            changed |= self.last_known_speed.replace(speed) != Some(speed);
        }
        let forward = match element.attr("dir") {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        };
        if let Some(forward) = forward {
            changed |= self.last_known_forward.replace(forward) != Some(forward);
        }
        changed
    }
}

/// What an ingested element did to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    /// A list started streaming.
    ListStarted,
    /// A complete list replaced the table.
    Replaced {
        /// Entries in the new table.
        entries: usize,
        /// Whether the previous selection survived.
        selection_kept: bool,
    },
    /// A known locomotive reported new speed or direction.
    StatusUpdated {
        /// Locomotive id.
        id: String,
    },
}

/// Locomotive table with a selection cursor.
#[derive(Debug, Clone)]
pub struct RosterStore {
    entries: Vec<Locomotive>,
    selected: usize,
    limit: usize,
    pending: Option<Vec<Locomotive>>,
    awaiting_list: bool,
    fallback: Option<Locomotive>,
}

impl RosterStore {
    /// Create a roster holding at most `limit` entries.
    ///
    /// When `fallback_id` is given, the table starts with that locomotive and
    /// falls back to it whenever the server sends an empty list.
    pub fn new(limit: usize, fallback_id: Option<&str>) -> Self {
        let fallback = fallback_id.map(|id| Locomotive::new(id, id));
        Self {
            entries: fallback.iter().cloned().collect(),
            selected: 0,
            limit: limit.max(1),
            pending: None,
            awaiting_list: false,
            fallback,
        }
    }

    /// Note that a fresh list has been requested.
    pub fn begin_refresh(&mut self) {
        self.awaiting_list = true;
        self.pending = None;
    }

    /// Drop a list that was being streamed. Returns whether one was.
    pub fn abort_refresh(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Whether a refresh was requested and has not completed.
    pub fn is_refreshing(&self) -> bool {
        self.awaiting_list || self.pending.is_some()
    }

    /// Whether a list is currently streaming in.
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Route one decoded element.
    pub fn ingest(&mut self, element: &InboundElement) -> Option<RosterChange> {
        if element.name == LOCO_LIST_TAG {
            return match element.kind {
                ElementKind::Start => {
                    self.pending = Some(Vec::new());
                    Some(RosterChange::ListStarted)
                }
                ElementKind::Empty => Some(self.commit(Vec::new())),
                ElementKind::End => {
                    let table = self.pending.take()?;
                    Some(self.commit(table))
                }
            };
        }

        if !element.opens(LOCO_TAG) {
            return None;
        }

        if self.pending.is_some() && is_definition(element) {
            self.push_pending(element);
            return None;
        }

        self.apply_status(element)
    }

    fn push_pending(&mut self, element: &InboundElement) {
        let Some(loco) = Locomotive::from_definition(element) else {
            tracing::debug!("roster entry without usable id skipped");
            return;
        };
        let limit = self.limit;
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if let Some(existing) = pending.iter_mut().find(|l| l.id == loco.id) {
            *existing = loco;
        } else if pending.len() < limit {
            pending.push(loco);
        } else {
            tracing::debug!(id = %loco.id, limit, "roster full, entry skipped");
        }
    }

    fn apply_status(&mut self, element: &InboundElement) -> Option<RosterChange> {
        let id = element.attr("id")?;
        let loco = self.entries.iter_mut().find(|l| l.id == id)?;
        loco.apply_status(element).then(|| RosterChange::StatusUpdated { id: id.to_string() })
    }

    fn commit(&mut self, mut table: Vec<Locomotive>) -> RosterChange {
        if table.is_empty() {
            table.extend(self.fallback.iter().cloned());
        }
        let previous = self.current_selection().map(|(_, loco)| loco.id.clone());
        let kept = previous
            .as_deref()
            .and_then(|id| table.iter().position(|l| l.id == id));

        self.entries = table;
        self.selected = kept.unwrap_or(0);
        self.awaiting_list = false;
        self.pending = None;

        tracing::info!(
            entries = self.entries.len(),
            selection_kept = kept.is_some(),
            "roster replaced"
        );
        RosterChange::Replaced {
            entries: self.entries.len(),
            selection_kept: kept.is_some(),
        }
    }

    /// Select the entry at `index`, clamped to the table.
    pub fn select(&mut self, index: usize) {
        self.selected = index.min(self.entries.len().saturating_sub(1));
    }

    /// Move the selection by `delta`, wrapping at both ends.
    pub fn advance(&mut self, delta: isize) {
        let len = self.entries.len();
        if len == 0 {
            return;
        }
        let len = len as isize;
        self.selected = (self.selected as isize + delta).rem_euclid(len) as usize;
    }

    /// Selected index and entry.
    pub fn current_selection(&self) -> Option<(usize, &Locomotive)> {
        self.entries.get(self.selected).map(|loco| (self.selected, loco))
    }

    /// Id of the selected locomotive.
    pub fn selected_id(&self) -> Option<&str> {
        self.current_selection().map(|(_, loco)| loco.id.as_str())
    }

    /// Look up a locomotive by id.
    pub fn get(&self, id: &str) -> Option<&Locomotive> {
        self.entries.iter().find(|l| l.id == id)
    }

    /// All entries in selection order.
    pub fn entries(&self) -> &[Locomotive] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

fn is_definition(element: &InboundElement) -> bool {
    let has = |names: &[&str]| names.iter().any(|name| element.attr(name).is_some());
    has(DEFINITION_ATTRS) || !has(STATUS_ATTRS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{drain_elements, ReceiveBuffer};

    fn feed(roster: &mut RosterStore, wire: &str) -> Vec<RosterChange> {
        let mut buf = ReceiveBuffer::new(4096);
        buf.append(wire.as_bytes()).unwrap();
        let mut changes = Vec::new();
        drain_elements(&mut buf, |e| changes.extend(roster.ingest(&e)));
        changes
    }

    fn ids(roster: &RosterStore) -> Vec<&str> {
        roster.entries().iter().map(|l| l.id.as_str()).collect()
    }

    const THREE: &str = "<lclist><lc id=\"A\" roadname=\"DB\"/><lc id=\"B\" number=\"7\"/><lc id=\"C\"/></lclist>";

    #[test]
    fn test_list_replaces_table_in_order() {
        let mut roster = RosterStore::new(5, Some("BR103"));
        assert_eq!(ids(&roster), vec!["BR103"]);

        let changes = feed(&mut roster, THREE);
        assert_eq!(changes.first(), Some(&RosterChange::ListStarted));
        assert_eq!(ids(&roster), vec!["A", "B", "C"]);
        assert_eq!(roster.entries()[0].display_name, "A (DB)");
        assert_eq!(roster.entries()[1].display_name, "B #7");
        assert_eq!(roster.entries()[2].display_name, "C");
    }

    #[test]
    fn test_partial_list_does_not_touch_table() {
        let mut roster = RosterStore::new(5, None);
        feed(&mut roster, THREE);

        feed(&mut roster, "<lclist><lc id=\"X\"/>");
        assert!(roster.is_loading());
        assert_eq!(ids(&roster), vec!["A", "B", "C"]);

        assert!(roster.abort_refresh());
        assert!(!roster.is_loading());
        assert_eq!(ids(&roster), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_id_fallbacks_and_reserved_id() {
        let mut roster = RosterStore::new(5, None);
        feed(
            &mut roster,
            "<lclist><lc id=\"model\" shortid=\"S1\"/><lc id=\"  \" shortid=\"S2\"/><lc id=\"model\"/><lc roadname=\"x\"/></lclist>",
        );
        assert_eq!(ids(&roster), vec!["S1", "S2"]);
    }

    #[test]
    fn test_limit_and_duplicates() {
        let mut roster = RosterStore::new(2, None);
        feed(
            &mut roster,
            "<lclist><lc id=\"A\"/><lc id=\"A\" roadname=\"again\"/><lc id=\"B\"/><lc id=\"C\"/></lclist>",
        );
        assert_eq!(ids(&roster), vec!["A", "B"]);
        assert_eq!(roster.entries()[0].display_name, "A (again)");
    }

    #[test]
    fn test_nested_definition_elements() {
        let mut roster = RosterStore::new(5, None);
        feed(
            &mut roster,
            "<lclist><lc id=\"A\" dectype=\"mm\"><fundef fn=\"1\" text=\"horn\"/></lc><lc id=\"B\"></lc></lclist>",
        );
        assert_eq!(ids(&roster), vec!["A", "B"]);
    }

    #[test]
    fn test_empty_list_falls_back_to_default() {
        let mut roster = RosterStore::new(5, Some("BR103"));
        feed(&mut roster, THREE);
        feed(&mut roster, "<lclist/>");
        assert_eq!(ids(&roster), vec!["BR103"]);
    }

    #[test]
    fn test_status_update_outside_list() {
        let mut roster = RosterStore::new(5, None);
        feed(&mut roster, THREE);

        let changes = feed(&mut roster, "<lc id=\"B\" V=\"42\" dir=\"false\"/>");
        assert_eq!(changes, vec![RosterChange::StatusUpdated { id: "B".into() }]);
        let b = roster.get("B").unwrap();
        assert_eq!(b.last_known_speed, Some(42));
        assert_eq!(b.last_known_forward, Some(false));

        // Same values again, and unknown ids, change nothing.
        assert!(feed(&mut roster, "<lc id=\"B\" V=\"42\" dir=\"false\"/>").is_empty());
        assert!(feed(&mut roster, "<lc id=\"Z\" V=\"1\"/>").is_empty());
    }

    #[test]
    fn test_status_entry_inside_list_is_not_a_definition() {
        let mut roster = RosterStore::new(5, None);
        feed(&mut roster, "<lclist><lc id=\"A\"/><lc id=\"Q\" V=\"3\" dir=\"true\"/></lclist>");
        assert_eq!(ids(&roster), vec!["A"]);
    }

    #[test]
    fn test_select_clamps_and_advance_wraps() {
        let mut roster = RosterStore::new(5, None);
        feed(&mut roster, THREE);

        roster.select(10);
        assert_eq!(roster.current_selection().unwrap().0, 2);

        roster.advance(1);
        assert_eq!(roster.selected_id(), Some("A"));
        roster.advance(-1);
        assert_eq!(roster.selected_id(), Some("C"));
        roster.advance(-4);
        assert_eq!(roster.selected_id(), Some("B"));
    }

    #[test]
    fn test_advance_wraps_on_full_roster() {
        let mut roster = RosterStore::new(5, None);
        feed(
            &mut roster,
            "<lclist><lc id=\"A\"/><lc id=\"B\"/><lc id=\"C\"/><lc id=\"D\"/><lc id=\"E\"/></lclist>",
        );
        assert_eq!(roster.len(), 5);

        roster.select(4);
        roster.advance(1);
        assert_eq!(roster.current_selection().unwrap().0, 0);
        roster.advance(-1);
        assert_eq!(roster.current_selection().unwrap().0, 4);
        assert_eq!(roster.selected_id(), Some("E"));
    }

    #[test]
    fn test_selection_preserved_by_id() {
        let mut roster = RosterStore::new(5, None);
        feed(&mut roster, THREE);
        roster.select(1);

        let changes = feed(&mut roster, "<lclist><lc id=\"X\"/><lc id=\"B\"/></lclist>");
        assert!(changes.contains(&RosterChange::Replaced {
            entries: 2,
            selection_kept: true
        }));
        assert_eq!(roster.current_selection().unwrap().0, 1);

        // B is gone: the selection falls back to the first entry.
        let changes = feed(&mut roster, "<lclist><lc id=\"Y\"/><lc id=\"X\"/></lclist>");
        assert!(changes.contains(&RosterChange::Replaced {
            entries: 2,
            selection_kept: false
        }));
        assert_eq!(roster.current_selection().unwrap().0, 0);
        assert_eq!(roster.selected_id(), Some("Y"));
    }

    #[test]
    fn test_empty_roster_selection() {
        let mut roster = RosterStore::new(5, None);
        roster.advance(1);
        roster.select(3);
        assert!(roster.current_selection().is_none());
    }

    #[test]
    fn test_refresh_flags() {
        let mut roster = RosterStore::new(5, None);
        roster.begin_refresh();
        assert!(roster.is_refreshing());
        assert!(!roster.is_loading());
        feed(&mut roster, THREE);
        assert!(!roster.is_refreshing());
    }
}
