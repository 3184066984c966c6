//! Built-in sorts, constants, predicates and fluents shared by every
//! compilation, plus the names user symbols must stay clear of.

use crate::core::types::{GENERIC, MAX_RETRY};
use crate::pddl::{ConstId, FluentId, PredId, SortId, SymbolTable};

pub const SORT_OPERATOR: &str = "operator";
pub const SORT_HAS_DONE_STATE: &str = "has-done-state";
pub const SORT_DATUM_STATE: &str = "datum-state";
pub const SORT_CONSTRAINT_STATUS: &str = "constraint-status";
pub const SORT_NUM_RETRIES: &str = "num-retries";
pub const SORT_LABEL: &str = "label";

/// Sort names a declared type may not take.
pub const BUILTIN_SORTS: &[&str] = &[
    GENERIC,
    SORT_OPERATOR,
    SORT_HAS_DONE_STATE,
    SORT_DATUM_STATE,
    SORT_CONSTRAINT_STATUS,
    SORT_NUM_RETRIES,
    SORT_LABEL,
    "object",
    "number",
];

/// Step names with built-in meaning.
pub const ASK: &str = "ask";
pub const MAP: &str = "map";
pub const CONFIRM: &str = "confirm";
pub const ASK_LAST_RESORT: &str = "ask_last_resort";
pub const ASK_ALL_FOR: &str = "ask_all_for";
pub const MAP_FREE_ALT: &str = "map--free-alt";
pub const CONSTRAINT_TO_TRUE: &str = "constraint_to_true";
pub const CONSTRAINT_TO_FALSE: &str = "constraint_to_false";

/// Action names operators may not take.
pub const BUILTIN_ACTIONS: &[&str] = &[
    ASK,
    MAP,
    CONFIRM,
    ASK_LAST_RESORT,
    ASK_ALL_FOR,
    CONSTRAINT_TO_TRUE,
    CONSTRAINT_TO_FALSE,
];

/// Bookkeeping actions dropped when lifting a plan.
pub const RESTRICTED_PREFIXES: &[&str] = &[
    "tokenize_",
    "untokenize_",
    "goal-",
    "enabler_",
    "manifest_",
    "label_maker",
];

/// Prefix of reserved per-type fresh objects.
pub const LOOKAHEAD_PREFIX: &str = "new_object_";

/// Prefix of retry-level constants.
pub const TRY_LEVEL_PREFIX: &str = "try_level_";

pub fn try_level(k: u32) -> String {
    format!("{}{}", TRY_LEVEL_PREFIX, k)
}

/// Constant names data items may not take.
pub fn builtin_constants() -> Vec<String> {
    let mut names: Vec<String> = [
        "known",
        "uncertain",
        "unknown",
        "past",
        "present",
        "future",
        "true",
        "false",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    names.extend((0..=MAX_RETRY + 1).map(try_level));
    names
}

/// True when `name` is a restricted bookkeeping action.
pub fn is_restricted(name: &str) -> bool {
    RESTRICTED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Ids of the built-in symbols of one compilation.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub generic: SortId,
    pub operator: SortId,
    pub has_done_state: SortId,
    pub datum_state: SortId,
    pub constraint_status: SortId,
    pub num_retries: SortId,

    pub known: ConstId,
    pub uncertain: ConstId,
    pub unknown: ConstId,
    pub past: ConstId,
    pub present: ConstId,
    pub future: ConstId,
    pub true_: ConstId,
    pub false_: ConstId,
    pub try_levels: Vec<ConstId>,

    pub has_done: PredId,
    pub known_p: PredId,
    pub mapped_to: PredId,
    pub mapped: PredId,
    pub is_mappable: PredId,
    pub not_mappable: PredId,
    pub been_used: PredId,
    pub free: PredId,
    pub not_usable: PredId,
    pub new_item: PredId,
    pub not_slotfillable: PredId,
    pub connected: PredId,

    pub total_cost: FluentId,
    pub slot_goodness: FluentId,
    pub map_affinity: FluentId,
}

impl Vocabulary {
    /// Declare every built-in symbol. Sorts come first, then constants,
    /// predicates and fluents.
    pub fn declare(s: &mut SymbolTable) -> Self {
        let generic = s.declare_sort(GENERIC, None);
        let operator = s.declare_sort(SORT_OPERATOR, None);
        let has_done_state = s.declare_sort(SORT_HAS_DONE_STATE, None);
        let datum_state = s.declare_sort(SORT_DATUM_STATE, None);
        let constraint_status = s.declare_sort(SORT_CONSTRAINT_STATUS, None);
        let num_retries = s.declare_sort(SORT_NUM_RETRIES, None);

        let known = s.declare_constant("known", datum_state);
        let uncertain = s.declare_constant("uncertain", datum_state);
        let unknown = s.declare_constant("unknown", datum_state);
        let past = s.declare_constant("past", has_done_state);
        let present = s.declare_constant("present", has_done_state);
        let future = s.declare_constant("future", has_done_state);
        let true_ = s.declare_constant("true", constraint_status);
        let false_ = s.declare_constant("false", constraint_status);
        let try_levels = (0..=MAX_RETRY + 1)
            .map(|k| s.declare_constant(&try_level(k), num_retries))
            .collect();

        Self {
            generic,
            operator,
            has_done_state,
            datum_state,
            constraint_status,
            num_retries,
            known,
            uncertain,
            unknown,
            past,
            present,
            future,
            true_,
            false_,
            try_levels,
            has_done: s.declare_predicate("has_done", vec![operator, has_done_state]),
            known_p: s.declare_predicate("known", vec![generic, datum_state]),
            mapped_to: s.declare_predicate("mapped_to", vec![generic, generic]),
            mapped: s.declare_predicate("mapped", vec![generic]),
            is_mappable: s.declare_predicate("is_mappable", vec![generic, generic]),
            not_mappable: s.declare_predicate("not_mappable", vec![generic, generic]),
            been_used: s.declare_predicate("been_used", vec![generic]),
            free: s.declare_predicate("free", vec![generic]),
            not_usable: s.declare_predicate("not_usable", vec![generic]),
            new_item: s.declare_predicate("new_item", vec![generic]),
            not_slotfillable: s.declare_predicate("not_slotfillable", vec![generic]),
            connected: s.declare_predicate("connected", vec![operator, num_retries, num_retries]),
            total_cost: s.declare_fluent("total-cost", vec![]),
            slot_goodness: s.declare_fluent("slot_goodness", vec![generic]),
            map_affinity: s.declare_fluent("map_affinity", vec![generic, generic]),
        }
    }

    /// Retry level constant, clamped to the highest level.
    pub fn level(&self, k: usize) -> ConstId {
        let last = self.try_levels.len() - 1;
        self.try_levels[k.min(last)]
    }

    pub fn truth(&self, value: bool) -> ConstId {
        if value {
            self.true_
        } else {
            self.false_
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp008_builtin_constants() {
        let names = builtin_constants();
        assert!(names.contains(&"known".to_string()));
        assert!(names.contains(&"try_level_0".to_string()));
        assert!(names.contains(&format!("try_level_{}", MAX_RETRY + 1)));
        assert_eq!(names.len(), 8 + MAX_RETRY as usize + 2);
    }

    #[test]
    fn test_fp008_declare_order() {
        let mut s = SymbolTable::new();
        let v = Vocabulary::declare(&mut s);
        assert_eq!(v.generic, SortId(0));
        assert_eq!(s.constants_of(v.num_retries).len(), MAX_RETRY as usize + 2);
        assert_eq!(s.predicate(v.connected).params.len(), 3);
        assert_eq!(v.level(99), *v.try_levels.last().unwrap());
        assert_eq!(s.constant(v.truth(false)).name, "false");
    }

    #[test]
    fn test_fp008_restricted() {
        assert!(is_restricted("tokenize_3"));
        assert!(is_restricted("goal-0-1"));
        assert!(is_restricted("label_maker"));
        assert!(!is_restricted("ask"));
        assert!(!is_restricted("fix_errors"));
    }
}
