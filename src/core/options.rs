//! FP-004: Compilation options.
//!
//! Every option group is a closed enum so unknown names fail at load time.
//! `check()` rejects combinations that have no defined meaning.

use super::error::CompileError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How goal groups combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalType {
    /// Every goal of every group
    #[default]
    AndAnd,
    /// Every goal of exactly one group
    OrAnd,
    /// One goal of every group
    AndOr,
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AndAnd => write!(f, "AND_AND"),
            Self::OrAnd => write!(f, "OR_AND"),
            Self::AndOr => write!(f, "AND_OR"),
        }
    }
}

/// Which producers leave values uncertain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifeCycleOption {
    ConfirmOnSlot,
    ConfirmOnMapping,
    ConfirmOnDetermination,
    UncertainOnUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlotOption {
    HigherCost,
    LastResort,
    Ordered,
    AllTogether,
    GroupSlots,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MappingOption {
    Transitive,
    ProhibitDirect,
    GroupMaps,
    IgnoreTypes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationOption {
    MultiInstance,
    AllowRetries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOption {
    GroupConfirms,
}

/// Debugger mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugFlag {
    Sound,
    Valid,
    Optimal,
}

impl fmt::Display for DebugFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sound => write!(f, "SOUND"),
            Self::Valid => write!(f, "VALID"),
            Self::Optimal => write!(f, "OPTIMAL"),
        }
    }
}

impl std::str::FromStr for DebugFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SOUND" => Ok(Self::Sound),
            "VALID" => Ok(Self::Valid),
            "OPTIMAL" => Ok(Self::Optimal),
            other => Err(format!("unknown debug flag '{}'", other)),
        }
    }
}

/// Options for one compile call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CompileOptions {
    #[serde(default)]
    pub goal_type: GoalType,

    #[serde(default)]
    pub variable_life_cycle: BTreeSet<LifeCycleOption>,

    #[serde(default = "default_slot_options")]
    pub slot_options: BTreeSet<SlotOption>,

    #[serde(default)]
    pub mapping_options: BTreeSet<MappingOption>,

    #[serde(default = "default_optimization_options")]
    pub optimization_options: BTreeSet<OptimizationOption>,

    #[serde(default)]
    pub confirm_options: BTreeSet<ConfirmOption>,

    /// Fresh objects reserved per datum type
    #[serde(default)]
    pub lookahead: u32,

    #[serde(default)]
    pub debug_flag: Option<DebugFlag>,
}

fn default_slot_options() -> BTreeSet<SlotOption> {
    BTreeSet::from([SlotOption::HigherCost])
}

fn default_optimization_options() -> BTreeSet<OptimizationOption> {
    BTreeSet::from([
        OptimizationOption::MultiInstance,
        OptimizationOption::AllowRetries,
    ])
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            goal_type: GoalType::default(),
            variable_life_cycle: BTreeSet::new(),
            slot_options: default_slot_options(),
            mapping_options: BTreeSet::new(),
            optimization_options: default_optimization_options(),
            confirm_options: BTreeSet::new(),
            lookahead: 0,
            debug_flag: None,
        }
    }
}

impl CompileOptions {
    /// Options with neither instance reification nor retries.
    pub fn classical() -> Self {
        Self {
            optimization_options: BTreeSet::new(),
            ..Self::default()
        }
    }

    pub fn with_goal_type(mut self, goal_type: GoalType) -> Self {
        self.goal_type = goal_type;
        self
    }

    pub fn with_slot(mut self, option: SlotOption) -> Self {
        self.slot_options.insert(option);
        self
    }

    pub fn with_mapping(mut self, option: MappingOption) -> Self {
        self.mapping_options.insert(option);
        self
    }

    pub fn with_life_cycle(mut self, option: LifeCycleOption) -> Self {
        self.variable_life_cycle.insert(option);
        self
    }

    pub fn with_confirm(mut self, option: ConfirmOption) -> Self {
        self.confirm_options.insert(option);
        self
    }

    pub fn with_lookahead(mut self, lookahead: u32) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_debug(mut self, flag: DebugFlag) -> Self {
        self.debug_flag = Some(flag);
        self
    }

    pub fn slot(&self, option: SlotOption) -> bool {
        self.slot_options.contains(&option)
    }

    pub fn mapping(&self, option: MappingOption) -> bool {
        self.mapping_options.contains(&option)
    }

    pub fn life_cycle(&self, option: LifeCycleOption) -> bool {
        self.variable_life_cycle.contains(&option)
    }

    pub fn has_life_cycle(&self) -> bool {
        !self.variable_life_cycle.is_empty()
    }

    pub fn multi_instance(&self) -> bool {
        self.optimization_options
            .contains(&OptimizationOption::MultiInstance)
    }

    pub fn allow_retries(&self) -> bool {
        self.optimization_options
            .contains(&OptimizationOption::AllowRetries)
    }

    pub fn group_confirms(&self) -> bool {
        self.confirm_options.contains(&ConfirmOption::GroupConfirms)
    }

    /// Reject option combinations without a defined meaning.
    pub fn check(&self) -> Result<(), CompileError> {
        if self.slot(SlotOption::Ordered) && self.slot(SlotOption::AllTogether) {
            return Err(CompileError::InconsistentOption(
                "slot option 'ordered' cannot be combined with 'all_together'".to_string(),
            ));
        }
        if self.lookahead > 0 && !self.multi_instance() {
            return Err(CompileError::InconsistentOption(format!(
                "lookahead {} requires optimization option 'multi_instance'",
                self.lookahead
            )));
        }
        if self.group_confirms() && !self.has_life_cycle() {
            return Err(CompileError::InconsistentOption(
                "confirm option 'group_confirms' needs a variable life-cycle option".to_string(),
            ));
        }
        Ok(())
    }
}
