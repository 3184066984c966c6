//! Plan differences against a reference.

use crate::plan::PlanStep;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffType {
    /// Step the reference is missing
    Add,
    /// Reference step that has to go
    Delete,
    /// Step kept as is
    None,
}

/// One aligned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub diff_type: DiffType,
    pub step: PlanStep,
}

impl Diff {
    pub fn add(step: PlanStep) -> Self {
        Self {
            diff_type: DiffType::Add,
            step,
        }
    }

    pub fn delete(step: PlanStep) -> Self {
        Self {
            diff_type: DiffType::Delete,
            step,
        }
    }

    pub fn keep(step: PlanStep) -> Self {
        Self {
            diff_type: DiffType::None,
            step,
        }
    }

    pub fn is_edit(&self) -> bool {
        self.diff_type != DiffType::None
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.diff_type {
            DiffType::Add => '+',
            DiffType::Delete => '-',
            DiffType::None => ' ',
        };
        write!(f, "{} {}", mark, self.step)
    }
}

/// Longest-common-subsequence alignment of `reference` against `plan`.
/// Within a gap, deletions come before additions.
pub fn align(reference: &[PlanStep], plan: &[PlanStep]) -> Vec<Diff> {
    let (n, m) = (reference.len(), plan.len());
    // lcs[i][j]: LCS length of reference[i..] and plan[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if reference[i].same_action(&plan[j]) {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if reference[i].same_action(&plan[j]) {
            out.push(Diff::keep(plan[j].clone()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(Diff::delete(reference[i].clone()));
            i += 1;
        } else {
            out.push(Diff::add(plan[j].clone()));
            j += 1;
        }
    }
    out.extend(reference[i..].iter().cloned().map(Diff::delete));
    out.extend(plan[j..].iter().cloned().map(Diff::add));
    out
}
