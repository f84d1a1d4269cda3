//! Gradebook aggregation. Always a full recompute from the component lists;
//! the derived total/grade pair is never edited directly and never cached.

use serde::Serialize;

/// One scored line item from any of the four component lists. The stored
/// per-component weight is carried for display but is NOT applied here: the
/// total is a straight sum of raw marks. Changing that would silently shift
/// every historical grade, so the unweighted behavior is locked by tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub marks: f64,
    pub weight: Option<f64>,
}

impl Component {
    #[allow(dead_code)]
    pub fn new(marks: f64) -> Self {
        Self {
            marks,
            weight: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Components {
    pub assignments: Vec<Component>,
    pub tests: Vec<Component>,
    pub exams: Vec<Component>,
    pub rubrics: Vec<Component>,
}

impl Components {
    fn is_empty(&self) -> bool {
        self.assignments.is_empty()
            && self.tests.is_empty()
            && self.exams.is_empty()
            && self.rubrics.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

/// Thresholds on the raw summed total, first match wins. The scale of the
/// total is a caller convention (components are expected to add up to a
/// 100-point denominator); nothing here normalizes.
pub fn grade_for_total(total: f64) -> Grade {
    if total >= 90.0 {
        Grade::A
    } else if total >= 80.0 {
        Grade::B
    } else if total >= 70.0 {
        Grade::C
    } else if total >= 60.0 {
        Grade::D
    } else {
        Grade::F
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub total_marks: f64,
    pub final_grade: Option<Grade>,
}

/// Full recompute. An entry with no components at all keeps its grade unset;
/// as soon as one component exists a grade is always assigned, including F
/// for a total of zero.
pub fn aggregate(components: &Components) -> Aggregate {
    if components.is_empty() {
        return Aggregate {
            total_marks: 0.0,
            final_grade: None,
        };
    }

    let total: f64 = components
        .assignments
        .iter()
        .chain(components.tests.iter())
        .chain(components.exams.iter())
        .chain(components.rubrics.iter())
        .map(|c| c.marks)
        .sum();

    Aggregate {
        total_marks: total,
        final_grade: Some(grade_for_total(total)),
    }
}
