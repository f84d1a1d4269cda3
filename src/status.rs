//! Pure state machines for link approval, assignment lifecycle, and
//! submission lifecycle. No storage access here; handlers load the current
//! state, ask this module whether a transition is legal, then persist.

use std::fmt;

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub message: String,
}

impl TransitionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Approval status shared by StudentLink and TeacherLink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Pending,
    Approved,
    Rejected,
}

impl LinkStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// The only legal decisions are pending -> approved and pending -> rejected.
/// Approved and rejected are terminal; re-review means delete-then-recreate.
pub fn decide_link(current: LinkStatus, requested: LinkStatus) -> Result<LinkStatus, TransitionError> {
    if requested == LinkStatus::Pending {
        return Err(TransitionError::new("cannot move a link back to pending"));
    }
    match current {
        LinkStatus::Pending => Ok(requested),
        other => Err(TransitionError::new(format!(
            "link is already {}; remove and re-add to re-review",
            other.as_str()
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentType {
    New,
    Transfer,
}

impl EnrollmentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    Draft,
    Published,
    Closed,
}

impl AssignmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Closed => "closed",
        }
    }
}

pub fn publish_assignment(current: AssignmentStatus) -> Result<AssignmentStatus, TransitionError> {
    match current {
        AssignmentStatus::Draft => Ok(AssignmentStatus::Published),
        other => Err(TransitionError::new(format!(
            "only a draft assignment can be published, not {}",
            other.as_str()
        ))),
    }
}

pub fn close_assignment(current: AssignmentStatus) -> Result<AssignmentStatus, TransitionError> {
    match current {
        AssignmentStatus::Published => Ok(AssignmentStatus::Closed),
        other => Err(TransitionError::new(format!(
            "only a published assignment can be closed, not {}",
            other.as_str()
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Submitted,
    Graded,
}

impl SubmissionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "graded" => Some(Self::Graded),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Graded => "graded",
        }
    }
}

/// Content edits are in-place mutation of a submitted record, never a
/// separate draft state. Once graded, content is frozen.
pub fn can_edit_content(current: SubmissionStatus) -> bool {
    current == SubmissionStatus::Submitted
}
