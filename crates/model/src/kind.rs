use serde::{Deserialize, Serialize};

/// The program-location kinds that appear in a call-path profile.
///
/// `CallSite` elements never survive into the tree: they only exist in the
/// source XML and are elided while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    ProcedureFrame,
    Procedure,
    Loop,
    Statement,
    CallSite,
}

impl ElementKind {
    /// Map an XML element tag to its kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "PF" => Some(Self::ProcedureFrame),
            "Pr" => Some(Self::Procedure),
            "L" => Some(Self::Loop),
            "S" => Some(Self::Statement),
            "C" => Some(Self::CallSite),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::ProcedureFrame => "PF",
            Self::Procedure => "Pr",
            Self::Loop => "L",
            Self::Statement => "S",
            Self::CallSite => "C",
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcedureFrame => write!(f, "procedure frame"),
            Self::Procedure => write!(f, "procedure"),
            Self::Loop => write!(f, "loop"),
            Self::Statement => write!(f, "statement"),
            Self::CallSite => write!(f, "call site"),
        }
    }
}

/// Resolved identity of a procedure frame or inlined procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureInfo {
    pub name: String,
    pub procedure_id: u32,
    pub load_module_id: Option<u32>,
    pub file_id: Option<u32>,
}

/// Per-kind payload of a tree node.
///
/// Frames, procedures and loops always carry a display name; statements
/// never do and only hold the source file inherited from their enclosing
/// scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    ProcedureFrame(ProcedureInfo),
    Procedure(ProcedureInfo),
    Loop { name: String, file_id: u32 },
    Statement { file_id: Option<u32> },
}

impl NodeKind {
    pub fn element_kind(&self) -> ElementKind {
        match self {
            Self::ProcedureFrame(_) => ElementKind::ProcedureFrame,
            Self::Procedure(_) => ElementKind::Procedure,
            Self::Loop { .. } => ElementKind::Loop,
            Self::Statement { .. } => ElementKind::Statement,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::ProcedureFrame(info) | Self::Procedure(info) => Some(&info.name),
            Self::Loop { name, .. } => Some(name),
            Self::Statement { .. } => None,
        }
    }

    pub fn file_id(&self) -> Option<u32> {
        match self {
            Self::ProcedureFrame(info) | Self::Procedure(info) => info.file_id,
            Self::Loop { file_id, .. } => Some(*file_id),
            Self::Statement { file_id } => *file_id,
        }
    }

    pub fn load_module_id(&self) -> Option<u32> {
        match self {
            Self::ProcedureFrame(info) | Self::Procedure(info) => info.load_module_id,
            Self::Loop { .. } | Self::Statement { .. } => None,
        }
    }
}
