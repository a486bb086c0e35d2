pub mod call_path;
pub mod document;
pub mod metric_db;
pub mod tables;

use std::path::PathBuf;

use thiserror::Error;

pub use call_path::{BuildError, CallPathTreeBuilder};
pub use document::{XmlDocument, XmlElement, XmlError};
pub use metric_db::{AggregateMatrix, MetricDatabase, MetricDbError, MetricMatrix};
pub use tables::{Metadata, MetadataTables, TableError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("metadata: {0}")]
    Xml(#[from] XmlError),
    #[error("tables: {0}")]
    Tables(#[from] TableError),
    #[error("metric-db: {0}")]
    MetricDb(#[from] MetricDbError),
    #[error("call path: {}: {source}", path.display())]
    Build { path: PathBuf, source: BuildError },
}

/// Coarse classification of every failure the reader can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A file or directory is missing or unreadable.
    Io,
    /// Malformed XML or a missing/ambiguous metadata section.
    Parse,
    /// Structurally valid input with inconsistent or out-of-range content.
    Format,
    /// A metric file declares a byte order the format does not define.
    UnsupportedFormat,
    /// An id with no entry in its name table.
    Lookup,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Xml(XmlError::Io { .. }) => ErrorKind::Io,
            Self::Xml(_) | Self::Tables(_) => ErrorKind::Parse,
            Self::MetricDb(err) => match err {
                MetricDbError::Io { .. } | MetricDbError::NoMetricFiles { .. } => ErrorKind::Io,
                MetricDbError::UnsupportedEndianness { .. } => ErrorKind::UnsupportedFormat,
                MetricDbError::InvalidHeader { .. }
                | MetricDbError::HeaderMismatch { .. }
                | MetricDbError::Truncated { .. }
                | MetricDbError::InvalidValue { .. } => ErrorKind::Format,
            },
            Self::Build { source, .. } => match source {
                BuildError::Lookup { .. } => ErrorKind::Lookup,
                BuildError::MissingAttribute { .. }
                | BuildError::InvalidAttribute { .. }
                | BuildError::IdOutOfRange { .. }
                | BuildError::UnknownElement { .. }
                | BuildError::BadRoot { .. } => ErrorKind::Format,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn classifies_by_taxonomy() {
        let xml = Error::from(XmlDocument::parse_str("<A>").unwrap_err());
        assert_eq!(xml.kind(), ErrorKind::Parse);

        let missing =
            Error::from(XmlDocument::from_path(Path::new("/nonexistent.xml")).unwrap_err());
        assert_eq!(missing.kind(), ErrorKind::Io);

        let endian = Error::from(MetricDbError::UnsupportedEndianness {
            path: PathBuf::from("0.metric-db"),
            flag: b'l',
        });
        assert_eq!(endian.kind(), ErrorKind::UnsupportedFormat);

        let lookup = Error::Build {
            path: PathBuf::from("experiment.xml"),
            source: BuildError::Lookup {
                tag: "PF".into(),
                id: 1,
                table: "procedure",
                key: 9,
            },
        };
        assert_eq!(lookup.kind(), ErrorKind::Lookup);
        assert!(lookup.to_string().contains("experiment.xml"));
    }
}
