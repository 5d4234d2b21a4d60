use std::path::{Path, PathBuf};

use crate::namer::EndpointId;

/// How browsers should present a served resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Inline,
    #[default]
    Attachment,
}

impl Visibility {
    pub fn from_inline(inline: bool) -> Self {
        if inline {
            Self::Inline
        } else {
            Self::Attachment
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }
}

/// What an endpoint serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File(PathBuf),
    /// Standard input, announced under a display name.
    Stdin { name: String },
}

impl Target {
    /// Name offered to the client in `Content-Disposition`.
    pub fn display_name(&self) -> String {
        match self {
            Self::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Stdin { name } => name.clone(),
        }
    }

    /// Human-readable label used in log lines.
    pub fn label(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Stdin { name } => format!("stdin ({name})"),
        }
    }
}

/// A registered share. Immutable once created.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: EndpointId,
    pub target: Target,
    pub visibility: Visibility,
}

impl Endpoint {
    pub fn path(&self) -> String {
        self.id.path()
    }

    /// `Content-Disposition` value for this endpoint.
    pub fn content_disposition(&self) -> String {
        let name: String = self
            .target
            .display_name()
            .chars()
            .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
            .collect();
        if name.is_empty() {
            self.visibility.as_str().to_owned()
        } else {
            format!("{}; filename=\"{name}\"", self.visibility.as_str())
        }
    }
}

/// Returns an error message when `path` is not an existing regular file.
pub fn check_shareable(path: &Path) -> Result<(), String> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(format!(
            "{} does not exist or is not a regular file",
            path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(target: Target, visibility: Visibility) -> Endpoint {
        Endpoint {
            id: EndpointId::generate().unwrap(),
            target,
            visibility,
        }
    }

    #[test]
    fn disposition_uses_base_name() {
        let e = endpoint(
            Target::File(PathBuf::from("/tmp/some/dir/report.pdf")),
            Visibility::Attachment,
        );
        assert_eq!(e.content_disposition(), "attachment; filename=\"report.pdf\"");
    }

    #[test]
    fn disposition_inline_for_stdin() {
        let e = endpoint(
            Target::Stdin {
                name: "log.txt".into(),
            },
            Visibility::Inline,
        );
        assert_eq!(e.content_disposition(), "inline; filename=\"log.txt\"");
    }

    #[test]
    fn disposition_strips_quotes_and_control_chars() {
        let e = endpoint(
            Target::Stdin {
                name: "a\"b\nc".into(),
            },
            Visibility::Attachment,
        );
        assert_eq!(e.content_disposition(), "attachment; filename=\"abc\"");
    }

    #[test]
    fn disposition_without_name() {
        let e = endpoint(Target::Stdin { name: "\"".into() }, Visibility::Inline);
        assert_eq!(e.content_disposition(), "inline");
    }

    #[test]
    fn directories_are_not_shareable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_shareable(dir.path()).is_err());
        assert!(check_shareable(&dir.path().join("missing")).is_err());
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(check_shareable(&file).is_ok());
    }
}
