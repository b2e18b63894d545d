// Compilation error taxonomy
//
// Phases return Result<T, CompileError> and surface failures at their
// barrier joins. Worker errors are wrapped with the descriptor of the item
// that was being processed when the failure occurred.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// Malformed or unsupported configuration input.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigError),

    /// Unreadable or malformed program input.
    #[error("input error on `{item}`: {message}")]
    Input { item: String, message: String },

    /// References to classes, methods or fields that are absent from the
    /// program, classpath and library inputs. Collected once per distinct
    /// item; fatal unless missing references are ignored.
    #[error("{} missing reference(s):\n{}", .0.len(), .0.join("\n"))]
    MissingReferences(Vec<String>),

    /// invoke-interface resolving to a non-interface holder, or
    /// invoke-virtual resolving to an interface holder.
    #[error("{invoke} on {} method `{method}`", if *.interface_holder { "interface" } else { "non-interface" })]
    AmbiguousDispatch {
        invoke: &'static str,
        method: String,
        interface_holder: bool,
    },

    /// A virtual DEX file exceeded one of the 64 Ki reference pools.
    #[error(
        "cannot fit class `{class}` into dex file {dex}: \
         {method_count} method references, {field_count} field references \
         (limit is {limit} of each)"
    )]
    Capacity {
        dex: usize,
        class: String,
        method_count: usize,
        field_count: usize,
        limit: usize,
    },

    /// `-checkdiscard` items that survived shrinking.
    #[error("discard checks failed:\n{}", .0.join("\n"))]
    DiscardChecksFailed(Vec<String>),

    /// A local read/write disagrees with its debug-declared type and could
    /// not be recovered by dropping the type.
    #[error("debug info inconsistency in `{method}`: {message}")]
    DebugInfo { method: String, message: String },

    #[error("i/o error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn input(item: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Input {
            item: item.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration parse error with the offending source location.
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(slimdex::config))]
pub struct ConfigError {
    pub message: String,
    #[source_code]
    pub source_code: miette::NamedSource<String>,
    #[label("here")]
    pub span: miette::SourceSpan,
    /// 1-indexed line and column, kept for plain-text rendering.
    pub line: usize,
    pub column: usize,
}
