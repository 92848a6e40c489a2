//! Error types shared by the loaders, the exporter and the pipeline

use std::io;
use std::path::PathBuf;

/// Parse error raised while loading a grammar or a model
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("cannot read file: {0}")]
    Read(#[from] io::Error),
    #[error("syntax error at {line}:{column}: {message}")]
    SyntaxError {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("semantic error at {line}:{column}: {message}")]
    SemanticError {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("invalid grammar: {message}")]
    GrammarError { message: String },
}

impl ParseError {
    pub(crate) fn grammar(message: impl Into<String>) -> Self {
        ParseError::GrammarError {
            message: message.into(),
        }
    }

    pub(crate) fn syntax(input: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_col(input, offset);
        ParseError::SyntaxError {
            line,
            column,
            message: message.into(),
        }
    }

    pub(crate) fn semantic(input: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_col(input, offset);
        ParseError::SemanticError {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Pipeline error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("cannot write {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 1-based line and column of a byte offset
pub(crate) fn line_col(input: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(input.len());
    let before = &input[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}
