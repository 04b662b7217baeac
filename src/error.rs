//! Diagnostics: source locations, status codes and the error type threaded
//! through every fallible builder/analysis/pass entry point.

use std::fmt;

/// A single point in a source text: 1-based line and column, plus the
/// `source_id` the [`crate::context::CompilerContext`] assigned to the text
/// it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub source_id: i32,
    pub line: u32,
    pub column: u32,
}

/// A half-open `[begin, end)` range in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub begin: Position,
    pub end: Position,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}-{}",
            self.begin.line, self.begin.column, self.end.column
        )
    }
}

/// Dense status enum. Variant strings below are reproduced verbatim from
/// the source's `tinytc_error_string` table so host code matching on
/// `Status` and host code merely printing an error see the same text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    #[error("Success")]
    Success,
    #[error("Bad allocation")]
    BadAlloc,
    #[error("Invalid arguments passed to function")]
    InvalidArguments,
    #[error("Out of range")]
    OutOfRange,
    #[error("General runtime error")]
    RuntimeError,
    #[error("Internal compiler error")]
    InternalCompilerError,
    #[error("Unsupported subgroup size")]
    UnsupportedSubgroupSize,
    #[error("Work group size is larger than maximum work group size supported by device")]
    UnsupportedWorkGroupSize,
    #[error("Argument is out of bounds")]
    IrOutOfBounds,
    #[error("Mode size must be non-negative")]
    IrInvalidShape,
    #[error("Incompatible tensor shapes")]
    IrIncompatibleShapes,
    #[error("Dimension of shape and stride must match")]
    IrShapeStrideMismatch,
    #[error("Scalar type mismatch")]
    IrScalarMismatch,
    #[error("Number of indices must match memref order or must be 1 for group types")]
    IrInvalidNumberOfIndices,
    #[error("Expected scalar type")]
    IrExpectedScalar,
    #[error("Expected memref type")]
    IrExpectedMemref,
    #[error("Expected memref type or scalar type")]
    IrExpectedMemrefOrScalar,
    #[error("Expected memref or group operand")]
    IrExpectedMemrefOrGroup,
    #[error("Expected vector or matrix input")]
    IrExpectedVectorOrMatrix,
    #[error("Yield encountered in non-yielding region")]
    IrUnexpectedYield,
    #[error("Number of yielded values does not match number of values yielded by region")]
    IrYieldMismatch,
    #[error("At most one mode must be dynamic ('?')")]
    IrMultipleDynamicModes,
    #[error("Offset must be non-negative and must not be '?'; size must be positive or '?'")]
    IrInvalidSlice,
    #[error("Expand shape must have at least 2 entries")]
    IrExpandShapeOrderTooSmall,
    #[error("Product of expand shape must equal mode size")]
    IrExpandShapeMismatch,
    #[error("Duplicate key in dictionary attribute")]
    IrDuplicateKeyInDictionary,
    #[error("Expected integer attribute")]
    IrExpectedIntegerAttribute,
    #[error("Expected string attribute")]
    IrExpectedStringAttribute,
    #[error("Expected array attribute")]
    IrExpectedArrayAttribute,
    #[error("Value still has uses")]
    IrValueStillHasUses,
    #[error("collective instruction used from SPMD region")]
    IrCollectiveCalledFromSpmd,
    #[error("SPMD instruction used from collective region")]
    IrSpmdCalledFromCollective,
    #[error("General parse error")]
    ParseError,
    #[error("General compilation error")]
    CompilationError,
}

/// Number of lines of surrounding context a formatted diagnostic includes
/// on each side of the offending range.
pub const ADDITIONAL_CONTEXT_LINES: u32 = 2;

/// The error value every fallible core API returns.
///
/// Carries enough to both print a self-contained diagnostic (when a
/// [`Location`] and source text are available) and to be matched
/// programmatically on [`Status`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}{}", extra_info.as_deref().map(|s| format!(": {s}")).unwrap_or_default())]
pub struct CompilationError {
    pub location: Option<Location>,
    pub status: Status,
    pub extra_info: Option<String>,
}

impl CompilationError {
    pub fn new(status: Status) -> Self {
        CompilationError {
            location: None,
            status,
            extra_info: None,
        }
    }

    pub fn at(location: Location, status: Status) -> Self {
        CompilationError {
            location: Some(location),
            status,
            extra_info: None,
        }
    }

    pub fn with_message(location: Location, status: Status, message: impl Into<String>) -> Self {
        CompilationError {
            location: Some(location),
            status,
            extra_info: Some(message.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilationError>;

/// Formats `{name}:{location}: {what}` followed by a `±ADDITIONAL_CONTEXT_LINES`
/// line excerpt of `text` with the offending column range underlined by
/// tildes, matching `report_error_with_context` in the source.
pub fn report_error_with_context(
    text: &str,
    name: &str,
    loc: Location,
    what: &str,
) -> String {
    let mut out = String::new();
    let lines: Vec<&str> = text.lines().collect();

    let first_line = loc
        .begin
        .line
        .saturating_sub(ADDITIONAL_CONTEXT_LINES)
        .max(1);
    let last_line = loc.end.line + ADDITIONAL_CONTEXT_LINES;

    for (i, line) in lines.iter().enumerate() {
        let cur_line = (i + 1) as u32;
        if cur_line < first_line || cur_line > last_line {
            continue;
        }
        out.push_str(line);
        out.push('\n');
        if cur_line >= loc.begin.line && cur_line <= loc.end.line {
            let col_begin = if cur_line == loc.begin.line {
                loc.begin.column.saturating_sub(1)
            } else {
                0
            };
            let col_end = if cur_line == loc.end.line {
                loc.end.column.max(loc.begin.column + 1)
            } else {
                line.len() as u32
            };
            let num_col = col_end.saturating_sub(col_begin).max(1);
            out.push_str(&" ".repeat(col_begin as usize));
            out.push_str(&"~".repeat(num_col as usize));
            out.push('\n');
        }
    }

    out.push_str(&format!("{name}:{loc}: {what}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_source_table() {
        assert_eq!(Status::IrInvalidShape.to_string(), "Mode size must be non-negative");
        assert_eq!(
            Status::UnsupportedWorkGroupSize.to_string(),
            "Work group size is larger than maximum work group size supported by device"
        );
    }

    #[test]
    fn context_snippet_underlines_range() {
        let text = "fn copy(A, B) {\n  axpby.n 1, A, 0, B\n}\n";
        let loc = Location {
            begin: Position {
                source_id: 1,
                line: 2,
                column: 3,
            },
            end: Position {
                source_id: 1,
                line: 2,
                column: 9,
            },
        };
        let snippet = report_error_with_context(text, "copy.ttl", loc, "bad thing");
        assert!(snippet.contains("~~~~~~"));
        assert!(snippet.contains("copy.ttl:2.3-9: bad thing"));
    }
}
