//! Control flow types
//!
//! Compiled clauses never unwind through panics. Every statement returns a
//! [`Flow`], and non-local exits travel outward as a [`Control`] until the
//! construct that handles them (a loop, a call boundary, or the invocation
//! driver) turns them back into normal flow.

use crate::errors::ScriptError;

/* ===================== Control Flow ===================== */

/// Active non-local control flow
#[derive(Debug)]
pub enum Control {
    Break,
    Continue,
    /// `return`; the returned value has already been written to output
    Return,
    /// `exit <code>`
    Exit(i32),
    /// Execution is being torn down by the debugger
    Terminate,
    Throw(ScriptError),
}

impl From<ScriptError> for Control {
    fn from(err: ScriptError) -> Self {
        Control::Throw(err)
    }
}

/// Result of running a compiled statement or expression
pub type Flow<T = ()> = Result<T, Control>;

/* ===================== Outcome ===================== */

/// How one invocation of a script clause finished.
///
/// Failures are reported through the `Err` side of the invocation result;
/// these are the non-error outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The clause ran to the end (or returned)
    Completed,
    /// An exit was requested and absorbed by this invocation; the code has been
    /// published to `$LastExitCode`
    Exited(i32),
    /// An exit was requested and must keep propagating to the caller
    ExitRequested(i32),
    /// Execution was torn down by the debugger; always propagates
    Terminated,
}

impl Outcome {
    /// Whether this outcome ends the enclosing pipeline
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Completed)
    }
}
