//! Try-frame records for the structured-exception protocol.

/// Progress of a try region through its blocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExceptionHandlingState {
    /// The try block is executing.
    Try,
    /// The catch block is executing.
    Catch,
    /// The finally block is executing.
    Finally,
}

/// One record in a frame's try stack, tracking an active
/// TRY/CATCH/FINALLY region.
///
/// At least one of the catch and finally pointers is present; TRY rejects
/// a region with neither.
#[derive(Clone, Debug)]
pub struct ExceptionHandlingContext {
    /// Absolute position of the catch block, if the region has one.
    pub catch_pointer: Option<usize>,
    /// Absolute position of the finally block, if the region has one.
    pub finally_pointer: Option<usize>,
    /// Where ENDFINALLY resumes after a clean ENDTRY, set when the finally
    /// block is entered.
    pub end_pointer: usize,
    pub state: ExceptionHandlingState,
}

impl ExceptionHandlingContext {
    pub fn new(catch_pointer: Option<usize>, finally_pointer: Option<usize>) -> Self {
        debug_assert!(catch_pointer.is_some() || finally_pointer.is_some());
        Self {
            catch_pointer,
            finally_pointer,
            end_pointer: 0,
            state: ExceptionHandlingState::Try,
        }
    }

    pub fn has_catch(&self) -> bool {
        self.catch_pointer.is_some()
    }

    pub fn has_finally(&self) -> bool {
        self.finally_pointer.is_some()
    }
}
