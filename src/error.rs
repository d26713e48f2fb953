/// Errors returned by [`ConsingMap::get`](crate::ConsingMap::get).
///
/// Contention, lost races and resizes are resolved internally and never
/// surface here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsError {
    /// No candidate value was supplied.
    #[error("cannot intern a missing value")]
    InvalidArgument,
}
