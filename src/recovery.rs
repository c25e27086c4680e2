//! Panic isolation for caller-supplied code.
//!
//! View plan builders and backtest rules are user code; a panic inside one
//! becomes an [`Error::Internal`] for that request instead of taking down the
//! worker that ran it.

use crate::types::{Error, Result};
use std::any::Any;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `operation`, turning a panic into `Error::Internal("{label} panicked: ..")`.
///
/// # Example
/// ```
/// use view_service::recovery::with_recovery;
///
/// let plan = with_recovery(|| Ok(vec!["stock_zh_a_hist"]), "view_plan:demo");
/// assert_eq!(plan.unwrap().len(), 1);
///
/// let err = with_recovery::<_, ()>(|| panic!("no symbol"), "view_plan:demo").unwrap_err();
/// assert_eq!(err.to_string(), "internal error: view_plan:demo panicked: no symbol");
/// ```
pub fn with_recovery<F, T>(operation: F, label: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    catch_unwind(AssertUnwindSafe(operation)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(operation = label, panic = %message, "panic_recovered");
        Err(Error::internal(format!("{} panicked: {}", label, message)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> Cow<'_, str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        Cow::Borrowed(s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Cow::Borrowed(s.as_str())
    } else {
        Cow::Borrowed("non-string panic payload")
    }
}
