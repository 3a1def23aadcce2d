use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use dmk_core::SmError;

struct TokenNode {
    cancelled: Cell<bool>,
    links: Vec<CancelToken>,
}

/// Cooperative cancellation token.
///
/// A token is cancelled when its own trigger fires or when any token it is
/// linked to is cancelled. Links only point upwards, so a joint token never
/// cancels its parents.
#[derive(Clone)]
pub struct CancelToken(Rc<TokenNode>);

impl CancelToken {
    pub fn new() -> Self {
        Self::linked(Vec::new())
    }

    fn linked(links: Vec<CancelToken>) -> Self {
        Self(Rc::new(TokenNode {
            cancelled: Cell::new(false),
            links,
        }))
    }

    /// A token that cancels with `self` or through its own trigger.
    pub fn joint(&self) -> Self {
        Self::linked(vec![self.clone()])
    }

    /// A token that cancels with `self`, with `other`, or through its own trigger.
    pub fn joint_with(&self, other: &CancelToken) -> Self {
        Self::linked(vec![self.clone(), other.clone()])
    }

    pub fn cancel(&self) {
        self.0.cancelled.set(true);
    }

    /// True only if this token's own trigger fired.
    pub fn own_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.own_cancelled() || self.0.links.iter().any(CancelToken::is_cancelled)
    }

    pub fn throw_if_cancelled(&self) -> Result<(), SmError> {
        if self.is_cancelled() {
            Err(SmError::cancelled())
        } else {
            Ok(())
        }
    }

    pub fn same(&self, other: &CancelToken) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("links", &self.0.links.len())
            .finish()
    }
}
